//! `FreshBowl`: write into an empty (or to-be-overwritten) directory.
//!
//! Grounded in `container.rs`'s `tlc::Container::create`/`open_file_write`:
//! this is that same "write straight into a build folder" logic, just
//! behind the `Bowl` trait so the patcher doesn't need to know it's
//! talking to a plain directory instead of an overlay or a pool.

use crate::bowl::Bowl;
use crate::error::{Error, Result};
use crate::pool::Pool;
use crate::protos::tlc::Container;

use std::fs;
use std::io::{self};
use std::path::PathBuf;

/// Writes reconstructed files directly into `output_dir`. No staging: the
/// patcher never reads from files it's writing, so there's nothing to
/// protect against in-place corruption of.
pub struct FreshBowl<'c, P> {
  new_container: &'c Container,
  target_pool: &'c P,
  output_dir: PathBuf,
}

impl<'c, P: Pool> FreshBowl<'c, P> {
  #[must_use]
  pub fn new(new_container: &'c Container, target_pool: &'c P, output_dir: impl Into<PathBuf>) -> Self {
    Self {
      new_container,
      target_pool,
      output_dir: output_dir.into(),
    }
  }
}

impl<'c, P: Pool> Bowl for FreshBowl<'c, P> {
  type Writer<'a>
    = fs::File
  where
    Self: 'a;

  fn get_writer(&mut self, file_idx: usize) -> Result<Self::Writer<'_>> {
    let file = self
      .new_container
      .files
      .get(file_idx)
      .ok_or_else(|| Error::ValidationError(format!("invalid new file index: {file_idx}")))?;

    let path = self.output_dir.join(&file.path);
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)?;
    }

    Ok(
      fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?,
    )
  }

  fn transpose(&mut self, source_file_idx: usize, target_file_idx: usize) -> Result<()> {
    let mut reader = self.target_pool.get_reader(target_file_idx)?;
    let mut writer = self.get_writer(source_file_idx)?;
    io::copy(&mut reader, &mut writer)?;
    Ok(())
  }

  fn commit(self) -> Result<()> {
    self.new_container.create_directories(&self.output_dir)?;
    self.new_container.create_symlinks(&self.output_dir)?;
    self.new_container.apply_permissions(&self.output_dir)?;
    Ok(())
  }
}
