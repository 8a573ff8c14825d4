//! `OverlayBowl`: patch an existing installation in place (spec §4.5.2).
//!
//! Every file is either written whole into a staging directory, or (when
//! its path already exists in the target install) diffed against the
//! existing on-disk bytes through [`crate::overlay::OverlayWriter`] and
//! staged as an overlay stream instead. Nothing touches `output_dir`
//! itself until [`OverlayBowl::commit`], in the order spec §4.5.2 and §5
//! require: fully-staged renames, then overlay applies (ascending
//! `file_idx`), then deletes, then path renames.

use crate::bowl::Bowl;
use crate::error::{Error, Result};
use crate::overlay::OverlayWriter;
use crate::overlay::apply::apply_in_place;
use crate::pool::Pool;
use crate::protos::tlc::Container;

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

enum Destination {
  /// Written whole into `stage_dir/<file_idx>`, to be renamed into place.
  Staged,
  /// Written as an overlay stream into `stage_dir/<file_idx>.overlay`,
  /// applied in place against the existing file at commit time.
  Overlay { target_idx: usize },
}

pub struct OverlayBowl<'c, P> {
  new_container: &'c Container,
  old_container: &'c Container,
  target_pool: &'c P,
  output_dir: PathBuf,
  stage_dir: PathBuf,

  destinations: HashMap<usize, Destination>,
  order: Vec<usize>,
  renames: Vec<(usize, usize)>,
}

fn stage_path(stage_dir: &Path, file_idx: usize) -> PathBuf {
  stage_dir.join(format!("{file_idx}.new"))
}

fn overlay_path(stage_dir: &Path, file_idx: usize) -> PathBuf {
  stage_dir.join(format!("{file_idx}.overlay"))
}

impl<'c, P: Pool> OverlayBowl<'c, P> {
  /// # Errors
  ///
  /// If `stage_dir` can't be created.
  pub fn new(
    new_container: &'c Container,
    old_container: &'c Container,
    target_pool: &'c P,
    output_dir: impl Into<PathBuf>,
    stage_dir: impl Into<PathBuf>,
  ) -> Result<Self> {
    let stage_dir = stage_dir.into();
    fs::create_dir_all(&stage_dir)?;

    Ok(Self {
      new_container,
      old_container,
      target_pool,
      output_dir: output_dir.into(),
      stage_dir,
      destinations: HashMap::new(),
      order: Vec::new(),
      renames: Vec::new(),
    })
  }

  /// The path an existing file of the same name would have in `old_container`,
  /// if any — overlay mode is only worthwhile against that file's bytes.
  fn existing_target_index(&self, path: &str) -> Option<usize> {
    self
      .old_container
      .files
      .iter()
      .position(|f| f.path == path)
  }
}

pub enum OverlayBowlWriter<R> {
  Staged(fs::File),
  Overlay(OverlayWriter<R, fs::File>),
}

impl<R: io::Read> Write for OverlayBowlWriter<R> {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    match self {
      Self::Staged(f) => f.write(buf),
      Self::Overlay(w) => w.write(buf),
    }
  }

  fn flush(&mut self) -> io::Result<()> {
    match self {
      Self::Staged(f) => f.flush(),
      Self::Overlay(w) => w.flush(),
    }
  }
}

impl<'c, P: Pool> Bowl for OverlayBowl<'c, P> {
  type Writer<'a>
    = OverlayBowlWriter<P::Reader<'a>>
  where
    Self: 'a;

  fn get_writer(&mut self, file_idx: usize) -> Result<Self::Writer<'_>> {
    let file = self
      .new_container
      .files
      .get(file_idx)
      .ok_or_else(|| Error::ValidationError(format!("invalid new file index: {file_idx}")))?;

    self.order.push(file_idx);

    match self.existing_target_index(&file.path) {
      Some(target_idx) => {
        self
          .destinations
          .insert(file_idx, Destination::Overlay { target_idx });

        let reference = self.target_pool.get_reader(target_idx)?;
        let sink = fs::File::create(overlay_path(&self.stage_dir, file_idx))?;
        Ok(OverlayBowlWriter::Overlay(OverlayWriter::new(
          reference, sink,
        )?))
      }
      None => {
        self.destinations.insert(file_idx, Destination::Staged);
        let sink = fs::File::create(stage_path(&self.stage_dir, file_idx))?;
        Ok(OverlayBowlWriter::Staged(sink))
      }
    }
  }

  fn transpose(&mut self, source_file_idx: usize, target_file_idx: usize) -> Result<()> {
    self.renames.push((source_file_idx, target_file_idx));
    Ok(())
  }

  fn close_writer(&mut self, _file_idx: usize, writer: Self::Writer<'_>) -> Result<()> {
    match writer {
      OverlayBowlWriter::Staged(f) => drop(f),
      OverlayBowlWriter::Overlay(w) => {
        w.finish()?;
      }
    }
    Ok(())
  }

  fn commit(self) -> Result<()> {
    // Step 1: rename fully-staged files into place.
    for &file_idx in &self.order {
      if let Some(Destination::Staged) = self.destinations.get(&file_idx) {
        let from = stage_path(&self.stage_dir, file_idx);
        let to = self
          .output_dir
          .join(&self.new_container.files[file_idx].path);

        if let Some(parent) = to.parent() {
          fs::create_dir_all(parent)?;
        }

        rename_or_copy(&from, &to)?;
      }
    }

    // Step 2: apply overlays in ascending file_idx order.
    let mut overlay_indices: Vec<usize> = self
      .order
      .iter()
      .copied()
      .filter(|idx| matches!(self.destinations.get(idx), Some(Destination::Overlay { .. })))
      .collect();
    overlay_indices.sort_unstable();

    for file_idx in overlay_indices {
      let stream_path = overlay_path(&self.stage_dir, file_idx);
      let stream = fs::File::open(&stream_path)?;
      let target_path = self
        .output_dir
        .join(&self.new_container.files[file_idx].path);

      let mut target_file = fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(&target_path)?;

      apply_in_place(stream, &mut target_file)?;

      fs::remove_file(&stream_path)?;
    }

    // Step 3: delete files present in the old container but absent from the new one.
    // Files that are about to be renamed into place (step 4) are not deleted
    // here even though their old path has no counterpart in the new
    // container by exact match — they're handled by the rename instead.
    let new_paths: HashSet<&str> = self
      .new_container
      .files
      .iter()
      .map(|f| f.path.as_str())
      .collect();
    let rename_targets: HashSet<usize> = self.renames.iter().map(|(_, target_idx)| *target_idx).collect();

    for (old_idx, old_file) in self.old_container.files.iter().enumerate() {
      if !new_paths.contains(old_file.path.as_str()) && !rename_targets.contains(&old_idx) {
        let path = self.output_dir.join(&old_file.path);
        match fs::remove_file(&path) {
          Ok(()) => {}
          Err(e) if e.kind() == io::ErrorKind::NotFound => {}
          Err(e) => return Err(e.into()),
        }
      }
    }

    // Step 4: path renames recorded via `transpose`.
    for (source_idx, target_idx) in &self.renames {
      let from = self.output_dir.join(&self.old_container.files[*target_idx].path);
      let to = self.output_dir.join(&self.new_container.files[*source_idx].path);

      if from == to {
        continue;
      }

      if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
      }

      rename_or_copy(&from, &to)?;
    }

    self.new_container.create_directories(&self.output_dir)?;
    self.new_container.create_symlinks(&self.output_dir)?;
    self.new_container.apply_permissions(&self.output_dir)?;

    Ok(())
  }
}

/// Rename, falling back to copy+remove when the rename fails (e.g. the
/// stage and output directories are on different filesystems).
fn rename_or_copy(from: &Path, to: &Path) -> Result<()> {
  if fs::rename(from, to).is_ok() {
    return Ok(());
  }

  let mut src = fs::File::open(from)?;
  let mut dst = fs::File::create(to)?;
  io::copy(&mut src, &mut dst)?;
  dst.sync_all()?;
  drop(dst);
  fs::remove_file(from)?;

  Ok(())
}
