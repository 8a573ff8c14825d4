//! Sources and destinations of the byte contents described by a
//! [`crate::protos::tlc::Container`].
//!
//! Grounded in `wsync.Pool`/`wsync.WritablePool` as used by `copy.go`'s
//! `CopyContainer`: a container only carries paths, sizes and modes, the
//! actual bytes of file `i` come from whatever `Pool::get_reader(i)`
//! returns. This indirection is what lets [`crate::bowl`] write either
//! straight to a fresh directory or through a staging area without the
//! diff/patch code caring which.

use crate::consumer::{Consumer, ProgressTracker};
use crate::error::Result;
use crate::protos::tlc::Container;

use std::fs;
use std::io::{Read, Seek, Write};
use std::path::PathBuf;

/// A source of readable, seekable byte streams keyed by file index into a
/// [`Container`].
pub trait Pool {
  type Reader<'a>: Read + Seek + 'a
  where
    Self: 'a;

  /// Open the file at `file_index` for reading from the start.
  ///
  /// # Errors
  ///
  /// If the file doesn't exist or can't be opened.
  fn get_reader(&self, file_index: usize) -> Result<Self::Reader<'_>>;
}

/// A destination of writable byte streams keyed by file index into a
/// [`Container`].
pub trait WritablePool {
  type Writer<'a>: Write + 'a
  where
    Self: 'a;

  /// Open the file at `file_index` for writing from the start, creating
  /// it (and any missing parent directories) if necessary.
  ///
  /// # Errors
  ///
  /// If the file can't be created or truncated.
  fn get_writer(&self, file_index: usize) -> Result<Self::Writer<'_>>;
}

/// A [`Pool`]/[`WritablePool`] backed by a directory tree on disk, keyed
/// by the paths in `container`.
///
/// This generalizes `tlc::File::open_read`/`open_write` (see
/// `container.rs`) to arbitrary pools instead of a single hardcoded build
/// folder, so the same container can be read from the old build while
/// being written into a staging directory.
pub struct FsPool<'c> {
  container: &'c Container,
  root: PathBuf,
}

impl<'c> FsPool<'c> {
  #[must_use]
  pub fn new(container: &'c Container, root: impl Into<PathBuf>) -> Self {
    Self {
      container,
      root: root.into(),
    }
  }

  fn file_path(&self, file_index: usize) -> Result<PathBuf> {
    let file = self
      .container
      .files
      .get(file_index)
      .ok_or_else(|| crate::error::Error::ValidationError(format!("invalid file index: {file_index}")))?;

    Ok(self.root.join(&file.path))
  }
}

impl<'c> Pool for FsPool<'c> {
  type Reader<'a>
    = fs::File
  where
    Self: 'a;

  fn get_reader(&self, file_index: usize) -> Result<Self::Reader<'_>> {
    Ok(fs::File::open(self.file_path(file_index)?)?)
  }
}

impl<'c> WritablePool for FsPool<'c> {
  type Writer<'a>
    = fs::File
  where
    Self: 'a;

  fn get_writer(&self, file_index: usize) -> Result<Self::Writer<'_>> {
    let path = self.file_path(file_index)?;

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
}

/// A [`Pool`]/[`WritablePool`] backed by in-memory buffers, keyed by file
/// index. Used by tests that don't want to touch the filesystem, and by
/// [`crate::rediff`] when re-encoding a patch purely in memory.
#[derive(Default)]
pub struct MemPool {
  files: Vec<parking_lot::Mutex<Vec<u8>>>,
}

impl MemPool {
  #[must_use]
  pub fn new(file_count: usize) -> Self {
    Self {
      files: (0..file_count).map(|_| parking_lot::Mutex::new(Vec::new())).collect(),
    }
  }

  #[must_use]
  pub fn with_contents(contents: Vec<Vec<u8>>) -> Self {
    Self {
      files: contents.into_iter().map(parking_lot::Mutex::new).collect(),
    }
  }

  /// Snapshot the current contents of file `file_index`.
  #[must_use]
  pub fn contents(&self, file_index: usize) -> Vec<u8> {
    self.files[file_index].lock().clone()
  }
}

impl Pool for MemPool {
  type Reader<'a>
    = std::io::Cursor<Vec<u8>>
  where
    Self: 'a;

  fn get_reader(&self, file_index: usize) -> Result<Self::Reader<'_>> {
    let file = self
      .files
      .get(file_index)
      .ok_or_else(|| crate::error::Error::ValidationError(format!("invalid file index: {file_index}")))?;

    Ok(std::io::Cursor::new(file.lock().clone()))
  }
}

/// A writer into a [`MemPool`] slot; truncates the slot on creation and
/// writes from the start, matching [`WritablePool::get_writer`]'s contract.
pub struct MemPoolWriter<'a> {
  slot: &'a parking_lot::Mutex<Vec<u8>>,
}

impl Write for MemPoolWriter<'_> {
  fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
    self.slot.lock().extend_from_slice(buf);
    Ok(buf.len())
  }

  fn flush(&mut self) -> std::io::Result<()> {
    Ok(())
  }
}

impl WritablePool for MemPool {
  type Writer<'a>
    = MemPoolWriter<'a>
  where
    Self: 'a;

  fn get_writer(&self, file_index: usize) -> Result<Self::Writer<'_>> {
    let slot = self
      .files
      .get(file_index)
      .ok_or_else(|| crate::error::Error::ValidationError(format!("invalid file index: {file_index}")))?;

    slot.lock().clear();

    Ok(MemPoolWriter { slot })
  }
}

/// Copy every file of `container` from `in_pool` to `out_pool`, file index
/// by file index, reporting overall byte progress through `consumer`.
///
/// Grounded in `pwr.CopyContainer` (`original_source/pwr/copy.go`): used to
/// split a container into a pool keyed purely by index (e.g. staging one
/// out of a zip archive into plain files) or to join one back together.
/// Not one of spec.md's named operations, but the concrete mechanism
/// `crate::bowl::PoolBowl` relies on for whole-file transposition, exposed
/// standalone since callers may want it outside of patch application too.
///
/// # Errors
///
/// If reading from `in_pool` or writing to `out_pool` fails for any file.
pub fn copy_container<In: Pool, Out: WritablePool>(
  container: &Container,
  out_pool: &Out,
  in_pool: &In,
  consumer: &dyn Consumer,
) -> Result<()> {
  let mut tracker = ProgressTracker::new(consumer, container.file_bytes());

  for (file_index, file) in container.files.iter().enumerate() {
    tracker.label(&file.path);

    let mut reader = in_pool.get_reader(file_index)?;
    let mut writer = out_pool.get_writer(file_index)?;

    let mut buf = [0u8; 64 * 1024];
    loop {
      let read = reader.read(&mut buf)?;
      if read == 0 {
        break;
      }
      writer.write_all(&buf[..read])?;
      tracker.advance(read as u64);
    }
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::consumer::NopConsumer;

  #[test]
  fn copy_container_copies_every_file() {
    let container = Container {
      size: 8,
      dirs: vec![],
      symlinks: vec![],
      files: vec![
        crate::protos::tlc::File {
          path: "a.txt".to_string(),
          mode: 0o644,
          size: 5,
        },
        crate::protos::tlc::File {
          path: "b.txt".to_string(),
          mode: 0o644,
          size: 3,
        },
      ],
    };

    let in_pool = MemPool::with_contents(vec![b"hello".to_vec(), b"bye".to_vec()]);
    let out_pool = MemPool::new(2);

    copy_container(&container, &out_pool, &in_pool, &NopConsumer).unwrap();

    assert_eq!(out_pool.contents(0), b"hello");
    assert_eq!(out_pool.contents(1), b"bye");
  }

  #[test]
  fn mempool_round_trips() {
    let pool = MemPool::new(2);
    {
      let mut w = pool.get_writer(0).unwrap();
      w.write_all(b"hello").unwrap();
    }
    assert_eq!(pool.contents(0), b"hello");

    let mut buf = Vec::new();
    pool.get_reader(0).unwrap().read_to_end(&mut buf).unwrap();
    assert_eq!(buf, b"hello");
  }
}
