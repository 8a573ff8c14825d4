//! Driving a decoded [`Patch`]'s sync ops against a target [`Pool`],
//! writing reconstructed files through a [`Bowl`] (spec §4.4, §4.5).
//!
//! This is the teacher's `Patch::apply`, generalized: instead of a
//! hardcoded `old_build_folder`/`new_build_folder` pair it reads target
//! bytes through any [`Pool`] and writes through any [`Bowl`], so the same
//! driver works whether the destination is a fresh directory, an
//! in-place overlay, or an arbitrary [`crate::pool::WritablePool`].

mod bsdiff;
pub(crate) mod rsync;

use super::{Patch, SyncHeader, SyncHeaderKind};
use crate::bowl::Bowl;
use crate::consumer::{Consumer, ProgressTracker};
use crate::error::{Error, Result};
use crate::pool::Pool;

use std::io::Read;
use std::num::NonZeroUsize;

const MAX_OPEN_FILES_PATCH: NonZeroUsize = NonZeroUsize::new(16).unwrap();

/// A point patch application can be resumed from: every file strictly
/// before `file_idx` has already been fully written and closed through
/// the bowl.
///
/// Spec §4.4/§9 frame resumption as a byte offset into the file that was
/// interrupted. Ops only ever read from `target_pool` and write
/// sequentially to the bowl — replaying them is side-effect-free and
/// cheap — so this crate resumes at op granularity within the restarted
/// file instead of reconstructing a mid-op byte offset. Recorded as an
/// Open Question resolution in `DESIGN.md`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checkpoint {
  pub file_idx: usize,
}

impl<'p> Patch<'p> {
  /// Apply every file section of this patch against `target_pool`,
  /// writing reconstructed bytes through `bowl`. Does not call
  /// `bowl.commit()` — the caller does that once, after this returns.
  ///
  /// # Errors
  ///
  /// See [`crate::error::Error`].
  pub fn apply<P: Pool, B: Bowl>(&mut self, target_pool: &P, bowl: &mut B, consumer: &dyn Consumer) -> Result<()> {
    self.apply_from(target_pool, bowl, consumer, Checkpoint::default())
  }

  /// Like [`Patch::apply`], but skip file sections strictly before
  /// `resume_from.file_idx` instead of rewriting them.
  ///
  /// # Errors
  ///
  /// See [`crate::error::Error`].
  pub fn apply_from<'t, P: Pool, B: Bowl>(
    &mut self,
    target_pool: &'t P,
    bowl: &mut B,
    consumer: &dyn Consumer,
    resume_from: Checkpoint,
  ) -> Result<()> {
    let mut old_files_cache: lru::LruCache<usize, P::Reader<'t>> = lru::LruCache::new(MAX_OPEN_FILES_PATCH);
    let mut add_buffer: Vec<u8> = Vec::new();
    let mut tracker = ProgressTracker::new(consumer, self.container_new.file_bytes());

    while let Some(header) = self.sync_op_iter.next_header() {
      let mut header = header.map_err(Error::MalformedStream)?;
      let file_idx = header.file_index as usize;

      let new_file = self
        .container_new
        .files
        .get(file_idx)
        .ok_or_else(|| Error::ValidationError(format!("invalid new file index in patch: {file_idx}")))?;
      let new_file_size = new_file.size as u64;

      if file_idx < resume_from.file_idx {
        drain_header(&mut header).map_err(Error::MalformedStream)?;
        tracker.advance(new_file_size);
        continue;
      }

      tracker.label(&new_file.path);

      match header.kind {
        SyncHeaderKind::Rsync { mut op_iter } => {
          // The first op, on its own, may already reconstruct the whole
          // file (a literal copy) — detected before opening a writer so
          // the bowl can use its cheaper `transpose` path instead.
          let first = op_iter
            .next()
            .ok_or_else(|| Error::MalformedStream(format!("file #{file_idx}: empty rsync op stream")))?
            .map_err(Error::MalformedStream)?;

          if first.is_literal_copy(new_file_size) {
            if op_iter.next().is_some() {
              return Err(Error::InvariantViolation(format!(
                "file #{file_idx}: literal-copy SyncOp was followed by more ops"
              )));
            }

            bowl
              .transpose(file_idx, first.file_index as usize)
              .map_err(|e| in_file(e, file_idx))?;
            tracker.advance(new_file_size);
            continue;
          }

          let mut writer = bowl.get_writer(file_idx).map_err(|e| in_file(e, file_idx))?;

          for op in std::iter::once(Ok(first)).chain(op_iter) {
            let op = op.map_err(Error::MalformedStream)?;
            op
              .apply(&mut writer, target_pool, &mut old_files_cache, &mut |n| tracker.advance(n))
              .map_err(|e| in_file(Error::from(e), file_idx))?;
          }

          bowl.close_writer(file_idx, writer).map_err(|e| in_file(e, file_idx))?;
        }

        SyncHeaderKind::Bsdiff { target_index, mut op_iter } => {
          let mut writer = bowl.get_writer(file_idx).map_err(|e| in_file(e, file_idx))?;
          let mut target_reader = target_pool
            .get_reader(target_index as usize)
            .map_err(|e| in_file(e, file_idx))?;

          bsdiff::apply_bsdiff(
            &mut op_iter,
            &mut writer,
            &mut target_reader,
            &mut add_buffer,
            &mut |n| tracker.advance(n),
          )
          .map_err(|e| in_file(Error::from(e), file_idx))?;

          bowl.close_writer(file_idx, writer).map_err(|e| in_file(e, file_idx))?;
        }
      }
    }

    Ok(())
  }
}

fn in_file(source: Error, file_idx: usize) -> Error {
  Error::InFile {
    file: file_idx,
    source: Box::new(source),
  }
}

/// Consume a header's ops without writing anything, for file sections
/// that already landed before a resume point.
fn drain_header<R: Read>(header: &mut SyncHeader<'_, R>) -> std::result::Result<(), String> {
  match &mut header.kind {
    SyncHeaderKind::Rsync { op_iter } => {
      for op in op_iter.by_ref() {
        op?;
      }
    }
    SyncHeaderKind::Bsdiff { op_iter, .. } => {
      for op in op_iter.by_ref() {
        op?;
      }
    }
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::bowl::PoolBowl;
  use crate::consumer::NopConsumer;
  use crate::patch::write::write_patch;
  use crate::pool::MemPool;
  use crate::protos::pwr;
  use crate::protos::tlc;

  fn file(path: &str, size: i64) -> tlc::File {
    tlc::File {
      path: path.to_string(),
      mode: 0o644,
      size,
    }
  }

  #[test]
  fn applies_literal_copy_via_transpose() {
    let old_container = tlc::Container {
      size: 4,
      dirs: vec![],
      symlinks: vec![],
      files: vec![file("a.txt", 4)],
    };
    let new_container = tlc::Container {
      size: 4,
      dirs: vec![],
      symlinks: vec![],
      files: vec![file("a.txt", 4)],
    };

    let old_pool = MemPool::with_contents(vec![b"abcd".to_vec()]);

    let mut patch_bytes = Vec::new();
    write_patch(
      &mut patch_bytes,
      pwr::CompressionSettings {
        algorithm: pwr::CompressionAlgorithm::None as i32,
        quality: 0,
      },
      &old_container,
      &new_container,
      vec![pwr::SyncHeader {
        file_index: 0,
        r#type: pwr::sync_header::Type::Rsync as i32,
      }],
      vec![vec![pwr::SyncOp {
        r#type: pwr::sync_op::Type::BlockRange as i32,
        file_index: 0,
        block_index: 0,
        block_span: 1,
        data: vec![],
      }]],
    )
    .unwrap();

    let mut reader = std::io::BufReader::new(patch_bytes.as_slice());
    let mut patch = Patch::read(&mut reader).unwrap();

    let new_pool = MemPool::new(1);
    let mut bowl = PoolBowl::new(&old_pool, &new_pool);

    patch.apply(&old_pool, &mut bowl, &NopConsumer).unwrap();
    bowl.commit().unwrap();

    assert_eq!(new_pool.contents(0), b"abcd");
  }

  #[test]
  fn applies_data_op() {
    let old_container = tlc::Container {
      size: 0,
      dirs: vec![],
      symlinks: vec![],
      files: vec![],
    };
    let new_container = tlc::Container {
      size: 5,
      dirs: vec![],
      symlinks: vec![],
      files: vec![file("b.txt", 5)],
    };

    let old_pool = MemPool::new(0);

    let mut patch_bytes = Vec::new();
    write_patch(
      &mut patch_bytes,
      pwr::CompressionSettings {
        algorithm: pwr::CompressionAlgorithm::None as i32,
        quality: 0,
      },
      &old_container,
      &new_container,
      vec![pwr::SyncHeader {
        file_index: 0,
        r#type: pwr::sync_header::Type::Rsync as i32,
      }],
      vec![vec![pwr::SyncOp {
        r#type: pwr::sync_op::Type::Data as i32,
        file_index: 0,
        block_index: 0,
        block_span: 0,
        data: b"hello".to_vec(),
      }]],
    )
    .unwrap();

    let mut reader = std::io::BufReader::new(patch_bytes.as_slice());
    let mut patch = Patch::read(&mut reader).unwrap();

    let new_pool = MemPool::new(1);
    let mut bowl = PoolBowl::new(&old_pool, &new_pool);

    patch.apply(&old_pool, &mut bowl, &NopConsumer).unwrap();
    bowl.commit().unwrap();

    assert_eq!(new_pool.contents(0), b"hello");
  }
}
