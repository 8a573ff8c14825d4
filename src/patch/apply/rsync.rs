use crate::common::BLOCK_SIZE;
use crate::pool::Pool;
use crate::protos::pwr;

use std::io::{self, Read, Seek, Write};

/// Copy blocks of bytes from `src` into `dst`
fn copy_range(
  src: &mut (impl Read + Seek),
  dst: &mut impl Write,
  block_index: u64,
  block_span: u64,
) -> Result<u64, String> {
  let start_pos = block_index * BLOCK_SIZE;
  let len = block_span * BLOCK_SIZE;

  src
    .seek(io::SeekFrom::Start(start_pos))
    .map_err(|e| format!("Couldn't seek into old file at pos: {start_pos}\n{e}"))?;

  let mut limited = src.take(len);

  io::copy(&mut limited, dst).map_err(|e| format!("Couldn't copy data from old file to new!\n{e}"))
}

impl pwr::SyncOp {
  /// Whether this single op, on its own, reconstructs the whole file
  /// verbatim from one target file: a `BLOCK_RANGE` starting at block 0
  /// whose span covers the declared new size. The patcher uses this to
  /// short-circuit into `Bowl::transpose` instead of copying bytes.
  #[must_use]
  pub fn is_literal_copy(&self, new_file_size: u64) -> bool {
    self.r#type() == pwr::sync_op::Type::BlockRange
      && self.block_index == 0
      && (self.block_span as u64) * BLOCK_SIZE >= new_file_size
  }

  /// Apply the `op` rsync operation, reading target data for `BLOCK_RANGE`
  /// through `target_pool` keyed by the op's `file_index`.
  pub fn apply<'p, P: Pool>(
    &self,
    writer: &mut impl Write,
    target_pool: &'p P,
    old_files_cache: &mut lru::LruCache<usize, P::Reader<'p>>,
    progress_callback: &mut impl FnMut(u64),
  ) -> Result<(), String> {
    match self.r#type() {
      pwr::sync_op::Type::BlockRange => {
        let old_file = old_files_cache.try_get_or_insert_mut(self.file_index as usize, || {
          target_pool
            .get_reader(self.file_index as usize)
            .map_err(|e| e.to_string())
        })?;

        let written_bytes = copy_range(
          old_file,
          writer,
          self.block_index as u64,
          self.block_span as u64,
        )?;

        progress_callback(written_bytes)
      }
      pwr::sync_op::Type::Data => {
        writer
          .write_all(&self.data)
          .map_err(|e| format!("Couldn't copy data from patch to new file!\n{e}"))?;

        progress_callback(self.data.len() as u64)
      }
      pwr::sync_op::Type::HeyYouDidIt => unreachable!(),
    }

    Ok(())
  }
}
