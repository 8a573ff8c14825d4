//! The rolling-hash diff engine (spec §4.3): scans every file of a new
//! build against the block hashes in an existing signature of the old
//! build, and writes a patch stream that only carries the bytes that
//! changed.
//!
//! The teacher has no diff engine at all — it only ever applies patches
//! produced elsewhere. This is grounded in the same per-block hashing
//! shape `crate::signature::compute` uses to produce a signature, driven
//! byte-by-byte with `crate::rolling::RollingChecksum` instead of
//! stepping whole blocks, the way rsync itself scans a source file for
//! blocks the receiver already has.

use crate::common::BLOCK_SIZE;
use crate::consumer::{Consumer, ProgressTracker};
use crate::patch::write as patch_write;
use crate::pool::Pool;
use crate::protos::{pwr, tlc};
use crate::rolling::RollingChecksum;
use crate::signature::Signature;

use md5::{Digest, Md5};
use std::collections::HashMap;
use std::io::{Read, Write};

/// One block from the old build's signature, indexed by weak hash so a
/// match can be turned back into a `BLOCK_RANGE` op.
struct BlockEntry {
  file_idx: usize,
  block_idx: u64,
  len: u64,
  short_hash: Vec<u8>,
  strong_hash: Vec<u8>,
}

/// Every block of an old build's signature, indexed by weak hash.
/// Bucket order follows signature order (ascending file, then ascending
/// block), so the first verified match in a bucket is always the
/// smallest `(file_idx, block_idx)` — the tie-break spec §4.3 asks for.
struct BlockTable {
  blocks: Vec<BlockEntry>,
  by_weak: HashMap<u32, Vec<usize>>,
}

impl BlockTable {
  fn build(old_signature: &mut Signature<'_>) -> Result<Self, String> {
    let mut blocks = Vec::new();
    let mut by_weak: HashMap<u32, Vec<usize>> = HashMap::new();

    for (file_idx, file) in old_signature.container_new.files.iter().enumerate() {
      let block_count = file.block_count();

      for block_idx in 0..block_count {
        let hash = old_signature
          .block_hash_iter
          .next()
          .ok_or_else(|| "signature ended before every file's blocks were read".to_string())??;

        let len = if block_idx + 1 == block_count {
          file.size as u64 - block_idx * BLOCK_SIZE
        } else {
          BLOCK_SIZE
        };

        let index = blocks.len();
        blocks.push(BlockEntry {
          file_idx,
          block_idx,
          len,
          short_hash: hash.short_hash,
          strong_hash: hash.strong_hash,
        });
        by_weak.entry(hash.weak_hash).or_default().push(index);
      }
    }

    Ok(Self { blocks, by_weak })
  }

  /// Find the first (lowest file/block) candidate whose declared block
  /// length matches `window.len()` and whose strong hash matches. Like
  /// rsync, a weak+strong hash match is trusted outright: this crate
  /// never re-reads the old build's bytes while diffing, only its
  /// signature.
  ///
  /// The window's strong hash is computed once (not per candidate) and
  /// its leading bytes are checked against each candidate's `short_hash`
  /// first (spec §4.2's first-stage filter) before the full strong-hash
  /// comparison, so a weak-hash collision against an unrelated block is
  /// rejected without comparing the whole strong hash.
  fn find_match(&self, weak: u32, window: &[u8]) -> Option<(usize, u64)> {
    let candidates = self.by_weak.get(&weak)?;

    let mut hasher = Md5::new();
    hasher.update(window);
    let strong = hasher.finalize();

    for &idx in candidates {
      let entry = &self.blocks[idx];
      if entry.len as usize != window.len() {
        continue;
      }

      let short_len = entry.short_hash.len();
      if (*strong)[..short_len] != *entry.short_hash {
        continue;
      }

      if *strong == *entry.strong_hash {
        return Some((entry.file_idx, entry.block_idx));
      }
    }

    None
  }
}

/// An in-progress `BLOCK_RANGE` match, tracked so consecutive matched
/// blocks against the same old file can be coalesced into one span
/// instead of one `SyncOp` per block.
type Run = Option<(usize, u64, i64)>;

fn extend_or_start_run(ops: &mut Vec<pwr::SyncOp>, run: &mut Run, file_idx: usize, block_idx: u64) {
  let extends = matches!(run, Some((f, b, span)) if *f == file_idx && *b + *span as u64 == block_idx);

  if extends {
    if let Some((_, _, span)) = run {
      *span += 1;
    }
  } else {
    flush_run(ops, run);
    *run = Some((file_idx, block_idx, 1));
  }
}

fn flush_run(ops: &mut Vec<pwr::SyncOp>, run: &mut Run) {
  if let Some((file_idx, block_idx, span)) = run.take() {
    ops.push(pwr::SyncOp {
      r#type: pwr::sync_op::Type::BlockRange as i32,
      file_index: file_idx as i64,
      block_index: block_idx as i64,
      block_span: span,
      data: vec![],
    });
  }
}

/// Emit the literal byte range `start..end` as a `DATA` op, if non-empty,
/// and report those bytes to `tracker` — the only place literal
/// (non-matched) bytes are ever reported as progress, since the
/// byte-by-byte rolling scan that accumulates them doesn't advance the
/// tracker itself (spec §4.2).
fn flush_literal(ops: &mut Vec<pwr::SyncOp>, new_bytes: &[u8], start: usize, end: usize, tracker: &mut ProgressTracker<'_>) {
  if start < end {
    ops.push(pwr::SyncOp {
      r#type: pwr::sync_op::Type::Data as i32,
      file_index: 0,
      block_index: 0,
      block_span: 0,
      data: new_bytes[start..end].to_vec(),
    });
    tracker.advance((end - start) as u64);
  }
}

/// Scan one new file's bytes against `table`, returning the `SyncOp`
/// sequence that reconstructs it (without the terminating `HeyYouDidIt`,
/// which the caller appends).
fn diff_file(new_bytes: &[u8], table: &BlockTable, tracker: &mut ProgressTracker<'_>) -> Vec<pwr::SyncOp> {
  let mut ops = Vec::new();
  let total = new_bytes.len();
  let block_size = BLOCK_SIZE as usize;

  let mut pos = 0usize;
  let mut literal_start = 0usize;
  let mut run: Run = None;

  let mut checksum = (total >= block_size).then(|| RollingChecksum::of(&new_bytes[0..block_size]));

  while pos + block_size <= total {
    let window = &new_bytes[pos..pos + block_size];
    let weak = checksum.as_ref().expect("window in range implies a checksum").digest();

    if let Some((file_idx, block_idx)) = table.find_match(weak, window) {
      // Flush any run that's about to break *before* the literal bytes
      // that precede this match, so the output byte order is
      // run ++ literal ++ (new or extended run), not the reverse.
      extend_or_start_run(&mut ops, &mut run, file_idx, block_idx);
      flush_literal(&mut ops, new_bytes, literal_start, pos, tracker);
      tracker.advance(block_size as u64);

      pos += block_size;
      literal_start = pos;

      if pos + block_size <= total {
        checksum = Some(RollingChecksum::of(&new_bytes[pos..pos + block_size]));
      }
    } else {
      // Roll the window forward by one byte, rsync-style, instead of
      // recomputing it from scratch.
      if pos + block_size < total {
        let leaving = new_bytes[pos];
        let entering = new_bytes[pos + block_size];
        checksum.as_mut().expect("rolled window implies a checksum").roll(leaving, entering);
      }
      pos += 1;
    }
  }

  // Fewer than one full block remains: only a same-length final block of
  // some old file could possibly match it (spec §4.3's trailing-block rule).
  if pos < total {
    let window = &new_bytes[pos..total];
    let weak = RollingChecksum::of(window).digest();

    if let Some((file_idx, block_idx)) = table.find_match(weak, window) {
      extend_or_start_run(&mut ops, &mut run, file_idx, block_idx);
      flush_literal(&mut ops, new_bytes, literal_start, pos, tracker);
      tracker.advance(window.len() as u64);
      literal_start = total;
    }
    // No match: these trailing bytes stay part of the open literal run
    // and are reported to `tracker` once, by the final `flush_literal`
    // below, instead of here as well.
  }

  // The trailing literal must come after any still-open run: a leading
  // unchanged block followed by a changed/grown tail (e.g. a file that
  // grew past its old size) reconstructs as run ++ literal, never the
  // other way around.
  flush_run(&mut ops, &mut run);
  flush_literal(&mut ops, new_bytes, literal_start, total, tracker);

  // Wharf always emits at least one op per file, even an empty `Data`
  // message for a zero-byte file.
  if ops.is_empty() {
    ops.push(pwr::SyncOp {
      r#type: pwr::sync_op::Type::Data as i32,
      file_index: 0,
      block_index: 0,
      block_span: 0,
      data: vec![],
    });
  }

  ops
}

/// Diff `new_pool`'s contents against `old_signature` and write a patch
/// stream to `writer` that reconstructs `new_container` from the old
/// build `old_signature` describes.
///
/// # Errors
///
/// If `old_signature` doesn't have as many blocks as its own container
/// declares, or if reading from `new_pool`/writing to `writer` fails.
pub fn write_patch(
  writer: &mut impl Write,
  new_container: &tlc::Container,
  old_signature: &mut Signature<'_>,
  new_pool: &impl Pool,
  compression: pwr::CompressionSettings,
  consumer: &dyn Consumer,
) -> Result<(), String> {
  let old_container = old_signature.container_new.clone();
  let table = BlockTable::build(old_signature)?;

  let mut body = patch_write::start_patch(writer, compression, &old_container, new_container)?;
  let mut tracker = ProgressTracker::new(consumer, new_container.file_bytes());

  for (file_idx, file) in new_container.files.iter().enumerate() {
    tracker.label(&file.path);

    let mut reader = new_pool
      .get_reader(file_idx)
      .map_err(|e| format!("Couldn't open new file #{file_idx} for reading!\n{e}"))?;

    let mut new_bytes = Vec::with_capacity(file.size.max(0) as usize);
    reader
      .read_to_end(&mut new_bytes)
      .map_err(|e| format!("Couldn't read new file #{file_idx}!\n{e}"))?;

    let ops = diff_file(&new_bytes, &table, &mut tracker);

    patch_write::write_rsync_header(&mut body, file_idx as i64)?;
    for op in &ops {
      patch_write::write_sync_op(&mut body, op)?;
    }
    patch_write::write_rsync_eof(&mut body)?;
  }

  body.finish()
}
