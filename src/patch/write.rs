//! Writing a wharf patch stream — the write-side counterpart of
//! `crate::patch::read`. Used directly by the diff engine (`crate::diff`)
//! and by rediff (`crate::rediff`) when re-encoding a file's sync section
//! from rsync ops into bsdiff ops.

use crate::common::{CompressWriter, MAGIC_PATCH, compress_stream, write_magic_bytes};
use crate::protos::{bsdiff, encode_protobuf, pwr, tlc};

use std::io::Write;

/// Write the patch magic, header and (optionally compressed) container
/// pair. Returns a writer for the sync op section that every file's
/// header/ops/eof are written through; call `finish()` on it once every
/// file has been written.
///
/// # Errors
///
/// If encoding the header/containers or constructing the compressor fails.
pub fn start_patch<'w>(
  writer: &'w mut (dyn Write + 'w),
  compression: pwr::CompressionSettings,
  container_old: &tlc::Container,
  container_new: &tlc::Container,
) -> Result<Box<dyn CompressWriter<'w> + 'w>, String> {
  write_magic_bytes(writer, MAGIC_PATCH)?;
  encode_protobuf(
    &pwr::PatchHeader {
      compression: Some(compression),
    },
    writer,
  )?;

  let mut body = compress_stream(writer, compression.algorithm(), compression.quality)?;
  encode_protobuf(container_old, &mut body)?;
  encode_protobuf(container_new, &mut body)?;

  Ok(body)
}

/// Begin a file's sync section with a plain rsync `SyncHeader`.
pub fn write_rsync_header(writer: &mut impl Write, file_index: i64) -> Result<(), String> {
  encode_protobuf(
    &pwr::SyncHeader {
      file_index,
      r#type: pwr::sync_header::Type::Rsync as i32,
    },
    writer,
  )
}

/// Begin a file's sync section with a `SyncHeader` of type `Bsdiff`,
/// followed by its `BsdiffHeader`. `partition_boundaries` is only
/// non-empty when rediff split the target window (spec §4.7).
pub fn write_bsdiff_header(
  writer: &mut impl Write,
  file_index: i64,
  target_index: i64,
  partition_boundaries: Vec<i64>,
) -> Result<(), String> {
  encode_protobuf(
    &pwr::SyncHeader {
      file_index,
      r#type: pwr::sync_header::Type::Bsdiff as i32,
    },
    writer,
  )?;

  encode_protobuf(
    &pwr::BsdiffHeader {
      target_index,
      partition_boundaries,
    },
    writer,
  )
}

/// Write one rsync `SyncOp`. The caller must call [`write_rsync_eof`]
/// once every op for this file has been written.
pub fn write_sync_op(writer: &mut impl Write, op: &pwr::SyncOp) -> Result<(), String> {
  encode_protobuf(op, writer)
}

/// Terminate a rsync sync section with the `HeyYouDidIt` sentinel.
pub fn write_rsync_eof(writer: &mut impl Write) -> Result<(), String> {
  encode_protobuf(&pwr::SyncOp::eof(), writer)
}

/// Write one bsdiff `Control` triple.
pub fn write_control(writer: &mut impl Write, control: &bsdiff::Control) -> Result<(), String> {
  encode_protobuf(control, writer)
}

/// Terminate a bsdiff sync section: a terminating `Control{eof: true}`
/// followed by the `SyncOp::eof()` sentinel that `BsdiffOpIter` expects
/// right after it (see `crate::patch::read`).
pub fn write_bsdiff_eof(writer: &mut impl Write) -> Result<(), String> {
  encode_protobuf(&bsdiff::Control::terminator(), writer)?;
  encode_protobuf(&pwr::SyncOp::eof(), writer)
}

/// Convenience one-shot writer for a whole rsync-only patch: one
/// `SyncHeader`/`SyncOp` list pair per file, in order. Used by tests and
/// by [`crate::diff`] once it has collected every file's ops.
///
/// # Errors
///
/// If encoding or writing any part of the stream fails.
pub fn write_patch(
  writer: &mut impl Write,
  compression: pwr::CompressionSettings,
  container_old: &tlc::Container,
  container_new: &tlc::Container,
  headers: Vec<pwr::SyncHeader>,
  ops: Vec<Vec<pwr::SyncOp>>,
) -> Result<(), String> {
  let mut body = start_patch(writer, compression, container_old, container_new)?;

  for (header, file_ops) in headers.into_iter().zip(ops) {
    encode_protobuf(&header, &mut body)?;

    for op in &file_ops {
      write_sync_op(&mut body, op)?;
    }

    write_rsync_eof(&mut body)?;
  }

  body.finish()
}
