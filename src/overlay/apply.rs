use super::OVERLAY_BUF_SIZE;
use crate::common::{MAGIC_OVERLAY, check_magic_bytes};
use crate::error::Result;
use crate::protos::decode_protobuf;
use crate::protos::overlay::{OverlayHeader, OverlayOp, overlay_op};

use std::fs;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Decode an overlay stream, reconstructing the patched bytes from a
/// separate `reference` reader (the unpatched contents) into `output`.
///
/// This is the two-sink form used by tests and by anything that doesn't
/// patch a file in place; [`apply_in_place`] is what [`crate::bowl::OverlayBowl`]
/// actually uses during commit.
///
/// # Errors
///
/// If the stream is malformed, or reading `reference`/writing `output` fails.
pub fn apply_overlay(
  mut stream: impl Read,
  mut reference: impl Read,
  mut output: impl Write,
) -> Result<()> {
  check_magic_bytes(&mut stream, MAGIC_OVERLAY)?;
  let _header = decode_protobuf::<OverlayHeader>(&mut stream)?;

  loop {
    let op = decode_protobuf::<OverlayOp>(&mut stream)?;

    match op.r#type() {
      overlay_op::Type::Fresh => {
        // These reference bytes diverged from the new contents; discard
        // them and write the literal replacement instead.
        io::copy(&mut (&mut reference).take(op.data.len() as u64), &mut io::sink())?;
        output.write_all(&op.data)?;
      }
      overlay_op::Type::Skip => {
        io::copy(&mut (&mut reference).take(op.len as u64), &mut output)?;
      }
      overlay_op::Type::HeyYouDidIt => break,
    }
  }

  Ok(())
}

/// Apply an overlay stream to `target` in place: `FRESH` overwrites at
/// the current position, `SKIP` leaves the existing bytes alone, and
/// `DONE` truncates the file to its final size (spec §4.5.2 commit step 2).
///
/// Grounded in the observation (from `overlay_writer.go`'s `fresh`/`skip`)
/// that the reference-read cursor and the output-write cursor always
/// advance by the same amount in lockstep — so applying in place only
/// needs one cursor into the same file, not two.
///
/// # Errors
///
/// If the stream is malformed, or reading/writing/truncating `target` fails.
pub fn apply_in_place(mut stream: impl Read, target: &mut fs::File) -> Result<()> {
  check_magic_bytes(&mut stream, MAGIC_OVERLAY)?;
  let _header = decode_protobuf::<OverlayHeader>(&mut stream)?;

  let mut pos: u64 = 0;

  loop {
    let op = decode_protobuf::<OverlayOp>(&mut stream)?;

    match op.r#type() {
      overlay_op::Type::Fresh => {
        target.seek(SeekFrom::Start(pos))?;
        target.write_all(&op.data)?;
        pos += op.data.len() as u64;
      }
      overlay_op::Type::Skip => {
        pos += op.len as u64;
      }
      overlay_op::Type::HeyYouDidIt => break,
    }
  }

  target.set_len(pos)?;
  Ok(())
}

/// Upper bound on how large an overlay stream for a `total_len`-byte file
/// could plausibly be when almost nothing changed: a handful of ops plus
/// one `SKIP` covering the whole file, well under one [`OVERLAY_BUF_SIZE`]
/// chunk of overhead. Used by tests asserting spec §8 invariant 4.
#[must_use]
pub fn null_overlay_upper_bound() -> usize {
  OVERLAY_BUF_SIZE
}
