use super::{OVERLAY_BUF_SIZE, OVERLAY_SAME_THRESHOLD};
use crate::common::{MAGIC_OVERLAY, write_magic_bytes};
use crate::error::Result;
use crate::protos::encode_protobuf;
use crate::protos::overlay::{OverlayHeader, OverlayOp};

use std::io::{self, Read, Write};

/// Wraps a plain `Write` sink: the producer writes the literal new bytes
/// of a file to this exactly as it would to any other writer, and an
/// overlay stream (`FRESH`/`SKIP`/`DONE` ops, see `crate::protos::overlay`)
/// comes out the other end instead of the raw bytes, by diffing against
/// `reference` as it goes.
///
/// Mirrors `overlayWriter`/`overlayProcessor` in the original: incoming
/// bytes are buffered up to [`OVERLAY_BUF_SIZE`] before each chunk is
/// compared against an equal-length read from `reference`.
pub struct OverlayWriter<R, W> {
  reference: R,
  sink: W,

  buf: Vec<u8>,
  read_offset: u64,
}

impl<R: Read, W: Write> OverlayWriter<R, W> {
  /// # Errors
  ///
  /// If writing the magic bytes or the (empty) overlay header fails.
  pub fn new(reference: R, mut sink: W) -> Result<Self> {
    write_magic_bytes(&mut sink, MAGIC_OVERLAY)?;
    encode_protobuf(&OverlayHeader {}, &mut sink)?;

    Ok(Self {
      reference,
      sink,
      buf: Vec::with_capacity(OVERLAY_BUF_SIZE),
      read_offset: 0,
    })
  }

  fn fresh(&mut self, data: &[u8]) -> Result<()> {
    if data.is_empty() {
      return Ok(());
    }

    encode_protobuf(
      &OverlayOp::fresh(data.to_vec()),
      &mut self.sink,
    )?;
    self.read_offset += data.len() as u64;
    Ok(())
  }

  fn skip(&mut self, len: usize) -> Result<()> {
    if len == 0 {
      return Ok(());
    }

    encode_protobuf(&OverlayOp::skip(len as i64), &mut self.sink)?;
    self.read_offset += len as u64;
    Ok(())
  }

  /// Compare one buffered chunk against an equal-length window read from
  /// the reference and emit FRESH/SKIP ops for it.
  fn process_chunk(&mut self) -> Result<()> {
    let chunk = std::mem::take(&mut self.buf);

    let mut rbuf = vec![0u8; chunk.len()];
    let rbuflen = read_up_to(&mut self.reference, &mut rbuf)?;
    let rbuf = &rbuf[..rbuflen];

    let mut last_op = 0usize;
    let mut same = 0usize;

    for i in 0..rbuflen {
      if rbuf[i] == chunk[i] {
        same += 1;
      } else {
        if same > OVERLAY_SAME_THRESHOLD {
          self.fresh(&chunk[last_op..i - same])?;
          self.skip(same)?;
          last_op = i;
        }
        same = 0;
      }
    }

    if same > OVERLAY_SAME_THRESHOLD {
      self.fresh(&chunk[last_op..rbuflen - same])?;
      self.skip(same)?;
      last_op = rbuflen;
    }

    if last_op < rbuflen {
      self.fresh(&chunk[last_op..rbuflen])?;
    }

    // Bytes beyond the reference reader's EOF are always fresh.
    if rbuflen < chunk.len() {
      self.fresh(&chunk[rbuflen..])?;
    }

    Ok(())
  }

  /// Flush any buffered bytes and emit the terminating `DONE` op.
  ///
  /// # Errors
  ///
  /// If writing the trailing ops fails.
  pub fn finish(mut self) -> Result<W> {
    if !self.buf.is_empty() {
      self.process_chunk()?;
    }

    encode_protobuf(&OverlayOp::done(), &mut self.sink)?;
    Ok(self.sink)
  }
}

/// Read up to `buf.len()` bytes, treating EOF as non-fatal and returning
/// however many bytes were actually read.
fn read_up_to(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
  let mut total = 0;
  while total < buf.len() {
    match reader.read(&mut buf[total..]) {
      Ok(0) => break,
      Ok(n) => total += n,
      Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
      Err(e) => return Err(e.into()),
    }
  }
  Ok(total)
}

impl<R: Read, W: Write> Write for OverlayWriter<R, W> {
  fn write(&mut self, data: &[u8]) -> io::Result<usize> {
    let mut written = 0;

    while written < data.len() {
      let space = OVERLAY_BUF_SIZE - self.buf.len();
      let take = space.min(data.len() - written);
      self.buf.extend_from_slice(&data[written..written + take]);
      written += take;

      if self.buf.len() == OVERLAY_BUF_SIZE {
        self.process_chunk().map_err(io::Error::other)?;
      }
    }

    Ok(written)
  }

  fn flush(&mut self) -> io::Result<()> {
    if !self.buf.is_empty() {
      self.process_chunk().map_err(io::Error::other)?;
    }
    self.sink.flush()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn run_overlay(reference: &[u8], incoming: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut writer = OverlayWriter::new(reference, &mut out).unwrap();
    writer.write_all(incoming).unwrap();
    writer.finish().unwrap();
    out
  }

  #[test]
  fn identical_buffers_are_one_skip() {
    let data = vec![0xABu8; 64 * 1024];
    let stream = run_overlay(&data, &data);

    let mut reconstructed = Vec::new();
    let target = std::io::Cursor::new(data.clone());
    super::super::apply_overlay(&stream[..], target, &mut reconstructed).unwrap();
    assert_eq!(reconstructed, data);
  }

  #[test]
  fn completely_different_buffers_are_all_fresh() {
    let reference = vec![0u8; 1024];
    let incoming = vec![1u8; 1024];
    let stream = run_overlay(&reference, &incoming);

    let mut reconstructed = Vec::new();
    let target = std::io::Cursor::new(reference);
    super::super::apply_overlay(&stream[..], target, &mut reconstructed).unwrap();
    assert_eq!(reconstructed, incoming);
  }

  #[test]
  fn scattered_patches_round_trip() {
    let mut reference = vec![0u8; 256 * 1024];
    for (i, b) in reference.iter_mut().enumerate() {
      *b = (i % 251) as u8;
    }
    let mut incoming = reference.clone();
    for patch_idx in 0..16 {
      let start = patch_idx * 16 * 1024 + 37;
      for b in &mut incoming[start..start + 64] {
        *b ^= 0xFF;
      }
    }

    let stream = run_overlay(&reference, &incoming);
    let mut reconstructed = Vec::new();
    let target = std::io::Cursor::new(reference);
    super::super::apply_overlay(&stream[..], target, &mut reconstructed).unwrap();
    assert_eq!(reconstructed, incoming);
  }
}
