//! Computing a signature stream for a container (spec §4.2) — the write
//! side of `crate::signature::read`, which the teacher never implements
//! (it only ever reads and verifies signatures produced elsewhere). The
//! per-file, per-block loop shape mirrors
//! `crate::signature::verify::check_file_integrity`'s read loop, swapping
//! "compare against an expected hash" for "emit the hash computed here".

use crate::common::{BLOCK_SIZE, MAGIC_SIGNATURE, compress_stream, write_magic_bytes};
use crate::consumer::{Consumer, ProgressTracker};
use crate::pool::Pool;
use crate::protos::{encode_protobuf, pwr, tlc};
use crate::rolling::RollingChecksum;

use md5::{Digest, Md5};
use std::io::{Read, Write};

/// Leading bytes of the strong hash kept as the `short_hash` fingerprint
/// (spec §4.2's "further truncation"): cheap to compare before paying
/// for a full strong-hash match during diffing.
const SHORT_HASH_LEN: usize = 4;

/// Compute a signature stream for every file in `container`, reading
/// file bytes through `pool`, and write it (magic, header, compressed
/// container + block hashes) to `writer`.
///
/// # Errors
///
/// If reading a file from `pool` or writing to `writer` fails.
pub fn compute_signature(
  writer: &mut impl Write,
  container: &tlc::Container,
  pool: &impl Pool,
  compression: pwr::CompressionSettings,
  consumer: &dyn Consumer,
) -> Result<(), String> {
  write_magic_bytes(writer, MAGIC_SIGNATURE)?;
  encode_protobuf(
    &pwr::SignatureHeader {
      compression: Some(compression),
    },
    writer,
  )?;

  let mut body = compress_stream(writer, compression.algorithm(), compression.quality)?;
  encode_protobuf(container, &mut body)?;

  let mut tracker = ProgressTracker::new(consumer, container.file_bytes());
  let mut block_buf = vec![0u8; BLOCK_SIZE as usize];
  let mut hasher = Md5::new();

  for (file_index, file) in container.files.iter().enumerate() {
    tracker.label(&file.path);

    let mut reader = pool
      .get_reader(file_index)
      .map_err(|e| format!("Couldn't open file #{file_index} for reading!\n{e}"))?;

    let block_count = file.block_count();
    let mut remaining = file.size as u64;

    for block_index in 0..block_count {
      let to_read = BLOCK_SIZE.min(remaining) as usize;
      let buf = &mut block_buf[..to_read];

      if to_read > 0 {
        reader.read_exact(buf).map_err(|e| {
          format!("Couldn't read file #{file_index} block {block_index} into buffer!\n{e}")
        })?;
      }

      let weak_hash = RollingChecksum::of(buf).digest();

      hasher.update(&*buf);
      let strong_hash = hasher.finalize_reset().to_vec();
      let short_hash = strong_hash[..SHORT_HASH_LEN.min(strong_hash.len())].to_vec();

      encode_protobuf(
        &pwr::BlockHash {
          weak_hash,
          strong_hash,
          short_hash,
        },
        &mut body,
      )?;

      tracker.advance(to_read as u64);
      remaining -= to_read as u64;
    }
  }

  body.finish()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::consumer::NopConsumer;
  use crate::pool::MemPool;
  use crate::protos::tlc;
  use crate::signature::Signature;

  #[test]
  fn round_trips_through_read() {
    let container = tlc::Container {
      size: 3,
      dirs: vec![],
      symlinks: vec![],
      files: vec![tlc::File {
        path: "hello.txt".to_string(),
        mode: 0o644,
        size: 3,
      }],
    };

    let pool = MemPool::with_contents(vec![b"abc".to_vec()]);

    let mut bytes = Vec::new();
    compute_signature(
      &mut bytes,
      &container,
      &pool,
      pwr::CompressionSettings {
        algorithm: pwr::CompressionAlgorithm::None as i32,
        quality: 0,
      },
      &NopConsumer,
    )
    .unwrap();

    let mut reader = std::io::BufReader::new(bytes.as_slice());
    let mut signature = Signature::read(&mut reader).unwrap();

    assert_eq!(signature.container_new, container);
    assert_eq!(signature.block_hash_iter.total_blocks(), 1);

    let hash = signature.block_hash_iter.next().unwrap().unwrap();
    assert_eq!(hash.weak_hash, RollingChecksum::of(b"abc").digest());
    assert_eq!(hash.strong_hash.len(), 16);
    assert_eq!(hash.short_hash.as_slice(), &hash.strong_hash[..4]);
  }

  #[test]
  fn empty_file_still_gets_one_hash() {
    let container = tlc::Container {
      size: 0,
      dirs: vec![],
      symlinks: vec![],
      files: vec![tlc::File {
        path: "empty.bin".to_string(),
        mode: 0o644,
        size: 0,
      }],
    };

    let pool = MemPool::with_contents(vec![Vec::new()]);

    let mut bytes = Vec::new();
    compute_signature(
      &mut bytes,
      &container,
      &pool,
      pwr::CompressionSettings {
        algorithm: pwr::CompressionAlgorithm::None as i32,
        quality: 0,
      },
      &NopConsumer,
    )
    .unwrap();

    let mut reader = std::io::BufReader::new(bytes.as_slice());
    let signature = Signature::read(&mut reader).unwrap();
    assert_eq!(signature.block_hash_iter.total_blocks(), 1);
  }
}
