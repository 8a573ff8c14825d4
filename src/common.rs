use crate::protos::pwr::CompressionAlgorithm;

use std::io::{BufRead, BufReader, Read, Write};

/// <https://github.com/itchio/wharf/blob/189a01902d172b3297051fab12d5d4db2c620e1d/pwr/constants.go#L14>
pub const MAGIC_PATCH: u32 = 0x0FEF_5F00;

/// <https://github.com/itchio/wharf/blob/189a01902d172b3297051fab12d5d4db2c620e1d/pwr/constants.go#L17>
pub const MAGIC_SIGNATURE: u32 = MAGIC_PATCH + 1;

/// Magic bytes for the single-file overlay stream (spec §6).
pub const MAGIC_OVERLAY: u32 = 0x0FEF_6F00;

/// Block size `B` used to cut every file into fixed-size blocks for
/// signatures and rsync-style patch ops (spec §3). This is a protocol
/// constant, not a per-patch setting: the diff engine and the patcher must
/// agree on it out of band, exactly as upstream wharf hardcodes 64 KiB.
pub const BLOCK_SIZE: u64 = 64 * 1024;

/// Write the 4-byte little-endian magic prefix for a stream.
pub fn write_magic_bytes(writer: &mut impl Write, magic: u32) -> Result<(), String> {
  writer
    .write_all(&magic.to_le_bytes())
    .map_err(|e| format!("Couldn't write magic bytes!\n{e}"))
}

/// Read the next 4 bytes of the reader and return its little endian u32 representation
pub fn read_magic_bytes(reader: &mut impl Read) -> Result<u32, String> {
  let mut magic_bytes = [0u8; 4];
  reader
    .read_exact(&mut magic_bytes)
    .map_err(|e| format!("Couldn't read magic bytes!\n{e}"))?;

  Ok(u32::from_le_bytes(magic_bytes))
}

/// Verify that the next four bytes of the reader match the expected magic number
///
/// # Errors
///
/// If the bytes couldn't be read from the reader or the magic bytes don't match
pub fn check_magic_bytes(reader: &mut impl Read, expected_magic: u32) -> Result<(), String> {
  // Compare the magic numbers
  if read_magic_bytes(reader)? == expected_magic {
    Ok(())
  } else {
    Err("The magic bytes don't match! The binary file is corrupted!".to_string())
  }
}

/// Decompress a stream using the specified decompression algorithm
///
/// # Returns
///
/// The decompressed buffered stream
pub fn decompress_stream(
  reader: &mut impl BufRead,
  algorithm: CompressionAlgorithm,
) -> Result<Box<dyn BufRead + '_>, String> {
  match algorithm {
    CompressionAlgorithm::None => Ok(Box::new(reader)),

    CompressionAlgorithm::Brotli => {
      #[cfg(feature = "brotli")]
      {
        Ok(Box::new(BufReader::new(
          // Set the buffer size to zero to allow Brotli to select the correct size
          brotli::Decompressor::new(reader, 0),
        )))
      }

      #[cfg(not(feature = "brotli"))]
      {
        Err(
          "This binary was built without Brotli support. Recompile with `--features brotli` to be able to decompress the stream".to_string(),
        )
      }
    }

    CompressionAlgorithm::Gzip => {
      #[cfg(feature = "gzip")]
      {
        Ok(Box::new(BufReader::new(flate2::bufread::GzDecoder::new(
          reader,
        ))))
      }

      #[cfg(not(feature = "gzip"))]
      {
        Err(
          "This binary was built without gzip support. Recompile with `--features gzip` to be able to decompress the stream".to_string(),
        )
      }
    }
    CompressionAlgorithm::Zstd => {
      #[cfg(feature = "zstd")]
      {
        Ok(Box::new(BufReader::new(
          zstd::Decoder::with_buffer(reader)
            .map_err(|e| format!("Couldn't create zstd decoder!\n{e}"))?,
        )))
      }

      #[cfg(not(feature = "zstd"))]
      {
        Err(
          "This binary was built without Zstd support. Recompile with `--features zstd` to be able to decompress the stream".to_string(),
        )
      }
    }
  }
}

/// A streaming compressor; `finish` must be called to flush any trailing bytes.
pub trait CompressWriter<'a>: Write + 'a {
  /// Flush and finalize the compressed stream, returning the wrapped writer.
  fn finish(self: Box<Self>) -> Result<(), String>;
}

struct PassThrough<W>(W);

impl<W: Write> Write for PassThrough<W> {
  fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
    self.0.write(buf)
  }

  fn flush(&mut self) -> std::io::Result<()> {
    self.0.flush()
  }
}

impl<'a, W: Write + 'a> CompressWriter<'a> for PassThrough<W> {
  fn finish(self: Box<Self>) -> Result<(), String> {
    Ok(())
  }
}

/// Wrap `writer` in a streaming compressor for `algorithm` and `quality`
///
/// The counterpart of [`decompress_stream`]: applied to the body of
/// patch/signature streams only, per spec §6.
///
/// # Errors
///
/// If the requested algorithm's feature was not compiled in, or the
/// compressor could not be constructed
pub fn compress_stream<'a>(
  writer: &'a mut (dyn Write + 'a),
  algorithm: CompressionAlgorithm,
  quality: i32,
) -> Result<Box<dyn CompressWriter<'a> + 'a>, String> {
  match algorithm {
    CompressionAlgorithm::None => Ok(Box::new(PassThrough(writer))),

    CompressionAlgorithm::Brotli => {
      #[cfg(feature = "brotli")]
      {
        struct BrotliFinish<'a>(Option<brotli::CompressorWriter<&'a mut (dyn Write + 'a)>>);

        impl<'a> Write for BrotliFinish<'a> {
          fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.as_mut().unwrap().write(buf)
          }

          fn flush(&mut self) -> std::io::Result<()> {
            self.0.as_mut().unwrap().flush()
          }
        }

        impl<'a> CompressWriter<'a> for BrotliFinish<'a> {
          fn finish(mut self: Box<Self>) -> Result<(), String> {
            self
              .0
              .take()
              .unwrap()
              .flush()
              .map_err(|e| format!("Couldn't flush Brotli compressor!\n{e}"))
          }
        }

        let quality = quality.clamp(0, 11) as u32;
        Ok(Box::new(BrotliFinish(Some(brotli::CompressorWriter::new(
          writer, 4096, quality, 22,
        )))))
      }

      #[cfg(not(feature = "brotli"))]
      {
        Err(
          "This binary was built without Brotli support. Recompile with `--features brotli` to be able to compress the stream".to_string(),
        )
      }
    }

    CompressionAlgorithm::Gzip => {
      #[cfg(feature = "gzip")]
      {
        struct GzFinish<'a>(Option<flate2::write::GzEncoder<&'a mut (dyn Write + 'a)>>);

        impl<'a> Write for GzFinish<'a> {
          fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.as_mut().unwrap().write(buf)
          }

          fn flush(&mut self) -> std::io::Result<()> {
            self.0.as_mut().unwrap().flush()
          }
        }

        impl<'a> CompressWriter<'a> for GzFinish<'a> {
          fn finish(mut self: Box<Self>) -> Result<(), String> {
            self
              .0
              .take()
              .unwrap()
              .finish()
              .map(|_| ())
              .map_err(|e| format!("Couldn't finish gzip compressor!\n{e}"))
          }
        }

        let level = flate2::Compression::new(quality.clamp(0, 9) as u32);
        Ok(Box::new(GzFinish(Some(flate2::write::GzEncoder::new(
          writer, level,
        )))))
      }

      #[cfg(not(feature = "gzip"))]
      {
        Err(
          "This binary was built without gzip support. Recompile with `--features gzip` to be able to compress the stream".to_string(),
        )
      }
    }

    CompressionAlgorithm::Zstd => {
      #[cfg(feature = "zstd")]
      {
        struct ZstdFinish<'a>(Option<zstd::Encoder<'a, &'a mut (dyn Write + 'a)>>);

        impl<'a> Write for ZstdFinish<'a> {
          fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.as_mut().unwrap().write(buf)
          }

          fn flush(&mut self) -> std::io::Result<()> {
            self.0.as_mut().unwrap().flush()
          }
        }

        impl<'a> CompressWriter<'a> for ZstdFinish<'a> {
          fn finish(mut self: Box<Self>) -> Result<(), String> {
            self
              .0
              .take()
              .unwrap()
              .finish()
              .map(|_| ())
              .map_err(|e| format!("Couldn't finish zstd compressor!\n{e}"))
          }
        }

        let encoder = zstd::Encoder::new(writer, quality)
          .map_err(|e| format!("Couldn't create zstd encoder!\n{e}"))?;
        Ok(Box::new(ZstdFinish(Some(encoder))))
      }

      #[cfg(not(feature = "zstd"))]
      {
        Err(
          "This binary was built without Zstd support. Recompile with `--features zstd` to be able to compress the stream".to_string(),
        )
      }
    }
  }
}
