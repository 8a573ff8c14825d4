use crate::patch::BsdiffOpIter;

use std::io::{Read, Seek, Write};

/// Read a block from `src`, add corresponding bytes from `add`, and write the result to `dst`
fn add_bytes(
  src: &mut impl Read,
  dst: &mut impl Write,
  add: &[u8],
  add_buffer: &mut [u8],
) -> Result<(), String> {
  assert_eq!(add.len(), add_buffer.len());

  src
    .read_exact(add_buffer)
    .map_err(|e| format!("Couldn't read data from old file into buffer!\n{e}"))?;

  for i in 0..add.len() {
    add_buffer[i] = add_buffer[i].wrapping_add(add[i]);
  }

  dst
    .write_all(add_buffer)
    .map_err(|e| format!("Couldn't save buffer data into new file!\n{e}"))
}

/// Apply all `op_iter` bsdiff operations to regenerate the new file
/// into `writer`, reading target bytes from `old_file`.
///
/// `old_file` must already be rewound to the start; the partition
/// boundaries rediff may have recorded in the preceding `BsdiffHeader`
/// are a generation-time detail (see `crate::rediff`) and play no part
/// in application: the concatenated triples read from a single
/// contiguous target window regardless of how many suffix arrays
/// produced them.
pub fn apply_bsdiff(
  op_iter: &mut BsdiffOpIter<impl Read>,
  writer: &mut impl Write,
  old_file: &mut (impl Read + Seek),
  add_buffer: &mut Vec<u8>,
  progress_callback: &mut impl FnMut(u64),
) -> Result<(), String> {
  for control in op_iter {
    let control = control?;

    if !control.add.is_empty() {
      add_buffer.resize(control.add.len(), 0);

      add_bytes(old_file, writer, &control.add, add_buffer)?;

      progress_callback(control.add.len() as u64);
    }

    if !control.copy.is_empty() {
      writer
        .write_all(&control.copy)
        .map_err(|e| format!("Couldn't copy data from patch to new file!\n{e}"))?;

      progress_callback(control.copy.len() as u64);
    }

    if control.seek != 0 {
      old_file.seek_relative(control.seek).map_err(|e| {
        format!(
          "Couldn't seek into old file at relative pos: {}\n{e}",
          control.seek
        )
      })?;
    }
  }

  Ok(())
}
