//! Output strategies for patch application (spec §4.5).
//!
//! The patcher (`crate::patch::apply`) only ever writes the literal
//! reconstructed bytes of a file to `Bowl::get_writer(file_idx)` — it has
//! no idea whether those bytes land in a fresh directory, get diffed
//! in-place against an existing install via the overlay writer, or go
//! into an arbitrary [`crate::pool::WritablePool`]. That choice, and
//! everything about finalizing it, belongs entirely to the `Bowl` impl.

pub mod fresh;
pub mod overlay;
pub mod pool;

pub use fresh::FreshBowl;
pub use overlay::OverlayBowl;
pub use pool::PoolBowl;

use crate::error::Result;

use std::io::Write;

/// The output strategy a patcher writes reconstructed file bytes into.
///
/// `get_writer`/`transpose` are called once per file, in ascending
/// `file_idx` order (spec §5's ordering guarantee), as the patch stream
/// is consumed; `commit` runs once at the very end.
pub trait Bowl {
  type Writer<'a>: Write + 'a
  where
    Self: 'a;

  /// Open a writer for the new contents of `file_idx`. Bytes are
  /// appended in order starting from offset 0; the writer is never
  /// reopened for the same file within one patch application.
  ///
  /// # Errors
  ///
  /// If the underlying sink (file, stage entry, pool slot) can't be
  /// opened for writing.
  fn get_writer(&mut self, file_idx: usize) -> Result<Self::Writer<'_>>;

  /// Declare that the new file at `source_file_idx` is byte-for-byte
  /// identical to the existing file at `target_file_idx` — the whole-file
  /// match fast path emitted by the patcher instead of a `BLOCK_RANGE`
  /// covering the entire file.
  ///
  /// # Errors
  ///
  /// If either index is out of range, or the underlying copy fails.
  fn transpose(&mut self, source_file_idx: usize, target_file_idx: usize) -> Result<()>;

  /// Finalize a writer obtained from [`Bowl::get_writer`]. The default
  /// just drops it. Bowls whose writer needs a closing write of its own —
  /// the overlay writer's terminating `DONE` op — override this instead
  /// of relying on `Drop`, since `Drop` can't report an error.
  ///
  /// # Errors
  ///
  /// If the writer's own finalization fails.
  fn close_writer(&mut self, _file_idx: usize, writer: Self::Writer<'_>) -> Result<()> {
    drop(writer);
    Ok(())
  }

  /// Finalize the output tree. Must be atomic with respect to external
  /// observers to the extent the underlying storage allows (see
  /// [`OverlayBowl::commit`] for the in-place case).
  ///
  /// # Errors
  ///
  /// If finalizing the output (renames, overlay application, deletes)
  /// fails partway; see spec §5 for what state is guaranteed on error.
  fn commit(self) -> Result<()>;
}
