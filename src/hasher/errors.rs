use super::MD5_HASH_LENGTH;

use thiserror::Error;

/// Outcome of hashing one block: either it matched the expected hash from
/// the signature, or it didn't. A mismatch is reported through this type
/// rather than [`BlockHasherError`] because it's an expected, recoverable
/// result for callers like [`crate::signature::verify`] — not a bug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockHasherStatus {
  Ok,
  HashMismatch {
    expected: Vec<u8>,
    found: [u8; MD5_HASH_LENGTH],
  },
}

#[derive(Error, Debug)]
pub enum BlockHasherError {
  #[error("Expected block hash from iterator, got EOF!")]
  MissingHashFromIter,

  #[error(
    "The iterator returned an error:
{0}"
  )]
  IterReturnedError(String),

  /// More bytes were hashed than the signature declared blocks for the
  /// current file: the caller's `total_blocks` count and the actual file
  /// contents disagree.
  #[error("More bytes were hashed than the signature declared blocks for!")]
  AllBlocksHashed,
}

impl From<BlockHasherError> for String {
  fn from(value: BlockHasherError) -> Self {
    value.to_string()
  }
}
