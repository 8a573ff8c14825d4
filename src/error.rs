//! Error taxonomy shared across signature computation, diffing, patch
//! application and rediff.
//!
//! The rest of the crate was written against ad-hoc `String` errors (see
//! the teacher's `container.rs`/`hasher.rs`). Newer modules return this
//! `Error` type instead; the `From<String>` impl lets both styles compose
//! in the same `?`-chain without rewriting the older, still-correct code.

use thiserror::Error;

/// Convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
  /// The patch or signature stream is not well-formed: a bad magic
  /// number, a Protobuf message that didn't decode, or a sync op
  /// sequence that violates the wire format's invariants.
  #[error("malformed stream: {0}")]
  MalformedStream(String),

  /// A target file (on disk, or inside a [`crate::pool::Pool`]) does not
  /// match what the patch or signature expected of it: wrong size, or a
  /// block hash mismatch.
  #[error("corrupt target file #{file} (block {block:?}): {reason}")]
  CorruptTarget {
    file: usize,
    block: Option<u64>,
    reason: String,
  },

  /// Propagated `std::io::Error` from reading/writing the underlying
  /// streams or filesystem.
  #[error("I/O error: {0}")]
  IOError(#[from] std::io::Error),

  /// A long-running operation (computing a signature, diffing, applying
  /// a patch) was cancelled by the caller through its [`crate::consumer::Consumer`].
  #[error("operation was cancelled")]
  CancelledError,

  /// A caller-supplied argument or precondition was invalid: e.g. an
  /// out-of-range file index, or mismatched container sizes.
  #[error("validation error: {0}")]
  ValidationError(String),

  /// An invariant that this crate is responsible for upholding internally
  /// was violated; seeing this means there is a bug in this crate, not in
  /// the caller or the input data.
  #[error("internal invariant violated: {0}")]
  InvariantViolation(String),

  /// `source` occurred while processing file index `file`. The patcher
  /// (`crate::patch::apply`) attaches this to every error it sees so a
  /// caller watching a multi-file operation can tell which file tripped
  /// it, without every leaf error needing to know its own file index.
  #[error("file #{file}: {source}")]
  InFile {
    file: usize,
    #[source]
    source: Box<Error>,
  },
}

impl From<String> for Error {
  fn from(value: String) -> Self {
    Error::MalformedStream(value)
  }
}

impl From<&str> for Error {
  fn from(value: &str) -> Self {
    Error::MalformedStream(value.to_string())
  }
}
