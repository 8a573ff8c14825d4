//! Progress and diagnostic reporting, threaded through signature
//! computation, diffing, patch application and rediff.
//!
//! Grounded in `github.com/itchio/headway/state.Consumer`, which every
//! long-running `pwr` operation takes by reference (see `copy.go`'s
//! `CopyContainer`). This crate's callers don't get a C-style callback per
//! concern; they implement one trait and every module drives it the same way.

/// Severity of a message reported through [`Consumer::on_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
  Debug,
  Info,
  Warning,
}

/// Receives progress and diagnostic information from a long-running
/// operation (signature computation, diffing, patch application, rediff).
///
/// All methods have a default no-op implementation; implementors only
/// override what they care about.
pub trait Consumer {
  /// A human-readable diagnostic message.
  fn on_message(&self, _level: Level, _message: &str) {}

  /// Overall completion, in `[0.0, 1.0]`.
  fn on_progress(&self, _fraction: f64) {}

  /// A label describing what's currently being processed, e.g. the path
  /// of the file currently being read or written.
  fn on_progress_label(&self, _label: &str) {}
}

/// A [`Consumer`] that discards everything. The default when the caller
/// doesn't need progress reporting.
#[derive(Debug, Default, Clone, Copy)]
pub struct NopConsumer;

impl Consumer for NopConsumer {}

impl Consumer for () {}

/// Adapts a plain closure over `(Level, &str)` into a [`Consumer`] that
/// only cares about messages, ignoring progress — the common case for a
/// CLI that just wants to print diagnostics as they arrive.
pub struct FnConsumer<F>(pub F)
where
  F: Fn(Level, &str);

impl<F> Consumer for FnConsumer<F>
where
  F: Fn(Level, &str),
{
  fn on_message(&self, level: Level, message: &str) {
    (self.0)(level, message);
  }
}

/// Tracks the running byte offset across a sequence of files of known
/// total size and reports fractional progress to an inner [`Consumer`].
///
/// Grounded in `copy.go`'s `byteOffset`/`alpha` accumulator, generalized
/// so every streaming operation in this crate (copy, diff, patch apply,
/// rediff) can share the same bookkeeping instead of reimplementing it.
pub struct ProgressTracker<'a> {
  consumer: &'a dyn Consumer,
  total_bytes: u64,
  processed_bytes: u64,
}

impl<'a> ProgressTracker<'a> {
  #[must_use]
  pub fn new(consumer: &'a dyn Consumer, total_bytes: u64) -> Self {
    Self {
      consumer,
      total_bytes,
      processed_bytes: 0,
    }
  }

  /// Record `count` additional processed bytes and report the new
  /// fraction of `total_bytes` completed so far.
  pub fn advance(&mut self, count: u64) {
    self.processed_bytes += count;

    let fraction = if self.total_bytes == 0 {
      1.0
    } else {
      self.processed_bytes as f64 / self.total_bytes as f64
    };

    self.consumer.on_progress(fraction);
  }

  pub fn label(&self, label: &str) {
    self.consumer.on_progress_label(label);
  }
}
