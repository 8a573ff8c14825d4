//! Single-file streaming delta encoder/decoder (spec §4.6).
//!
//! Grounded byte-for-byte in `original_source/pwr/overlay/overlay_writer.go`:
//! an `OverlayWriter` compares an incoming write stream against a reference
//! reader in 128 KiB chunks and emits `FRESH`/`SKIP` ops instead of the raw
//! bytes wherever a long enough run is unchanged. [`crate::bowl::OverlayBowl`]
//! uses it to patch an existing installation in place without ever holding
//! the whole new file in memory.

pub mod apply;
pub mod writer;

pub use apply::apply_overlay;
pub use writer::OverlayWriter;

/// Internal comparison chunk size (spec §4.6, §9): large enough that the
/// SAME-threshold scan can see past small unchanged regions, small enough
/// to bound memory use.
pub const OVERLAY_BUF_SIZE: usize = 128 * 1024;

/// Minimum run of matching bytes worth encoding as a `SKIP` instead of
/// just extending the preceding/following `FRESH` run (spec §4.6).
pub const OVERLAY_SAME_THRESHOLD: usize = 8 * 1024;
