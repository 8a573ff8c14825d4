/// Destinations that a patch or a container can be written into
pub mod bowl;
/// Suffix-array-based byte-diff generation used for single-file rediffing
pub mod bsdiff;
/// Container metadata (files, directories, symlinks) and on-disk access to them
pub mod container;
/// Reporting progress and diagnostics back to the caller
pub mod consumer;
/// Scanning a new build against an old build's signature to produce a patch
pub mod diff;
/// The top-level error type returned by this crate
pub mod error;
/// Incremental block hashing shared by signature computation and patch application
pub mod hasher;
/// Identify an arbitrary wharf binary stream
pub mod info;
/// Single-file streaming delta encoder/decoder used for in-place overlay patches
pub mod overlay;
/// Funcions and structures for reading and writing wharf patches
pub mod patch;
/// Sources and destinations of the byte streams a container's files live in
pub mod pool;
/// Rewriting a rsync-style patch's rsync data into bsdiff operations after the fact
pub mod rediff;
/// The rolling checksum used by the diff engine
pub mod rolling;
/// Funcions and structures for reading and writing wharf signatures
pub mod signature;

mod common;
/// Wire message types (`tlc`, `pwr`, `bsdiff`, `overlay`) — every public
/// function that builds or consumes a container, header or sync op names
/// one of these, so the module has to be reachable from outside the crate.
pub mod protos;

pub use common::BLOCK_SIZE;
pub use consumer::Consumer;
pub use error::{Error, Result};
pub use patch::Patch;
pub use protos::tlc;
pub use signature::Signature;
