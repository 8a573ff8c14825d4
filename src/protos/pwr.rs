//! <https://github.com/itchio/wharf/blob/5e5efc838cdbaee7915246d5102af78a3a31e74d/pwr/pwr.proto>
//!
//! Hand-authored (see `protos` module docs): field tags and enum
//! discriminants match the upstream wire layout so patches/signatures
//! produced by this crate stay byte-compatible with upstream wharf tools.

#[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
#[repr(i32)]
pub enum CompressionAlgorithm {
  None = 0,
  Brotli = 1,
  Gzip = 2,
  Zstd = 3,
}

#[derive(Clone, Copy, PartialEq, Eq, ::prost::Message)]
pub struct CompressionSettings {
  #[prost(enumeration = "CompressionAlgorithm", tag = "1")]
  pub algorithm: i32,
  #[prost(int32, tag = "2")]
  pub quality: i32,
}

impl CompressionSettings {
  #[must_use]
  pub fn algorithm(&self) -> CompressionAlgorithm {
    CompressionAlgorithm::try_from(self.algorithm).unwrap_or(CompressionAlgorithm::None)
  }
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PatchHeader {
  #[prost(message, optional, tag = "1")]
  pub compression: Option<CompressionSettings>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SignatureHeader {
  #[prost(message, optional, tag = "1")]
  pub compression: Option<CompressionSettings>,
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct BlockHash {
  #[prost(uint32, tag = "1")]
  pub weak_hash: u32,
  #[prost(bytes, tag = "2")]
  pub strong_hash: Vec<u8>,
  #[prost(bytes, tag = "3")]
  pub short_hash: Vec<u8>,
}

pub mod sync_header {
  #[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
  #[repr(i32)]
  pub enum Type {
    Rsync = 0,
    Bsdiff = 1,
  }
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct SyncHeader {
  #[prost(int64, tag = "1")]
  pub file_index: i64,
  #[prost(enumeration = "sync_header::Type", tag = "2")]
  pub r#type: i32,
}

impl SyncHeader {
  #[must_use]
  pub fn r#type(&self) -> sync_header::Type {
    sync_header::Type::try_from(self.r#type).unwrap_or(sync_header::Type::Rsync)
  }
}

/// Precedes the nested bsdiff stream for a file whose `SyncHeader` is of
/// type `Bsdiff`. `partition_boundaries` is only non-empty when rediff
/// split the target window into multiple independent suffix arrays
/// (spec §4.7); an ordinary bsdiff sync op leaves it empty.
#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct BsdiffHeader {
  #[prost(int64, tag = "1")]
  pub target_index: i64,
  #[prost(int64, repeated, tag = "2")]
  pub partition_boundaries: Vec<i64>,
}

pub mod sync_op {
  #[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
  #[repr(i32)]
  pub enum Type {
    BlockRange = 0,
    Data = 1,
    HeyYouDidIt = 2,
  }
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct SyncOp {
  #[prost(enumeration = "sync_op::Type", tag = "1")]
  pub r#type: i32,
  #[prost(int64, tag = "2")]
  pub file_index: i64,
  #[prost(int64, tag = "3")]
  pub block_index: i64,
  #[prost(int64, tag = "4")]
  pub block_span: i64,
  #[prost(bytes, tag = "5")]
  pub data: Vec<u8>,
}

impl SyncOp {
  #[must_use]
  pub fn r#type(&self) -> sync_op::Type {
    sync_op::Type::try_from(self.r#type).unwrap_or(sync_op::Type::HeyYouDidIt)
  }

  /// The `HeyYouDidIt` sentinel used to terminate a `SyncOp` stream for a file.
  #[must_use]
  pub fn eof() -> Self {
    Self {
      r#type: sync_op::Type::HeyYouDidIt as i32,
      ..Default::default()
    }
  }
}
