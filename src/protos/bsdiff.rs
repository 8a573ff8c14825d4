//! <https://github.com/itchio/wharf/blob/5e5efc838cdbaee7915246d5102af78a3a31e74d/bsdiff/bsdiff.proto>
//!
//! Hand-authored (see `protos` module docs).

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Control {
  #[prost(bytes, tag = "1")]
  pub add: Vec<u8>,
  #[prost(bytes, tag = "2")]
  pub copy: Vec<u8>,
  #[prost(int64, tag = "3")]
  pub seek: i64,
  #[prost(bool, tag = "4")]
  pub eof: bool,
}

impl Control {
  #[must_use]
  pub fn terminator() -> Self {
    Self {
      eof: true,
      ..Default::default()
    }
  }
}
