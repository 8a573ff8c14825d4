//! Wire messages for the overlay stream (spec §4.6, §6).
//!
//! Grounded in `original_source/pwr/overlay/overlay_writer.go`'s
//! `OverlayHeader`/`OverlayOp` messages.

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct OverlayHeader {}

pub mod overlay_op {
  #[derive(Clone, Copy, Debug, PartialEq, Eq, ::prost::Enumeration)]
  #[repr(i32)]
  pub enum Type {
    Fresh = 0,
    Skip = 1,
    HeyYouDidIt = 2,
  }
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct OverlayOp {
  #[prost(enumeration = "overlay_op::Type", tag = "1")]
  pub r#type: i32,
  #[prost(bytes, tag = "2")]
  pub data: Vec<u8>,
  #[prost(int64, tag = "3")]
  pub len: i64,
}

impl OverlayOp {
  #[must_use]
  pub fn r#type(&self) -> overlay_op::Type {
    overlay_op::Type::try_from(self.r#type).unwrap_or(overlay_op::Type::HeyYouDidIt)
  }

  #[must_use]
  pub fn fresh(data: Vec<u8>) -> Self {
    Self {
      r#type: overlay_op::Type::Fresh as i32,
      data,
      len: 0,
    }
  }

  #[must_use]
  pub fn skip(len: i64) -> Self {
    Self {
      r#type: overlay_op::Type::Skip as i32,
      data: Vec::new(),
      len,
    }
  }

  #[must_use]
  pub fn done() -> Self {
    Self {
      r#type: overlay_op::Type::HeyYouDidIt as i32,
      data: Vec::new(),
      len: 0,
    }
  }
}
