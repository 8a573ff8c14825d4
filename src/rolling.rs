//! Rolling weak checksum used by the diff engine to scan a source file for
//! blocks that already exist, byte-for-byte, somewhere in the target.
//!
//! This is the Adler-32-style two-sum checksum rsync itself uses: cheap to
//! update by one byte in O(1) without rereading the whole window, which is
//! what makes the diff engine's byte-at-a-time scan in
//! [`crate::patch::write`] tractable.

const MOD_ADLER: u32 = 65521;

/// A checksum over a sliding window of bytes that can be rolled forward
/// one byte at a time in O(1), instead of recomputed from scratch.
#[derive(Debug, Clone, Copy, Default)]
pub struct RollingChecksum {
  a: u32,
  b: u32,
  window_len: u32,
}

impl RollingChecksum {
  #[must_use]
  pub fn new() -> Self {
    Self {
      a: 1,
      b: 0,
      window_len: 0,
    }
  }

  /// Compute the checksum of `window` from scratch.
  #[must_use]
  pub fn of(window: &[u8]) -> Self {
    let mut checksum = Self::new();
    for &byte in window {
      checksum.push(byte);
    }
    checksum
  }

  /// Extend the window by one byte at its end.
  fn push(&mut self, byte: u8) {
    self.a = (self.a + u32::from(byte)) % MOD_ADLER;
    self.b = (self.b + self.a) % MOD_ADLER;
    self.window_len += 1;
  }

  /// Slide the window forward by one byte: `leaving` exits from the
  /// front, `entering` enters at the back. The window length is
  /// unchanged; both bytes must belong to windows of the same length.
  pub fn roll(&mut self, leaving: u8, entering: u8) {
    let n = self.window_len;

    self.a = (self.a + MOD_ADLER - u32::from(leaving)) % MOD_ADLER;
    self.a = (self.a + u32::from(entering)) % MOD_ADLER;

    // b -= n * leaving + 1  (mod MOD_ADLER), then += a
    let leaving_term = (n % MOD_ADLER) * u32::from(leaving) % MOD_ADLER;
    self.b = (self.b + MOD_ADLER - leaving_term + MOD_ADLER - 1) % MOD_ADLER;
    self.b = (self.b + self.a) % MOD_ADLER;
  }

  /// The current 32-bit digest: `b << 16 | a`, as rsync itself packs it.
  #[must_use]
  pub fn digest(&self) -> u32 {
    (self.b << 16) | self.a
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rolling_matches_recompute() {
    let data = b"the quick brown fox jumps over the lazy dog, over and over";
    let window = 8usize;

    let mut rolling = RollingChecksum::of(&data[0..window]);
    assert_eq!(rolling.digest(), RollingChecksum::of(&data[0..window]).digest());

    for start in 1..=(data.len() - window) {
      rolling.roll(data[start - 1], data[start + window - 1]);
      let expected = RollingChecksum::of(&data[start..start + window]);
      assert_eq!(rolling.digest(), expected.digest(), "mismatch at start={start}");
    }
  }

  #[test]
  fn empty_window_is_stable() {
    let checksum = RollingChecksum::new();
    assert_eq!(checksum.digest(), RollingChecksum::of(&[]).digest());
  }
}
