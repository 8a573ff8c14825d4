//! `PoolBowl`: delegate patch output to an injected [`WritablePool`]
//! (spec §4.5.3) instead of a concrete directory — used when the
//! destination isn't a plain filesystem tree (an archive writer, an
//! in-memory pool for tests, a network-backed store).

use crate::bowl::Bowl;
use crate::error::Result;
use crate::pool::{Pool, WritablePool};

use std::io;

/// Thin adapter: every operation forwards straight to the pool. There's
/// no staging directory and no commit-time reordering, since whatever
/// atomicity guarantees exist are the pool's to provide.
pub struct PoolBowl<'p, P> {
  target_pool: &'p P,
  new_pool: &'p P,
}

impl<'p, P: Pool + WritablePool> PoolBowl<'p, P> {
  #[must_use]
  pub fn new(target_pool: &'p P, new_pool: &'p P) -> Self {
    Self {
      target_pool,
      new_pool,
    }
  }
}

impl<'p, P: Pool + WritablePool> Bowl for PoolBowl<'p, P> {
  type Writer<'a>
    = P::Writer<'a>
  where
    Self: 'a;

  fn get_writer(&mut self, file_idx: usize) -> Result<Self::Writer<'_>> {
    self.new_pool.get_writer(file_idx)
  }

  fn transpose(&mut self, source_file_idx: usize, target_file_idx: usize) -> Result<()> {
    let mut reader = self.target_pool.get_reader(target_file_idx)?;
    let mut writer = self.new_pool.get_writer(source_file_idx)?;
    io::copy(&mut reader, &mut writer)?;
    Ok(())
  }

  fn commit(self) -> Result<()> {
    Ok(())
  }
}
