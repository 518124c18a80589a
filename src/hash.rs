//! 160-bit ring hashes.
//!
//! Partitioners map an input to a point on the consistent-hash ring. The ring
//! keyspace is 160 bits wide; [`RingHash::of`] derives a point from arbitrary
//! bytes, and partition ownership is computed from the hash position.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Width of a ring hash in bytes.
pub const RING_HASH_BYTES: usize = 20;

/// A point on the 160-bit consistent-hash ring.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct RingHash([u8; RING_HASH_BYTES]);

impl RingHash {
  /// The zero point of the ring.
  pub const ZERO: RingHash = RingHash([0; RING_HASH_BYTES]);

  /// Creates a hash from raw ring-position bytes.
  #[must_use]
  pub const fn from_bytes(bytes: [u8; RING_HASH_BYTES]) -> Self {
    Self(bytes)
  }

  /// Hashes arbitrary bytes onto the ring (SHA-256 truncated to 160 bits).
  #[must_use]
  pub fn of(data: &[u8]) -> Self {
    let digest = Sha256::digest(data);
    let mut bytes = [0u8; RING_HASH_BYTES];
    bytes.copy_from_slice(&digest[..RING_HASH_BYTES]);
    Self(bytes)
  }

  /// Returns the raw ring-position bytes.
  #[must_use]
  pub const fn as_bytes(&self) -> &[u8; RING_HASH_BYTES] {
    &self.0
  }

  /// Projects the hash onto a `u64` position, preserving ring order.
  ///
  /// The high 64 bits are enough to spread points across partitions; the
  /// remaining bits only matter for keyspaces with more than 2^64 partitions.
  #[must_use]
  pub fn position(&self) -> u64 {
    let mut high = [0u8; 8];
    high.copy_from_slice(&self.0[..8]);
    u64::from_be_bytes(high)
  }
}

impl fmt::Debug for RingHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "RingHash(")?;
    for byte in &self.0[..4] {
      write!(f, "{:02x}", byte)?;
    }
    write!(f, "..)")
  }
}

impl fmt::Display for RingHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for byte in &self.0 {
      write!(f, "{:02x}", byte)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_hash_is_deterministic() {
    assert_eq!(RingHash::of(b"alpha"), RingHash::of(b"alpha"));
    assert_ne!(RingHash::of(b"alpha"), RingHash::of(b"beta"));
  }

  #[test]
  fn test_position_preserves_high_bytes() {
    let mut bytes = [0u8; RING_HASH_BYTES];
    bytes[0] = 0x80;
    let hash = RingHash::from_bytes(bytes);
    assert_eq!(hash.position(), 0x8000_0000_0000_0000);
    assert_eq!(RingHash::ZERO.position(), 0);
  }
}
