//! The engine's CSPRNG.
//!
//! A 32-byte entropy pool drives the generator. `reseed` folds new bytes
//! into the pool by replacing it with `SHA3-256(new-entropy || pool)`, so
//! opaque host events (UI messages, timings) can be mixed in at any time
//! without ever weakening the pool. Output is the ChaCha20 keystream
//! keyed by the pool, under a nonce that increments once per extraction —
//! the keystream never repeats and the pool itself never leaves the
//! generator.
//!
//! At construction the pool is seeded from the wall clock (seconds and
//! sub-second nanos) and two independent OS entropy reads. The pool and
//! nonce are scrubbed on drop.

use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use sha3::{Digest, Sha3_256};
use zeroize::{Zeroize, Zeroizing};

use crate::cipher::ChaCha20;

/// Size of the entropy pool in bytes.
pub const POOL_BYTES: usize = 32;

/// Cryptographically secure pseudo-random number generator.
pub struct EntropyPool {
  pool: [u8; POOL_BYTES],
  nonce: u64,
}

impl EntropyPool {
  /// Creates a generator seeded from the OS and the clock.
  pub fn new_seeded() -> Self {
    let mut rng = EntropyPool {
      pool: [0u8; POOL_BYTES],
      nonce: 0,
    };

    let now = Utc::now();
    rng.reseed(&now.timestamp().to_le_bytes());
    rng.reseed(&now.timestamp_subsec_nanos().to_le_bytes());

    let mut os_entropy = [0u8; POOL_BYTES];
    OsRng.fill_bytes(&mut os_entropy);
    rng.reseed(&os_entropy);
    OsRng.fill_bytes(&mut os_entropy);
    rng.reseed(&os_entropy);
    os_entropy.zeroize();

    rng
  }

  /// Creates a deterministic generator from fixed seed bytes.
  ///
  /// For tests. Production code uses [`EntropyPool::new_seeded`].
  pub fn from_seed(seed: &[u8]) -> Self {
    let mut rng = EntropyPool {
      pool: [0u8; POOL_BYTES],
      nonce: 0,
    };
    rng.reseed(seed);
    rng
  }

  /// Mixes `entropy` into the pool.
  pub fn reseed(&mut self, entropy: &[u8]) {
    let mut hasher = Sha3_256::new();
    hasher.update(entropy);
    hasher.update(self.pool);
    self.pool.copy_from_slice(&hasher.finalize());
  }

  /// Fills `out` with random bytes.
  pub fn fill(&mut self, out: &mut [u8]) {
    let mut cipher = ChaCha20::new(&self.pool, self.nonce);
    self.nonce = self.nonce.wrapping_add(1);

    out.fill(0);
    cipher.apply_keystream(out);
  }

  /// Draws `n` random bytes into a scrub-on-drop buffer.
  pub fn extract(&mut self, n: usize) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(vec![0u8; n]);
    self.fill(&mut out);
    out
  }

  /// Draws one random `u64`.
  pub fn next_u64(&mut self) -> u64 {
    let mut bytes = [0u8; 8];
    self.fill(&mut bytes);
    u64::from_le_bytes(bytes)
  }

  pub(crate) fn pool_bytes(&self) -> &[u8] {
    &self.pool
  }
}

impl Zeroize for EntropyPool {
  fn zeroize(&mut self) {
    self.pool.zeroize();
    self.nonce = 0;
  }
}

impl Drop for EntropyPool {
  fn drop(&mut self) {
    self.zeroize();
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn deterministic_from_same_seed() {
    let mut a = EntropyPool::from_seed(b"seed");
    let mut b = EntropyPool::from_seed(b"seed");

    let mut out_a = [0u8; 96];
    let mut out_b = [0u8; 96];
    a.fill(&mut out_a);
    b.fill(&mut out_b);

    assert_eq!(out_a, out_b);
  }

  #[test]
  fn reseed_changes_stream() {
    let mut a = EntropyPool::from_seed(b"seed");
    let mut b = EntropyPool::from_seed(b"seed");
    b.reseed(b"more");

    assert_ne!(a.next_u64(), b.next_u64());
  }

  #[test]
  fn consecutive_extractions_differ() {
    let mut rng = EntropyPool::from_seed(b"seed");

    let first = rng.extract(32);
    let second = rng.extract(32);

    assert_eq!(first.len(), 32);
    assert_ne!(&first[..], &second[..]);
  }

  #[test]
  fn seeded_pools_diverge() {
    let mut a = EntropyPool::new_seeded();
    let mut b = EntropyPool::new_seeded();

    // 2^-64 false-failure probability; OS entropy makes these independent.
    assert_ne!(a.next_u64(), b.next_u64());
  }
}
