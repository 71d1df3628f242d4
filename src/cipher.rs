//! ChaCha20 stream cipher with a 64-bit nonce and 64-bit block counter.
//!
//! This is the "djb" variant of the cipher: the 128 bits following the key
//! in the state matrix split into a 64-bit block counter and a 64-bit
//! nonce. The vault uses it in two ways:
//!
//! - as the bulk cipher for the on-disk container (nonce 0, block 0; the
//!   file nonce is baked into the derived key instead), and
//! - as the in-memory masking keystream, where each secret field owns a
//!   disjoint slice of the stream selected by [`ChaCha20::seek_block`].
//!
//! The implementation is deliberately simple and conservative; the state
//! is zeroized on drop. It provides no integrity protection on its own —
//! the container pairs it with a keyed-SHA3 MAC.

use zeroize::Zeroize;

/// The size of a ChaCha20 key in bytes.
pub const KEY_SIZE: usize = 32;

/// The size of one keystream block in bytes.
pub const BLOCK_SIZE: usize = 64;

/// The first four words of the ChaCha20 state ("expand 32-byte k").
const SIGMA: [u32; 4] = [0x6170_7865, 0x3320_646e, 0x7962_2d32, 0x6b20_6574];

/// ChaCha20 cipher state.
pub struct ChaCha20 {
  key: [u32; 8],
  nonce: [u32; 2],
  counter: u64,

  // Cached tail of the last generated block, so consecutive
  // `apply_keystream` calls behave like one continuous stream.
  block: [u8; BLOCK_SIZE],
  block_bytes: usize,
}

impl ChaCha20 {
  /// Creates a cipher over `key` and `nonce`, positioned at block 0.
  pub fn new(key: &[u8; KEY_SIZE], nonce: u64) -> Self {
    let mut key_words = [0u32; 8];
    for (i, w) in key_words.iter_mut().enumerate() {
      *w = u32::from_le_bytes([key[i * 4], key[i * 4 + 1], key[i * 4 + 2], key[i * 4 + 3]]);
    }

    ChaCha20 {
      key: key_words,
      nonce: [nonce as u32, (nonce >> 32) as u32],
      counter: 0,
      block: [0u8; BLOCK_SIZE],
      block_bytes: 0,
    }
  }

  /// Repositions the keystream at the start of `block`, discarding any
  /// cached partial block.
  pub fn seek_block(&mut self, block: u64) {
    self.counter = block;
    self.block_bytes = 0;
  }

  /// XORs the keystream into `data` in place. The operation is its own
  /// inverse: applying it twice from the same position restores the
  /// original bytes.
  pub fn apply_keystream(&mut self, data: &mut [u8]) {
    let mut data = data;

    // Use up leftover keystream from the cached block first.
    if self.block_bytes > 0 {
      let n = data.len().min(self.block_bytes);
      for (d, b) in data
        .iter_mut()
        .zip(self.block[BLOCK_SIZE - self.block_bytes..].iter())
      {
        *d ^= b;
      }

      data = &mut data[n..];
      self.block_bytes -= n;
    }

    let mut block = [0u8; BLOCK_SIZE];
    while data.len() >= BLOCK_SIZE {
      self.next_block(&mut block);
      for (d, b) in data.iter_mut().zip(block.iter()) {
        *d ^= b;
      }

      data = &mut data[BLOCK_SIZE..];
    }

    if !data.is_empty() {
      self.next_block(&mut block);
      let used = data.len();
      for (d, b) in data.iter_mut().zip(block[..used].iter()) {
        *d ^= b;
      }

      self.block = block;
      self.block_bytes = BLOCK_SIZE - used;
    }

    block.zeroize();
  }

  /// Generates the next 64-byte keystream block and advances the counter.
  fn next_block(&mut self, block: &mut [u8; BLOCK_SIZE]) {
    let mut state = [
      SIGMA[0],
      SIGMA[1],
      SIGMA[2],
      SIGMA[3],
      self.key[0],
      self.key[1],
      self.key[2],
      self.key[3],
      self.key[4],
      self.key[5],
      self.key[6],
      self.key[7],
      self.counter as u32,
      (self.counter >> 32) as u32,
      self.nonce[0],
      self.nonce[1],
    ];

    let initial = state;

    // 20 rounds as 10 double rounds, RFC 7539 section 2.3.
    for _ in 0..10 {
      quarter_round(&mut state, 0x0, 0x4, 0x8, 0xc);
      quarter_round(&mut state, 0x1, 0x5, 0x9, 0xd);
      quarter_round(&mut state, 0x2, 0x6, 0xa, 0xe);
      quarter_round(&mut state, 0x3, 0x7, 0xb, 0xf);

      quarter_round(&mut state, 0x0, 0x5, 0xa, 0xf);
      quarter_round(&mut state, 0x1, 0x6, 0xb, 0xc);
      quarter_round(&mut state, 0x2, 0x7, 0x8, 0xd);
      quarter_round(&mut state, 0x3, 0x4, 0x9, 0xe);
    }

    for (word, start) in state.iter_mut().zip(initial.iter()) {
      *word = word.wrapping_add(*start);
    }

    for (i, word) in state.iter().enumerate() {
      block[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
    }

    state.zeroize();
    self.counter = self.counter.wrapping_add(1);
  }
}

impl Drop for ChaCha20 {
  fn drop(&mut self) {
    self.key.zeroize();
    self.nonce.zeroize();
    self.counter = 0;
    self.block.zeroize();
    self.block_bytes = 0;
  }
}

/// Quarter round over state indices, RFC 7539 section 2.2.
#[inline]
fn quarter_round(state: &mut [u32; 16], a: usize, b: usize, c: usize, d: usize) {
  state[a] = state[a].wrapping_add(state[b]);
  state[d] ^= state[a];
  state[d] = state[d].rotate_left(16);

  state[c] = state[c].wrapping_add(state[d]);
  state[b] ^= state[c];
  state[b] = state[b].rotate_left(12);

  state[a] = state[a].wrapping_add(state[b]);
  state[d] ^= state[a];
  state[d] = state[d].rotate_left(8);

  state[c] = state[c].wrapping_add(state[d]);
  state[b] ^= state[c];
  state[b] = state[b].rotate_left(7);
}
