//! Core data structures for the credential vault.
//!
//! This module defines the types persisted in the container:
//! - [`Entry`] - one logical credential record with its snapshot history
//! - [`Snapshot`] - one historical (username, password, timestamp) triple
//! - [`GeneratorSpec`] - per-entry password generator preferences
//!
//! Secret fields (`comment`, snapshot `username`/`password`) are stored
//! as [`SecretBytes`] and stay keystream-masked while at rest in memory;
//! see the `secret` module. The entry `name` is deliberately plain - it
//! drives search and sorting.

use chrono::Utc;
use zeroize::Zeroize;

use crate::secret::SecretBytes;

/// Current file format version, major byte.
pub const FF_VER_MAJOR: u16 = 2;

/// Current file format version, minor byte. Readers accept any minor
/// under the same major.
pub const FF_VER_MINOR: u16 = 7;

/// The version word written to disk (`major << 8 | minor`).
pub const FF_VER: u16 = FF_VER_MAJOR << 8 | FF_VER_MINOR;

/// Upper bound of every length-prefixed string in the container.
pub const MAX_STRING_BYTES: usize = 0xFFFF;

/// Upper bound of snapshots per entry in the container.
pub const MAX_SNAPSHOTS: usize = 0xFFFF;

/// The 52 ASCII letters used by the password generator.
pub const ASCII_LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// The 10 ASCII digits used by the password generator.
pub const ASCII_NUMBERS: &[u8] = b"0123456789";

/// The 32 printable ASCII punctuation characters used by the generator.
pub const ASCII_SPECIAL: &[u8] = b"!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

/// Entry flag bits as serialized in the container's flags word.
pub const FLAG_LETTERS: u16 = 1 << 0;
pub const FLAG_NUMBERS: u16 = 1 << 1;
pub const FLAG_SPECIAL: u16 = 1 << 2;
pub const FLAG_EXTRA: u16 = 1 << 3;
pub const FLAG_HIDDEN: u16 = 1 << 4;

/// One historical credential pair belonging to an entry.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
  /// When this pair was recorded, seconds since the Unix epoch.
  pub timestamp: i64,
  /// Masked at rest in memory.
  pub username: SecretBytes,
  /// Masked at rest in memory.
  pub password: SecretBytes,
}

impl Zeroize for Snapshot {
  fn zeroize(&mut self) {
    self.timestamp = 0;
    self.username.zeroize();
    self.password.zeroize();
  }
}

/// Per-entry password generator preferences.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GeneratorSpec {
  /// Extra single-byte characters to draw from when `use_extra` is set.
  pub extra_alphabet: String,
  pub password_length: u16,
  pub use_letters: bool,
  pub use_numbers: bool,
  pub use_special: bool,
  pub use_extra: bool,
}

impl Default for GeneratorSpec {
  fn default() -> Self {
    GeneratorSpec {
      extra_alphabet: String::new(),
      password_length: 16,
      use_letters: true,
      use_numbers: true,
      use_special: false,
      use_extra: false,
    }
  }
}

/// A credential record in the vault.
///
/// Snapshots are ordered ascending by timestamp and deduplicated by
/// `(timestamp, username, password)`; they are append-only under normal
/// edits and only removed by dedup during merge.
#[derive(Debug, Default)]
pub struct Entry {
  /// Nonzero, random, unique within a file. Also the nonce of this
  /// entry's mask keystream.
  pub unique_id: u64,
  /// Last modification time, seconds since the Unix epoch.
  pub timestamp: i64,
  /// Display name; not masked, used for search and sort.
  pub name: String,
  /// Masked at rest in memory.
  pub comment: SecretBytes,
  pub generator: GeneratorSpec,
  /// Hidden entries sort after all visible ones.
  pub hidden: bool,
  pub snapshots: Vec<Snapshot>,
}

impl Entry {
  /// Creates an empty entry with the given id and the current time.
  pub fn new(unique_id: u64, name: String) -> Self {
    Entry {
      unique_id,
      timestamp: Utc::now().timestamp(),
      name,
      comment: SecretBytes::new(),
      generator: GeneratorSpec::default(),
      hidden: false,
      snapshots: Vec::new(),
    }
  }

  /// Updates the modification timestamp to the current time.
  pub fn touch(&mut self) {
    self.timestamp = Utc::now().timestamp();
  }

  /// Appends a snapshot unless it repeats the current last credential
  /// pair. Must be called inside an unmask scope; the snapshot's fields
  /// are taken as plaintext.
  pub fn push_snapshot(&mut self, snapshot: Snapshot) {
    if let Some(last) = self.snapshots.last() {
      if last.username == snapshot.username && last.password == snapshot.password {
        return;
      }
    }
    self.snapshots.push(snapshot);
  }
}

impl Zeroize for Entry {
  fn zeroize(&mut self) {
    self.unique_id = 0;
    self.timestamp = 0;
    self.name.zeroize();
    self.comment.zeroize();
    self.generator.extra_alphabet.zeroize();
    for snapshot in &mut self.snapshots {
      snapshot.zeroize();
    }
  }
}

impl Drop for Entry {
  fn drop(&mut self) {
    self.zeroize();
  }
}
