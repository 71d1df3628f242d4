//! In-memory secret protection.
//!
//! Every secret string the database holds at rest — entry comments,
//! snapshot usernames and passwords, and the master password itself — is
//! kept XOR-masked with a ChaCha20 keystream under the database's
//! ephemeral key. The keystream slice for each field is fixed by the
//! entry's `unique_id` (as the cipher nonce) and a per-field block index,
//! so masking and unmasking are the same in-place transform.
//!
//! Plaintext access goes through a scoped unmask: [`with_entry_plaintext`]
//! unmasks an entry, runs the caller's closure, and re-masks on every
//! exit path (a drop guard performs the re-mask, so a panic inside the
//! closure cannot leave plaintext behind). Unmask scopes do not nest for
//! the same entry.
//!
//! This is a defense against casual memory scraping (swap files, crash
//! dumps at rest), not against a privileged attacker reading live process
//! memory.

use std::fmt;

use zeroize::Zeroize;

use crate::cipher::ChaCha20;
use crate::models::Entry;

/// Mask keystream block index of the comment field.
const COMMENT_BLOCK: u64 = 0;

/// Mask keystream block index of snapshot `i`'s username.
fn username_block(i: usize) -> u64 {
  (i as u64 + 1) * 0xFFFF
}

/// Mask keystream block index of snapshot `i`'s password.
fn password_block(i: usize) -> u64 {
  (i as u64 + 1) * 0xFF_FFFF
}

/// A byte string holding secret material, zeroized on drop.
///
/// While owned by the database the content is keystream-masked and not
/// valid UTF-8; the plaintext bytes are only observable inside an unmask
/// scope. `Debug` never prints the content.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
  pub fn new() -> Self {
    SecretBytes(Vec::new())
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.0
  }

  pub fn as_mut_bytes(&mut self) -> &mut [u8] {
    &mut self.0
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Scrubs and discards the current content.
  pub fn clear(&mut self) {
    self.0.zeroize();
    self.0.clear();
  }

  /// The content interpreted as UTF-8, replacing invalid sequences.
  /// Only meaningful inside an unmask scope.
  pub fn to_plain_string(&self) -> String {
    String::from_utf8_lossy(&self.0).into_owned()
  }
}

impl From<Vec<u8>> for SecretBytes {
  fn from(bytes: Vec<u8>) -> Self {
    SecretBytes(bytes)
  }
}

impl From<String> for SecretBytes {
  fn from(s: String) -> Self {
    SecretBytes(s.into_bytes())
  }
}

impl From<&str> for SecretBytes {
  fn from(s: &str) -> Self {
    SecretBytes(s.as_bytes().to_vec())
  }
}

impl Zeroize for SecretBytes {
  fn zeroize(&mut self) {
    self.0.zeroize();
  }
}

impl Drop for SecretBytes {
  fn drop(&mut self) {
    self.0.zeroize();
  }
}

impl fmt::Debug for SecretBytes {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    // Never print the content, masked or not.
    write!(f, "SecretBytes({} bytes)", self.0.len())
  }
}

/// XORs the mask keystream for (`nonce`, `start_block`) into `data`.
/// Involutive: the same call masks and unmasks.
pub fn apply_mask(key: &[u8; 32], nonce: u64, start_block: u64, data: &mut [u8]) {
  let mut cipher = ChaCha20::new(key, nonce);
  cipher.seek_block(start_block);
  cipher.apply_keystream(data);
}

/// Toggles the masking of every secret field of `entry` in place.
///
/// Field block indices are derived from the snapshot's current position,
/// so the masked state is only consistent while the snapshot order does
/// not change. All mutation paths therefore unmask first and re-mask
/// after reordering.
pub fn transform_entry(key: &[u8; 32], entry: &mut Entry) {
  apply_mask(key, entry.unique_id, COMMENT_BLOCK, entry.comment.as_mut_bytes());

  for i in 0..entry.snapshots.len() {
    let snapshot = &mut entry.snapshots[i];
    apply_mask(key, entry.unique_id, username_block(i), snapshot.username.as_mut_bytes());
    apply_mask(key, entry.unique_id, password_block(i), snapshot.password.as_mut_bytes());
  }
}

/// Re-masks the entry when the scope ends, whether by return or panic.
struct RemaskGuard<'k, 'e> {
  key: &'k [u8; 32],
  entry: &'e mut Entry,
}

impl Drop for RemaskGuard<'_, '_> {
  fn drop(&mut self) {
    transform_entry(self.key, self.entry);
  }
}

/// Runs `f` with the entry's secret fields unmasked, re-masking on all
/// exit paths. Do not re-enter the vault for the same entry from inside
/// `f`.
pub fn with_entry_plaintext<R>(
  key: &[u8; 32],
  entry: &mut Entry,
  f: impl FnOnce(&mut Entry) -> R,
) -> R {
  transform_entry(key, entry);
  let mut guard = RemaskGuard { key, entry };
  f(&mut *guard.entry)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::models::{GeneratorSpec, Snapshot};

  fn sample_entry() -> Entry {
    Entry {
      unique_id: 0x0123_4567_89ab_cdef,
      timestamp: 1_700_000_000,
      name: "github".to_string(),
      comment: SecretBytes::from("a comment"),
      generator: GeneratorSpec::default(),
      hidden: false,
      snapshots: vec![
        Snapshot {
          timestamp: 1_700_000_000,
          username: SecretBytes::from("alice"),
          password: SecretBytes::from("hunter2"),
        },
        Snapshot {
          timestamp: 1_700_000_100,
          username: SecretBytes::from("alice"),
          password: SecretBytes::from("hunter3"),
        },
      ],
    }
  }

  #[test]
  fn mask_round_trip() {
    let key = [7u8; 32];
    let mut data = b"plaintext".to_vec();

    apply_mask(&key, 42, 3, &mut data);
    assert_ne!(&data, b"plaintext");
    apply_mask(&key, 42, 3, &mut data);
    assert_eq!(&data, b"plaintext");
  }

  #[test]
  fn entry_transform_round_trips() {
    let key = [1u8; 32];
    let mut entry = sample_entry();

    transform_entry(&key, &mut entry);
    assert_ne!(entry.comment.as_bytes(), b"a comment");
    assert_ne!(entry.snapshots[0].password.as_bytes(), b"hunter2");

    transform_entry(&key, &mut entry);
    assert_eq!(entry.comment.as_bytes(), b"a comment");
    assert_eq!(entry.snapshots[0].username.as_bytes(), b"alice");
    assert_eq!(entry.snapshots[1].password.as_bytes(), b"hunter3");
  }

  #[test]
  fn sibling_fields_use_distinct_keystreams() {
    let key = [1u8; 32];
    let mut entry = sample_entry();
    // Same plaintext in two different slots must mask differently.
    entry.snapshots[0].username = SecretBytes::from("same");
    entry.snapshots[1].username = SecretBytes::from("same");
    entry.comment = SecretBytes::from("same");

    transform_entry(&key, &mut entry);

    assert_ne!(
      entry.snapshots[0].username.as_bytes(),
      entry.snapshots[1].username.as_bytes()
    );
    assert_ne!(entry.comment.as_bytes(), entry.snapshots[0].username.as_bytes());
  }

  #[test]
  fn scope_remasks_on_return() {
    let key = [3u8; 32];
    let mut entry = sample_entry();
    transform_entry(&key, &mut entry);

    let seen = with_entry_plaintext(&key, &mut entry, |e| {
      assert_eq!(e.comment.as_bytes(), b"a comment");
      e.comment.to_plain_string()
    });

    assert_eq!(seen, "a comment");
    assert_ne!(entry.comment.as_bytes(), b"a comment");
  }

  #[test]
  fn scope_remasks_on_panic() {
    let key = [3u8; 32];
    let mut entry = sample_entry();
    transform_entry(&key, &mut entry);

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
      with_entry_plaintext(&key, &mut entry, |_| panic!("caller failure"));
    }));
    assert!(result.is_err());

    // Still masked after the panic crossed the scope.
    assert_ne!(entry.comment.as_bytes(), b"a comment");
    transform_entry(&key, &mut entry);
    assert_eq!(entry.comment.as_bytes(), b"a comment");
  }
}
