//! Binary container codec.
//!
//! This module handles the on-disk format of the vault:
//! - Key derivation (iterated SHA3-256, one KDF for all three key domains)
//! - Encryption/decryption using ChaCha20 keyed per file nonce
//! - Keyed-SHA3 MAC over the ciphertext, and a separate truncated-SHA3
//!   integrity hash for damage detection
//! - Fixed-order entry record framing
//!
//! # File layout
//!
//! All integers little-endian, no alignment beyond byte 128:
//!
//! ```text
//! [  0..16 )  integrity hash: first 16 bytes of SHA3-256 over [16..end)
//! [ 16..18 )  file format version, major << 8 | minor
//! [ 18..32 )  reserved, zero on write, ignored on read
//! [ 32..64 )  random nonce
//! [ 64..96 )  mac = SHA3-256(mac_key || [16..32) || [96..end))
//! [ 96..104)  timestamp, int64 seconds        --+
//! [104..108)  number of entries, uint32         | encrypted with
//! [108..128)  reserved, zero                    | chacha20(enc_key)
//! [128..   )  entry records                   --+ from block 0
//! ```
//!
//! `enc_key` and `mac_key` are derived from the master password and the
//! file nonce under the domains `"ENC-KEY"` and `"MAC-KEY"`. The MAC is
//! checked before any record parsing, so a wrong password never surfaces
//! as a corrupt-record error.
//!
//! # Security
//!
//! - Derived keys live in `Zeroizing` buffers and are scrubbed after use
//! - Cipher state is scrubbed when the cipher is dropped
//! - Decrypted plaintext buffers are owned by the caller, which scrubs
//!   them on the way out

use sha3::{Digest, Sha3_256};
use zeroize::Zeroizing;

use crate::cipher::ChaCha20;
use crate::error::VaultError;
use crate::models::{
  Entry, GeneratorSpec, Snapshot, FF_VER_MAJOR, FLAG_EXTRA, FLAG_HIDDEN, FLAG_LETTERS,
  FLAG_NUMBERS, FLAG_SPECIAL, MAX_SNAPSHOTS, MAX_STRING_BYTES,
};
use crate::secret::SecretBytes;

/// Total size of the container header; records start here.
pub const HEADER_BYTES: usize = 128;

const HASH_RANGE: std::ops::Range<usize> = 0..16;
const FFV_OFFSET: usize = 16;
const NONCE_RANGE: std::ops::Range<usize> = 32..64;
const MAC_RANGE: std::ops::Range<usize> = 64..96;
const TIMESTAMP_OFFSET: usize = 96;
const N_ENTRIES_OFFSET: usize = 104;

/// Start of the encrypted region.
const CIPHERTEXT_OFFSET: usize = 96;

/// KDF strengthening rounds.
const KDF_ROUNDS: usize = 10_001;

/// Derives a 32-byte key from the master password.
///
/// `h = SHA3-256(password || nonce || domain)`, then `KDF_ROUNDS` times
/// `h = SHA3-256(password || h)`. The sole KDF of the engine; `domain`
/// separates the ephemeral mask key (`"TMP-KEY"`) from the file keys
/// (`"ENC-KEY"`, `"MAC-KEY"`).
pub fn derive_key(password: &[u8], nonce: &[u8; 32], domain: &str) -> Zeroizing<[u8; 32]> {
  let mut h = Zeroizing::new([0u8; 32]);

  let mut hasher = Sha3_256::new();
  hasher.update(password);
  hasher.update(nonce);
  hasher.update(domain.as_bytes());
  h.copy_from_slice(&hasher.finalize());

  for _ in 0..KDF_ROUNDS {
    let mut hasher = Sha3_256::new();
    hasher.update(password);
    hasher.update(&h[..]);
    h.copy_from_slice(&hasher.finalize());
  }

  h
}

/// Derives the encryption and MAC keys for a file nonce.
pub fn derive_file_keys(
  password: &[u8],
  nonce: &[u8; 32],
) -> (Zeroizing<[u8; 32]>, Zeroizing<[u8; 32]>) {
  let enc_key = derive_key(password, nonce, "ENC-KEY");
  let mac_key = derive_key(password, nonce, "MAC-KEY");
  (enc_key, mac_key)
}

/// Validates the cleartext header of a container: minimum size, integrity
/// hash, format version. Returns the file nonce.
pub fn check_header(buffer: &[u8]) -> Result<[u8; 32], VaultError> {
  if buffer.len() < HEADER_BYTES {
    return Err(VaultError::FileTooSmall);
  }

  let mut hasher = Sha3_256::new();
  hasher.update(&buffer[FFV_OFFSET..]);
  let actual = hasher.finalize();
  if actual[..16] != buffer[HASH_RANGE] {
    return Err(VaultError::FileDamaged);
  }

  let ffv = u16::from_le_bytes([buffer[FFV_OFFSET], buffer[FFV_OFFSET + 1]]);
  if ffv >> 8 != FF_VER_MAJOR {
    return Err(VaultError::BadVersion);
  }

  let mut nonce = [0u8; 32];
  nonce.copy_from_slice(&buffer[NONCE_RANGE]);
  Ok(nonce)
}

/// Computes the container MAC: `SHA3-256(mac_key || ffv+reserved || ciphertext)`.
fn compute_mac(buffer: &[u8], mac_key: &[u8; 32]) -> [u8; 32] {
  let mut hasher = Sha3_256::new();
  hasher.update(mac_key);
  hasher.update(&buffer[FFV_OFFSET..NONCE_RANGE.start]);
  hasher.update(&buffer[CIPHERTEXT_OFFSET..]);
  hasher.finalize().into()
}

/// Verifies the MAC, decrypts the payload in place, and parses the entry
/// records. The buffer must have passed [`check_header`].
///
/// Returns the file's serialize timestamp and the parsed entries with
/// their secret fields still in plaintext; the caller masks them before
/// they become reachable from the database.
pub fn open_payload(
  buffer: &mut [u8],
  enc_key: &[u8; 32],
  mac_key: &[u8; 32],
) -> Result<(i64, Vec<Entry>), VaultError> {
  // No timing-oracle concerns: the correct MAC is public in the file.
  let calculated = compute_mac(buffer, mac_key);
  if calculated[..] != buffer[MAC_RANGE] {
    return Err(VaultError::WrongPassword);
  }

  let mut cipher = ChaCha20::new(enc_key, 0);
  cipher.apply_keystream(&mut buffer[CIPHERTEXT_OFFSET..]);
  drop(cipher);

  let timestamp = read_i64(buffer, TIMESTAMP_OFFSET);
  let n_entries = read_u32(buffer, N_ENTRIES_OFFSET);

  let mut reader = RecordReader::new(&buffer[HEADER_BYTES..]);
  let mut entries = Vec::with_capacity(n_entries.min(4096) as usize);
  for _ in 0..n_entries {
    entries.push(parse_record(&mut reader)?);
  }

  Ok((timestamp, entries))
}

/// Writes the cleartext header fields of a fresh container buffer:
/// version word, file nonce, timestamp and entry count. The integrity
/// hash and MAC stay zero until [`seal`].
pub fn begin_container(
  buffer: &mut Vec<u8>,
  ffv: u16,
  nonce: &[u8; 32],
  timestamp: i64,
  n_entries: u32,
) {
  debug_assert!(buffer.is_empty());
  buffer.resize(HEADER_BYTES, 0);
  buffer[FFV_OFFSET..FFV_OFFSET + 2].copy_from_slice(&ffv.to_le_bytes());
  buffer[NONCE_RANGE].copy_from_slice(nonce);
  buffer[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + 8].copy_from_slice(&timestamp.to_le_bytes());
  buffer[N_ENTRIES_OFFSET..N_ENTRIES_OFFSET + 4].copy_from_slice(&n_entries.to_le_bytes());
}

/// Encrypts the payload region in place and fills in the MAC and the
/// integrity hash, completing the container.
pub fn seal(buffer: &mut [u8], enc_key: &[u8; 32], mac_key: &[u8; 32]) {
  let mut cipher = ChaCha20::new(enc_key, 0);
  cipher.apply_keystream(&mut buffer[CIPHERTEXT_OFFSET..]);
  drop(cipher);

  let mac = compute_mac(buffer, mac_key);
  buffer[MAC_RANGE].copy_from_slice(&mac);

  let mut hasher = Sha3_256::new();
  hasher.update(&buffer[FFV_OFFSET..]);
  let hash = hasher.finalize();
  buffer[HASH_RANGE].copy_from_slice(&hash[..16]);
}

/// Serializes one entry record onto the buffer. The entry must be inside
/// an unmask scope: its secret fields are read as plaintext.
pub fn append_record(buffer: &mut Vec<u8>, entry: &Entry) -> Result<(), VaultError> {
  if entry.snapshots.len() > MAX_SNAPSHOTS {
    return Err(VaultError::TooManySnapshots);
  }

  buffer.extend_from_slice(&entry.unique_id.to_le_bytes());
  buffer.extend_from_slice(&entry.timestamp.to_le_bytes());
  buffer.extend_from_slice(&(entry.snapshots.len() as u16).to_le_bytes());

  for snapshot in &entry.snapshots {
    buffer.extend_from_slice(&snapshot.timestamp.to_le_bytes());
    append_string(buffer, snapshot.username.as_bytes());
    append_string(buffer, snapshot.password.as_bytes());
  }

  append_string(buffer, entry.name.as_bytes());
  append_string(buffer, entry.comment.as_bytes());
  append_string(buffer, entry.generator.extra_alphabet.as_bytes());
  buffer.extend_from_slice(&entry.generator.password_length.to_le_bytes());

  let mut flags = 0u16;
  if entry.generator.use_letters {
    flags |= FLAG_LETTERS;
  }
  if entry.generator.use_numbers {
    flags |= FLAG_NUMBERS;
  }
  if entry.generator.use_special {
    flags |= FLAG_SPECIAL;
  }
  if entry.generator.use_extra {
    flags |= FLAG_EXTRA;
  }
  if entry.hidden {
    flags |= FLAG_HIDDEN;
  }
  buffer.extend_from_slice(&flags.to_le_bytes());

  Ok(())
}

/// Appends a length-prefixed string, truncating over-long values to the
/// 16-bit bound without splitting a UTF-8 sequence.
fn append_string(buffer: &mut Vec<u8>, bytes: &[u8]) {
  let clamped = clamp_utf8(bytes, MAX_STRING_BYTES);
  buffer.extend_from_slice(&(clamped.len() as u16).to_le_bytes());
  buffer.extend_from_slice(clamped);
}

/// The longest prefix of `bytes` of at most `max` bytes that does not
/// end inside a UTF-8 sequence.
fn clamp_utf8(bytes: &[u8], max: usize) -> &[u8] {
  if bytes.len() <= max {
    return bytes;
  }

  let mut end = max;
  while end > 0 && bytes[end] & 0xC0 == 0x80 {
    end -= 1;
  }
  &bytes[..end]
}

fn read_i64(buffer: &[u8], offset: usize) -> i64 {
  let mut bytes = [0u8; 8];
  bytes.copy_from_slice(&buffer[offset..offset + 8]);
  i64::from_le_bytes(bytes)
}

fn read_u32(buffer: &[u8], offset: usize) -> u32 {
  let mut bytes = [0u8; 4];
  bytes.copy_from_slice(&buffer[offset..offset + 4]);
  u32::from_le_bytes(bytes)
}

/// Bounds-checked cursor over the decrypted record region.
struct RecordReader<'a> {
  buf: &'a [u8],
}

impl<'a> RecordReader<'a> {
  fn new(buf: &'a [u8]) -> Self {
    RecordReader { buf }
  }

  fn take(&mut self, n: usize) -> Result<&'a [u8], VaultError> {
    if self.buf.len() < n {
      return Err(VaultError::CorruptRecord);
    }
    let (head, tail) = self.buf.split_at(n);
    self.buf = tail;
    Ok(head)
  }

  fn read_u16(&mut self) -> Result<u16, VaultError> {
    let bytes = self.take(2)?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
  }

  fn read_u64(&mut self) -> Result<u64, VaultError> {
    let bytes = self.take(8)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    Ok(u64::from_le_bytes(raw))
  }

  fn read_i64(&mut self) -> Result<i64, VaultError> {
    Ok(self.read_u64()? as i64)
  }

  fn read_string(&mut self) -> Result<Vec<u8>, VaultError> {
    let len = self.read_u16()? as usize;
    Ok(self.take(len)?.to_vec())
  }
}

fn parse_record(reader: &mut RecordReader) -> Result<Entry, VaultError> {
  let unique_id = reader.read_u64()?;
  let timestamp = reader.read_i64()?;

  let n_snapshots = reader.read_u16()? as usize;
  let mut snapshots = Vec::with_capacity(n_snapshots);
  for _ in 0..n_snapshots {
    let timestamp = reader.read_i64()?;
    let username = SecretBytes::from(reader.read_string()?);
    let password = SecretBytes::from(reader.read_string()?);
    snapshots.push(Snapshot {
      timestamp,
      username,
      password,
    });
  }

  let name = String::from_utf8_lossy(&reader.read_string()?).into_owned();
  let comment = SecretBytes::from(reader.read_string()?);
  let extra_alphabet = String::from_utf8_lossy(&reader.read_string()?).into_owned();
  let password_length = reader.read_u16()?;

  // Flag bits beyond the known set belong to newer minors and are ignored.
  let flags = reader.read_u16()?;

  Ok(Entry {
    unique_id,
    timestamp,
    name,
    comment,
    generator: GeneratorSpec {
      extra_alphabet,
      password_length,
      use_letters: flags & FLAG_LETTERS != 0,
      use_numbers: flags & FLAG_NUMBERS != 0,
      use_special: flags & FLAG_SPECIAL != 0,
      use_extra: flags & FLAG_EXTRA != 0,
    },
    hidden: flags & FLAG_HIDDEN != 0,
    snapshots,
  })
}
