//! Error taxonomy for the vault engine.
//!
//! The engine reports failures as a small closed set of kinds so a host
//! can distinguish a damaged file from a wrong password and present the
//! right message. I/O and allocation failures surface through [`VaultError::Io`].

use std::fmt;
use std::io;

/// Errors that can occur during vault operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VaultError {
  /// The file is shorter than the fixed 128-byte container header.
  FileTooSmall,
  /// The integrity hash over the file body does not match: the bytes on
  /// disk were altered after they were written.
  FileDamaged,
  /// The file format major version is not supported by this build.
  BadVersion,
  /// The MAC over the ciphertext does not verify. Almost always a wrong
  /// master password; also produced for a tampered ciphertext that kept
  /// its integrity hash consistent.
  WrongPassword,
  /// The decrypted record stream ended unexpectedly or is malformed.
  CorruptRecord,
  /// A capacity bound was exceeded at serialize time: more than 65,535
  /// snapshots in one entry, or an entry count that does not fit the
  /// container's 32-bit field.
  TooManySnapshots,
  /// The generator alphabet is empty or contains a non-printable or
  /// whitespace byte.
  BadAlphabet,
  /// File I/O error.
  Io(String),
}

impl fmt::Display for VaultError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      VaultError::FileTooSmall => write!(f, "database file too small"),
      VaultError::FileDamaged => write!(f, "file was damaged"),
      VaultError::BadVersion => write!(f, "incompatible file format version"),
      VaultError::WrongPassword => write!(f, "wrong password"),
      VaultError::CorruptRecord => write!(f, "unexpected end of data while parsing database"),
      VaultError::TooManySnapshots => write!(
        f,
        "too many snapshots in a database entry; use text export and prune manually"
      ),
      VaultError::BadAlphabet => write!(
        f,
        "alphabet is empty or contains a non-printable or whitespace character"
      ),
      VaultError::Io(msg) => write!(f, "i/o error: {msg}"),
    }
  }
}

impl std::error::Error for VaultError {}

impl From<io::Error> for VaultError {
  fn from(e: io::Error) -> Self {
    VaultError::Io(e.to_string())
  }
}
