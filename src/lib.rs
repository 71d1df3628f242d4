//! credvault - the vault engine of a local, zero-knowledge credential store.
//!
//! This crate provides the core of an encrypted credential vault:
//!
//! - [`database`] - the in-memory database and its merge operations
//! - [`models`] - entries, snapshots and generator preferences
//! - [`vault`] - the authenticated-encrypted binary container codec
//! - [`proptree`] - the brace-delimited text format for export and merge
//! - [`secret`] - the in-memory masking discipline for secret strings
//! - [`cipher`] / [`rng`] - ChaCha20 and the pool CSPRNG
//! - [`generator`] - password synthesis from per-entry preferences
//! - [`ranker`] - the fuzzy search order for listings
//! - [`base64`] - padding-tolerant base64 for host-side blobs
//!
//! # Architecture
//!
//! ```text
//! Host shell (UI, clipboard, hotkeys)
//!     │
//!     ▼
//! database.rs ─── queries, edits, merges
//!     │
//!     ├── secret.rs ── scoped unmask, ephemeral key masking
//!     ├── vault.rs ─── KDF, encrypt/MAC/hash, record framing
//!     └── proptree.rs  text export / import-merge
//!     │
//!     ▼
//! Disk ────────── one encrypted container file
//! ```
//!
//! # Security Features
//!
//! - **Iterated SHA3-256** key derivation, domain-separated per use
//! - **ChaCha20 + keyed-SHA3 MAC** authenticated container encryption
//! - **Keystream masking** of every secret string at rest in memory
//! - **Zeroize** scrubbing of keys, RNG state and plaintext on drop
//! - **Page-in task** keeping key material resident against swapping
//!
//! The engine is single-owner: one [`database::Database`] at a time, no
//! internal locking on the call surface, blocking load/save. The host
//! shell, clipboard handling, hotkeys and preference storage live outside
//! this crate.

pub mod base64;
pub mod cipher;
pub mod database;
pub mod error;
pub mod generator;
pub mod models;
pub mod proptree;
pub mod ranker;
mod resident;
pub mod rng;
pub mod secret;
pub mod vault;

pub use database::{merge_entries, Database};
pub use error::VaultError;
pub use models::{Entry, GeneratorSpec, Snapshot};
