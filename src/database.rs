//! The in-memory credential database.
//!
//! A [`Database`] owns the process-lifetime secrets - the ephemeral mask
//! key, the CSPRNG, and the masked master password - plus the entry list.
//! It is single-owner: no internal locking is promised to callers, and
//! the only background activity is the page-in task that keeps the key
//! and RNG pool resident.
//!
//! Data flow: `merge_from_encrypted_file` decodes and decrypts the
//! container, masks every parsed entry under the ephemeral key and
//! appends it; edits go through scoped unmasks; `serialize_binary`
//! unmasks entry by entry while framing records, then encrypts under a
//! fresh nonce and authenticates. Text export/import mirror that over the
//! property-tree format, where import merges by `unique_id`.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::{fs, mem};

use chrono::Utc;
use zeroize::{Zeroize, Zeroizing};

use crate::error::VaultError;
use crate::generator;
use crate::models::{Entry, GeneratorSpec, Snapshot, FF_VER};
use crate::proptree::Node;
use crate::ranker;
use crate::resident::{PageInTask, SharedKey, SharedRng};
use crate::rng::EntropyPool;
use crate::secret::{self, apply_mask, transform_entry, SecretBytes};
use crate::vault;

/// The live vault: entries plus the secrets guarding them.
pub struct Database {
  mask_key: SharedKey,
  rng: SharedRng,
  /// The master password, masked under the ephemeral key (nonce 0, block 0).
  password: SecretBytes,
  entries: Vec<Entry>,
  last_serialize: i64,
  page_in: Option<PageInTask>,
}

impl Database {
  /// Creates an empty database guarding `master_password`.
  ///
  /// Seeds the CSPRNG from the OS and clock, derives the ephemeral mask
  /// key from the password under a random nonce, masks the password with
  /// it, and starts the page-in task.
  pub fn new(master_password: Vec<u8>) -> Self {
    let mut rng = EntropyPool::new_seeded();

    let mut key_nonce = [0u8; 32];
    rng.fill(&mut key_nonce);
    let mask_key = vault::derive_key(&master_password, &key_nonce, "TMP-KEY");

    let mut password = SecretBytes::from(master_password);
    apply_mask(&mask_key, 0, 0, password.as_mut_bytes());

    let mask_key: SharedKey = Arc::new(Mutex::new(mask_key));
    let rng: SharedRng = Arc::new(Mutex::new(rng));
    let page_in = PageInTask::spawn(mask_key.clone(), rng.clone());

    Database {
      mask_key,
      rng,
      password,
      entries: Vec::new(),
      last_serialize: 0,
      page_in: Some(page_in),
    }
  }

  pub fn count_entries(&self) -> usize {
    self.entries.len()
  }

  /// Total snapshot count across all entries.
  pub fn count_snapshots(&self) -> usize {
    self.entries.iter().map(|e| e.snapshots.len()).sum()
  }

  /// Timestamp of the last binary or text serialization, or of the
  /// loaded file.
  pub fn last_serialize(&self) -> i64 {
    self.last_serialize
  }

  pub fn get_by_index(&self, index: usize) -> Option<&Entry> {
    self.entries.get(index)
  }

  pub fn find_by_id(&self, unique_id: u64) -> Option<&Entry> {
    self.entries.iter().find(|e| e.unique_id == unique_id)
  }

  /// Appends an entry and returns a reference to it. The entry's secret
  /// fields must already be masked under this database's key, or empty.
  pub fn push_entry(&mut self, entry: Entry) -> &mut Entry {
    self.entries.push(entry);
    self.entries.last_mut().expect("just pushed")
  }

  /// Draws a random nonzero id. Uniqueness within the database is the
  /// caller's check, via [`Database::find_by_id`].
  pub fn make_unique_id(&mut self) -> u64 {
    let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
    loop {
      let id = rng.next_u64();
      if id != 0 {
        return id;
      }
    }
  }

  /// Mixes opaque host bytes (UI events, timings) into the CSPRNG.
  pub fn reseed_rng(&mut self, entropy: &[u8]) {
    let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
    rng.reseed(entropy);
  }

  /// Generates a password from `spec` using the database CSPRNG.
  pub fn generate_password(&mut self, spec: &GeneratorSpec) -> Result<String, VaultError> {
    let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
    generator::generate_password(spec, &mut rng)
  }

  /// Orders entries for listing: visible before hidden, then by fuzzy
  /// distance to `search`, then by name.
  pub fn sort(&mut self, search: &str) {
    self
      .entries
      .sort_by(|lhs, rhs| ranker::compare_entries(search, lhs, rhs));
  }

  /// Runs `f` with the secrets of the entry `unique_id` unmasked,
  /// re-masking on all exit paths. Returns `None` if no such entry
  /// exists. Do not re-enter the database from inside `f`.
  pub fn with_entry_plaintext<R>(
    &mut self,
    unique_id: u64,
    f: impl FnOnce(&mut Entry) -> R,
  ) -> Option<R> {
    let key = self.mask_key_copy();
    let entry = self.entries.iter_mut().find(|e| e.unique_id == unique_id)?;
    Some(secret::with_entry_plaintext(&key, entry, f))
  }

  /// Index-addressed variant of [`Database::with_entry_plaintext`].
  pub fn with_entry_plaintext_at<R>(
    &mut self,
    index: usize,
    f: impl FnOnce(&mut Entry) -> R,
  ) -> Option<R> {
    let key = self.mask_key_copy();
    let entry = self.entries.get_mut(index)?;
    Some(secret::with_entry_plaintext(&key, entry, f))
  }

  /// Loads an encrypted container file and appends its entries.
  ///
  /// Loading is an append operation with no id collision check; the
  /// typical caller loads into a freshly constructed database. On any
  /// error the database is left as it was.
  pub fn merge_from_encrypted_file(&mut self, path: &Path) -> Result<(), VaultError> {
    let bytes = fs::read(path)?;
    log::info!("loading container: {} bytes from {}", bytes.len(), path.display());
    self.merge_from_encrypted_bytes(bytes)
  }

  /// [`Database::merge_from_encrypted_file`] over an in-memory buffer.
  /// The buffer is scrubbed on the way out, whether or not it decodes.
  pub fn merge_from_encrypted_bytes(&mut self, bytes: Vec<u8>) -> Result<(), VaultError> {
    let mut buffer = Zeroizing::new(bytes);

    let nonce = vault::check_header(&buffer)?;
    let (enc_key, mac_key) =
      self.with_master_password(|password| vault::derive_file_keys(password, &nonce));

    let (timestamp, entries) = vault::open_payload(&mut buffer, &enc_key, &mac_key)?;

    let key = self.mask_key_copy();
    let n_entries = entries.len();
    for mut entry in entries {
      transform_entry(&key, &mut entry);
      self.entries.push(entry);
    }

    self.last_serialize = timestamp;
    log::info!("loaded {} entries", n_entries);
    Ok(())
  }

  /// Serializes the database into a complete container, encrypting under
  /// a fresh random nonce. Updates `last_serialize`.
  pub fn serialize_binary(&mut self) -> Result<Vec<u8>, VaultError> {
    if u32::try_from(self.entries.len()).is_err() {
      return Err(VaultError::TooManySnapshots);
    }

    self.last_serialize = Utc::now().timestamp();

    let mut nonce = [0u8; 32];
    {
      let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
      rng.fill(&mut nonce);
    }

    // The buffer holds plaintext records until `seal`; scrubbed on every
    // early exit.
    let mut buffer = Zeroizing::new(Vec::new());
    vault::begin_container(
      &mut buffer,
      FF_VER,
      &nonce,
      self.last_serialize,
      self.entries.len() as u32,
    );

    let key = self.mask_key_copy();
    for entry in &mut self.entries {
      secret::with_entry_plaintext(&key, entry, |e| vault::append_record(&mut buffer, e))?;
    }

    let (enc_key, mac_key) =
      self.with_master_password(|password| vault::derive_file_keys(password, &nonce));
    vault::seal(&mut buffer, &enc_key, &mac_key);

    log::debug!("serialized {} entries, {} bytes", self.entries.len(), buffer.len());
    Ok(mem::take(&mut *buffer))
  }

  /// Serializes and writes the container to `path`.
  pub fn save_to_file(&mut self, path: &Path) -> Result<(), VaultError> {
    let buffer = self.serialize_binary()?;
    fs::write(path, buffer)?;
    Ok(())
  }

  /// Exports the database as the plain-text tree format.
  ///
  /// This is a secret-releasing operation by design: the returned text
  /// carries every comment, username and password in the clear. Callers
  /// treat it as sensitive. Updates `last_serialize`.
  pub fn serialize_text(&mut self) -> String {
    self.last_serialize = Utc::now().timestamp();

    let mut root = Node::new("");
    root.set("number_of_entries", self.entries.len().to_string());
    root.set("number_of_snapshots", self.count_snapshots().to_string());
    root.set("last_serialize", self.last_serialize.to_string());

    let key = self.mask_key_copy();
    for entry in &mut self.entries {
      secret::with_entry_plaintext(&key, entry, |e| {
        let node = root.add_child(e.unique_id.to_string());
        node.set("unique_id", e.unique_id.to_string());
        node.set("timestamp", e.timestamp.to_string());
        node.set("name", e.name.as_str());
        node.set("comment", e.comment.to_plain_string());
        node.set("hide", bool_text(e.hidden));
        node.set("gen.letters", bool_text(e.generator.use_letters));
        node.set("gen.numbers", bool_text(e.generator.use_numbers));
        node.set("gen.special", bool_text(e.generator.use_special));
        node.set("gen.extra", bool_text(e.generator.use_extra));
        node.set("gen.length", e.generator.password_length.to_string());
        node.set("gen.extra_alphabet", e.generator.extra_alphabet.as_str());

        for (i, snapshot) in e.snapshots.iter().enumerate() {
          let child = node.add_child(i.to_string());
          child.set("username", snapshot.username.to_plain_string());
          child.set("password", snapshot.password.to_plain_string());
          child.set("timestamp", snapshot.timestamp.to_string());
        }
      });
    }

    root.write()
  }

  /// Parses a text export and merges it into the database.
  ///
  /// Entries whose `unique_id` already exists are merged via
  /// [`merge_entries`]; new ids are masked and appended. A missing or
  /// zero id gets a fresh random one; a missing or zero timestamp
  /// becomes now.
  pub fn merge_from_text(&mut self, text: &str) -> Result<(), VaultError> {
    let root = Node::parse(text)?;
    let key = self.mask_key_copy();

    let mut merged = 0usize;
    let mut appended = 0usize;

    for node in root.children() {
      let mut data = self.entry_from_node(node);

      if let Some(index) = self
        .entries
        .iter()
        .position(|e| e.unique_id == data.unique_id)
      {
        let target = &mut self.entries[index];
        secret::with_entry_plaintext(&key, target, |target| {
          merge_entries(target, &mut data)
        });
        merged += 1;
      } else {
        transform_entry(&key, &mut data);
        self.entries.push(data);
        appended += 1;
      }
    }

    log::info!("text merge: {merged} merged, {appended} appended");
    Ok(())
  }

  /// Reads one entry subnode, applying import defaults. The result holds
  /// plaintext secrets.
  fn entry_from_node(&mut self, node: &Node) -> Entry {
    let mut unique_id = node.get_u64("unique_id").unwrap_or(0);
    if unique_id == 0 {
      unique_id = self.make_unique_id();
    }

    let mut timestamp = node.get_i64("timestamp").unwrap_or(0);
    if timestamp == 0 {
      timestamp = Utc::now().timestamp();
    }

    let generator = GeneratorSpec {
      extra_alphabet: node.get("gen.extra_alphabet").unwrap_or_default().to_string(),
      // Zero is below the generator's minimum and treated as absent.
      password_length: match node.get_u16("gen.length") {
        Some(n) if n >= 1 => n,
        _ => 16,
      },
      use_letters: node.get_bool("gen.letters").unwrap_or(false),
      use_numbers: node.get_bool("gen.numbers").unwrap_or(false),
      use_special: node.get_bool("gen.special").unwrap_or(false),
      use_extra: node.get_bool("gen.extra").unwrap_or(false),
    };

    let mut snapshots = Vec::new();
    for child in node.children() {
      snapshots.push(Snapshot {
        timestamp: child.get_i64("timestamp").unwrap_or(0),
        username: SecretBytes::from(child.get("username").unwrap_or_default().to_string()),
        password: SecretBytes::from(child.get("password").unwrap_or_default().to_string()),
      });
    }

    Entry {
      unique_id,
      timestamp,
      name: node.get("name").unwrap_or_default().to_string(),
      comment: SecretBytes::from(node.get("comment").unwrap_or_default().to_string()),
      generator,
      hidden: node.get_bool("hide").unwrap_or(false),
      snapshots,
    }
  }

  /// A short-lived copy of the ephemeral key, scrubbed when dropped.
  fn mask_key_copy(&self) -> Zeroizing<[u8; 32]> {
    let guard = self.mask_key.lock().unwrap_or_else(|e| e.into_inner());
    Zeroizing::new(**guard)
  }

  /// Unmasks the master password around `f` and re-masks immediately.
  fn with_master_password<R>(&mut self, f: impl FnOnce(&[u8]) -> R) -> R {
    let key = self.mask_key_copy();
    apply_mask(&key, 0, 0, self.password.as_mut_bytes());
    let result = f(self.password.as_bytes());
    apply_mask(&key, 0, 0, self.password.as_mut_bytes());
    result
  }
}

impl Drop for Database {
  fn drop(&mut self) {
    // Join the page-in task before scrubbing the secrets it touches.
    if let Some(task) = self.page_in.take() {
      task.shutdown();
    }
    self
      .mask_key
      .lock()
      .unwrap_or_else(|e| e.into_inner())
      .zeroize();
    self.rng.lock().unwrap_or_else(|e| e.into_inner()).zeroize();
    // `password` and `entries` scrub through their own drops.
  }
}

/// Merges `source` into `target`; both must share a `unique_id` and be
/// in plaintext state.
///
/// The side with the later `timestamp` contributes `name`, `comment`,
/// `hidden` and `generator`, and its timestamp becomes the entry's; on a
/// tie the target keeps its own fields. The losing comment is scrubbed.
/// Snapshots are concatenated, sorted ascending by timestamp and deduped
/// by `(timestamp, username, password)`; removed duplicates are scrubbed
/// as they drop. `source` is left empty.
pub fn merge_entries(target: &mut Entry, source: &mut Entry) {
  debug_assert_eq!(target.unique_id, source.unique_id);

  if source.timestamp > target.timestamp {
    target.comment.clear();
    target.timestamp = source.timestamp;
    target.name = mem::take(&mut source.name);
    target.comment = mem::take(&mut source.comment);
    target.hidden = source.hidden;
    target.generator = mem::take(&mut source.generator);
  } else {
    source.comment.clear();
  }

  target.snapshots.append(&mut source.snapshots);

  // Full-triple order makes equal snapshots adjacent for dedup while
  // keeping the ascending-timestamp invariant.
  target.snapshots.sort_by(|a, b| {
    a.timestamp
      .cmp(&b.timestamp)
      .then_with(|| a.username.as_bytes().cmp(b.username.as_bytes()))
      .then_with(|| a.password.as_bytes().cmp(b.password.as_bytes()))
  });
  target.snapshots.dedup_by(|a, b| {
    a.timestamp == b.timestamp && a.username == b.username && a.password == b.password
  });
}

fn bool_text(value: bool) -> &'static str {
  if value {
    "true"
  } else {
    "false"
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn test_db() -> Database {
    Database::new(b"correct horse battery staple".to_vec())
  }

  fn add_entry(db: &mut Database, name: &str, hidden: bool) -> u64 {
    let id = db.make_unique_id();
    let mut entry = Entry::new(id, name.to_string());
    entry.hidden = hidden;
    db.push_entry(entry);
    id
  }

  #[test]
  fn unique_ids_are_nonzero() {
    let mut db = test_db();
    for _ in 0..64 {
      assert_ne!(db.make_unique_id(), 0);
    }
  }

  #[test]
  fn find_and_index_queries() {
    let mut db = test_db();
    assert_eq!(db.count_entries(), 0);
    assert!(db.get_by_index(0).is_none());

    let id = add_entry(&mut db, "github", false);
    assert_eq!(db.count_entries(), 1);
    assert_eq!(db.find_by_id(id).map(|e| e.name.as_str()), Some("github"));
    assert!(db.find_by_id(id.wrapping_add(1)).is_none());
  }

  #[test]
  fn plaintext_scope_edits_and_remasks() {
    let mut db = test_db();
    let id = add_entry(&mut db, "svc", false);

    db.with_entry_plaintext(id, |entry| {
      entry.comment = SecretBytes::from("a note");
      entry.push_snapshot(Snapshot {
        timestamp: 1,
        username: SecretBytes::from("u"),
        password: SecretBytes::from("p"),
      });
    });

    // Masked at rest.
    let entry = db.find_by_id(id).expect("entry");
    assert_ne!(entry.comment.as_bytes(), b"a note");
    assert_ne!(entry.snapshots[0].password.as_bytes(), b"p");

    // Plaintext inside the scope.
    let comment = db
      .with_entry_plaintext(id, |entry| entry.comment.to_plain_string())
      .expect("entry");
    assert_eq!(comment, "a note");
  }

  #[test]
  fn sort_orders_hidden_last() {
    let mut db = test_db();
    add_entry(&mut db, "bravo", false);
    add_entry(&mut db, "alpha", true);
    add_entry(&mut db, "alpha", false);

    db.sort("alpha");

    let names: Vec<(String, bool)> = (0..db.count_entries())
      .map(|i| {
        let e = db.get_by_index(i).expect("entry");
        (e.name.clone(), e.hidden)
      })
      .collect();

    assert_eq!(
      names,
      vec![
        ("alpha".to_string(), false),
        ("bravo".to_string(), false),
        ("alpha".to_string(), true),
      ]
    );
  }

  #[test]
  fn text_export_reimports_into_empty_database() {
    let mut db = test_db();
    let id = add_entry(&mut db, "github", false);
    db.with_entry_plaintext(id, |entry| {
      entry.comment = SecretBytes::from("work account");
      entry.generator.use_special = true;
      entry.push_snapshot(Snapshot {
        timestamp: 1_700_000_000,
        username: SecretBytes::from("alice"),
        password: SecretBytes::from("hunter2"),
      });
    });

    let text = db.serialize_text();

    let mut restored = test_db();
    restored.merge_from_text(&text).expect("import");

    assert_eq!(restored.count_entries(), 1);
    let entry = restored.find_by_id(id).expect("entry");
    assert_eq!(entry.name, "github");
    assert!(entry.generator.use_special);

    let (comment, username, password) = restored
      .with_entry_plaintext(id, |e| {
        (
          e.comment.to_plain_string(),
          e.snapshots[0].username.to_plain_string(),
          e.snapshots[0].password.to_plain_string(),
        )
      })
      .expect("entry");
    assert_eq!(comment, "work account");
    assert_eq!(username, "alice");
    assert_eq!(password, "hunter2");
  }

  #[test]
  fn text_import_assigns_missing_id_and_timestamp() {
    let mut db = test_db();
    db.merge_from_text(r#"{ x { name = "no id here" } }"#)
      .expect("import");

    assert_eq!(db.count_entries(), 1);
    let entry = db.get_by_index(0).expect("entry");
    assert_ne!(entry.unique_id, 0);
    assert_ne!(entry.timestamp, 0);
    assert_eq!(entry.name, "no id here");
    // Import defaults: all generator flags off, length 16.
    assert!(!entry.generator.use_letters);
    assert_eq!(entry.generator.password_length, 16);
  }

  #[test]
  fn merge_later_side_wins_fields() {
    let mut target = Entry::new(42, "old".to_string());
    target.timestamp = 10;
    target.comment = SecretBytes::from("old comment");
    target.snapshots.push(Snapshot {
      timestamp: 1,
      username: SecretBytes::from("u"),
      password: SecretBytes::from("p1"),
    });

    let mut source = Entry::new(42, "new".to_string());
    source.timestamp = 20;
    source.comment = SecretBytes::from("new comment");
    source.snapshots.push(Snapshot {
      timestamp: 1,
      username: SecretBytes::from("u"),
      password: SecretBytes::from("p1"),
    });
    source.snapshots.push(Snapshot {
      timestamp: 2,
      username: SecretBytes::from("u"),
      password: SecretBytes::from("p2"),
    });

    merge_entries(&mut target, &mut source);

    assert_eq!(target.name, "new");
    assert_eq!(target.timestamp, 20);
    assert_eq!(target.comment.as_bytes(), b"new comment");
    assert_eq!(target.snapshots.len(), 2);
    assert_eq!(target.snapshots[0].password.as_bytes(), b"p1");
    assert_eq!(target.snapshots[1].password.as_bytes(), b"p2");
    assert!(source.snapshots.is_empty());
  }

  #[test]
  fn merge_tie_keeps_target_fields() {
    let mut target = Entry::new(7, "target".to_string());
    target.timestamp = 10;
    let mut source = Entry::new(7, "source".to_string());
    source.timestamp = 10;

    merge_entries(&mut target, &mut source);
    assert_eq!(target.name, "target");
    assert_eq!(target.timestamp, 10);
  }

  #[test]
  fn merge_sorts_and_dedups_snapshots() {
    let snapshot = |ts: i64, pw: &str| Snapshot {
      timestamp: ts,
      username: SecretBytes::from("u"),
      password: SecretBytes::from(pw),
    };

    let mut target = Entry::new(1, "t".to_string());
    target.timestamp = 1;
    target.snapshots = vec![snapshot(5, "e"), snapshot(1, "a")];

    let mut source = Entry::new(1, "s".to_string());
    source.timestamp = 2;
    source.snapshots = vec![snapshot(1, "a"), snapshot(3, "c"), snapshot(1, "a")];

    merge_entries(&mut target, &mut source);

    let view: Vec<(i64, Vec<u8>)> = target
      .snapshots
      .iter()
      .map(|s| (s.timestamp, s.password.as_bytes().to_vec()))
      .collect();
    assert_eq!(
      view,
      vec![
        (1, b"a".to_vec()),
        (3, b"c".to_vec()),
        (5, b"e".to_vec()),
      ]
    );
  }

  #[test]
  fn binary_round_trip_through_fresh_database() {
    let mut db = test_db();
    let id = add_entry(&mut db, "github", false);
    db.with_entry_plaintext(id, |entry| {
      entry.push_snapshot(Snapshot {
        timestamp: 1_700_000_000,
        username: SecretBytes::from("alice"),
        password: SecretBytes::from("hunter2"),
      });
    });

    let bytes = db.serialize_binary().expect("serialize");

    let mut restored = test_db();
    restored
      .merge_from_encrypted_bytes(bytes)
      .expect("reload");

    assert_eq!(restored.count_entries(), 1);
    assert_eq!(restored.last_serialize(), db.last_serialize());
    let password = restored
      .with_entry_plaintext(id, |e| e.snapshots[0].password.to_plain_string())
      .expect("entry");
    assert_eq!(password, "hunter2");
  }

  #[test]
  fn wrong_password_on_reload() {
    let mut db = test_db();
    add_entry(&mut db, "github", false);
    let bytes = db.serialize_binary().expect("serialize");

    let mut other = Database::new(b"wrong horse battery staple".to_vec());
    assert!(matches!(
      other.merge_from_encrypted_bytes(bytes),
      Err(VaultError::WrongPassword)
    ));
    assert_eq!(other.count_entries(), 0);
  }
}
