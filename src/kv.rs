//! Synchronous key-value store with JSON (de)serialization.
//!
//! Used directly for small scalar settings and flags, and as the degraded
//! backend when the document store cannot be opened. Operations never
//! surface errors to callers: failures are logged and converted to the
//! caller-provided default (`get`) or a `false` flag (`set`/`remove`/`clear`).

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

/// File-backed JSON key-value store.
pub struct KvStore {
  entries: Mutex<BTreeMap<String, String>>,
  path: Option<PathBuf>,
}

impl KvStore {
  /// Open the store backed by the given file, loading existing contents.
  ///
  /// A missing file starts empty; an unreadable or corrupt file is logged
  /// and treated as empty rather than failing the caller.
  pub fn open(path: PathBuf) -> Self {
    let entries = match std::fs::read_to_string(&path) {
      Ok(contents) => match serde_json::from_str(&contents) {
        Ok(map) => map,
        Err(e) => {
          warn!("Discarding corrupt kv file {}: {}", path.display(), e);
          BTreeMap::new()
        }
      },
      Err(_) => BTreeMap::new(),
    };

    Self {
      entries: Mutex::new(entries),
      path: Some(path),
    }
  }

  /// Create a store with no backing file.
  pub fn in_memory() -> Self {
    Self {
      entries: Mutex::new(BTreeMap::new()),
      path: None,
    }
  }

  fn lock(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
    match self.entries.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    }
  }

  /// Get a value by key, returning `default` when absent or undecodable.
  pub fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
    let entries = self.lock();
    match entries.get(key) {
      Some(raw) => match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(e) => {
          warn!("Failed to decode kv entry '{}': {}", key, e);
          default
        }
      },
      None => default,
    }
  }

  /// Store a value under a key. Returns false on serialization or flush
  /// failure.
  pub fn set<T: Serialize>(&self, key: &str, value: &T) -> bool {
    let raw = match serde_json::to_string(value) {
      Ok(raw) => raw,
      Err(e) => {
        warn!("Failed to serialize kv entry '{}': {}", key, e);
        return false;
      }
    };

    let mut entries = self.lock();
    entries.insert(key.to_string(), raw);
    self.flush(&entries)
  }

  /// Remove a key. Returns false only when the removal could not be
  /// persisted.
  pub fn remove(&self, key: &str) -> bool {
    let mut entries = self.lock();
    entries.remove(key);
    self.flush(&entries)
  }

  /// Whether a key is present.
  pub fn contains(&self, key: &str) -> bool {
    self.lock().contains_key(key)
  }

  /// Remove every entry.
  pub fn clear(&self) -> bool {
    let mut entries = self.lock();
    entries.clear();
    self.flush(&entries)
  }

  /// Total byte length of every stored key + value pair.
  ///
  /// Reporting only; nothing evicts based on this.
  pub fn size(&self) -> u64 {
    self
      .lock()
      .iter()
      .map(|(k, v)| (k.len() + v.len()) as u64)
      .sum()
  }

  fn flush(&self, entries: &BTreeMap<String, String>) -> bool {
    let path = match &self.path {
      Some(path) => path,
      None => return true,
    };

    if let Some(parent) = path.parent() {
      if let Err(e) = std::fs::create_dir_all(parent) {
        warn!("Failed to create kv directory {}: {}", parent.display(), e);
        return false;
      }
    }

    let contents = match serde_json::to_string_pretty(entries) {
      Ok(contents) => contents,
      Err(e) => {
        warn!("Failed to serialize kv store: {}", e);
        return false;
      }
    };

    match std::fs::write(path, contents) {
      Ok(()) => true,
      Err(e) => {
        warn!("Failed to write kv file {}: {}", path.display(), e);
        false
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_get_returns_default_when_absent() {
    let kv = KvStore::in_memory();
    assert_eq!(kv.get("missing", 42), 42);
  }

  #[test]
  fn test_set_then_get() {
    let kv = KvStore::in_memory();
    assert!(kv.set("theme", &"dark".to_string()));
    assert_eq!(kv.get("theme", String::new()), "dark");
  }

  #[test]
  fn test_remove_and_clear() {
    let kv = KvStore::in_memory();
    kv.set("a", &1);
    kv.set("b", &2);
    assert!(kv.remove("a"));
    assert_eq!(kv.get("a", 0), 0);
    assert!(kv.clear());
    assert_eq!(kv.get("b", 0), 0);
  }

  #[test]
  fn test_size_counts_key_and_value_bytes() {
    let kv = KvStore::in_memory();
    kv.set("ab", &7);
    // key "ab" (2) + value "7" (1)
    assert_eq!(kv.size(), 3);
  }

  #[test]
  fn test_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kv.json");

    let kv = KvStore::open(path.clone());
    kv.set("counter", &5);
    drop(kv);

    let kv = KvStore::open(path);
    assert_eq!(kv.get("counter", 0), 5);
  }

  #[test]
  fn test_corrupt_file_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kv.json");
    std::fs::write(&path, "not json").unwrap();

    let kv = KvStore::open(path);
    assert_eq!(kv.get("anything", 0), 0);
  }
}
