//! Keyed-blob document store backend over the kv store.
//!
//! Each collection is held as a single JSON object under `docs:<collection>`.
//! Index queries are full scans with a field filter; the contract matches
//! the sqlite backend apart from latency.

use color_eyre::{eyre::eyre, Result};
use serde_json::{Map, Value};
use std::sync::Arc;

use super::{Collection, DocumentStore, IndexField};
use crate::kv::KvStore;

/// Document store over [`KvStore`] blobs.
pub struct KvDocumentStore {
  kv: Arc<KvStore>,
}

impl KvDocumentStore {
  pub fn new(kv: Arc<KvStore>) -> Self {
    Self { kv }
  }

  fn blob_key(collection: Collection) -> String {
    format!("docs:{}", collection.name())
  }

  fn load(&self, collection: Collection) -> Map<String, Value> {
    self.kv.get(&Self::blob_key(collection), Map::new())
  }

  fn save(&self, collection: Collection, records: &Map<String, Value>) -> Result<()> {
    if self.kv.set(&Self::blob_key(collection), records) {
      Ok(())
    } else {
      Err(eyre!("Failed to persist collection '{}'", collection.name()))
    }
  }
}

impl DocumentStore for KvDocumentStore {
  fn get_all(&self, collection: Collection) -> Result<Vec<Value>> {
    Ok(self.load(collection).into_iter().map(|(_, v)| v).collect())
  }

  fn get(&self, collection: Collection, key: &str) -> Result<Option<Value>> {
    Ok(self.load(collection).remove(key))
  }

  fn put(&self, collection: Collection, key: &str, record: &Value) -> Result<()> {
    let mut records = self.load(collection);
    records.insert(key.to_string(), record.clone());
    self.save(collection, &records)
  }

  fn delete(&self, collection: Collection, key: &str) -> Result<bool> {
    let mut records = self.load(collection);
    let present = records.remove(key).is_some();
    if present {
      self.save(collection, &records)?;
    }
    Ok(present)
  }

  fn query_by_index(
    &self,
    collection: Collection,
    index: IndexField,
    value: &str,
  ) -> Result<Vec<Value>> {
    if !index.belongs_to(collection) {
      return Err(eyre!(
        "No index '{}' on collection '{}'",
        index.column(),
        collection.name()
      ));
    }

    let matches = self
      .load(collection)
      .into_iter()
      .map(|(_, v)| v)
      .filter(|record| {
        record
          .get(index.column())
          .and_then(|v| v.as_str())
          .map(|v| v == value)
          .unwrap_or(false)
      })
      .collect();

    Ok(matches)
  }
}
