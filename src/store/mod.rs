//! Document store abstraction with a key-value fallback backend.
//!
//! The store holds three collections (tasks, settings, analytics) as JSON
//! records with secondary indexes. The backend is picked once at
//! initialization: SQLite when it can be opened, otherwise keyed blobs in
//! the [`KvStore`](crate::kv::KvStore). Callers depend only on the
//! [`DocumentStore`] trait and cannot observe which backend served a call.

mod kv_backend;
mod sqlite;

pub use kv_backend::KvDocumentStore;
pub use sqlite::SqliteStore;

use color_eyre::Result;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

use crate::kv::KvStore;

/// The three record collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
  Tasks,
  Settings,
  Analytics,
}

impl Collection {
  /// Table / blob name for this collection.
  pub fn name(&self) -> &'static str {
    match self {
      Collection::Tasks => "tasks",
      Collection::Settings => "settings",
      Collection::Analytics => "analytics",
    }
  }
}

/// Secondary index fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexField {
  // tasks
  Category,
  Priority,
  Status,
  DueDate,
  CreatedAt,
  // analytics
  Date,
  Kind,
}

impl IndexField {
  /// Column name in the sqlite schema and field name in the JSON record.
  pub fn column(&self) -> &'static str {
    match self {
      IndexField::Category => "category",
      IndexField::Priority => "priority",
      IndexField::Status => "status",
      IndexField::DueDate => "due_date",
      IndexField::CreatedAt => "created_at",
      IndexField::Date => "date",
      IndexField::Kind => "kind",
    }
  }

  /// Whether this index exists on the given collection.
  pub fn belongs_to(&self, collection: Collection) -> bool {
    match collection {
      Collection::Tasks => matches!(
        self,
        IndexField::Category
          | IndexField::Priority
          | IndexField::Status
          | IndexField::DueDate
          | IndexField::CreatedAt
      ),
      Collection::Analytics => matches!(self, IndexField::Date | IndexField::Kind),
      Collection::Settings => false,
    }
  }
}

/// Trait for document store backends.
pub trait DocumentStore: Send + Sync {
  /// All records in a collection.
  fn get_all(&self, collection: Collection) -> Result<Vec<Value>>;

  /// A single record by key.
  fn get(&self, collection: Collection, key: &str) -> Result<Option<Value>>;

  /// Insert or replace a record under a key.
  fn put(&self, collection: Collection, key: &str, record: &Value) -> Result<()>;

  /// Delete a record. Returns whether a record was present.
  fn delete(&self, collection: Collection, key: &str) -> Result<bool>;

  /// Records whose indexed field equals `value`.
  fn query_by_index(
    &self,
    collection: Collection,
    index: IndexField,
    value: &str,
  ) -> Result<Vec<Value>>;
}

/// Open the document store, falling back to keyed blobs in the kv store
/// when sqlite is unavailable.
pub fn open(data_dir: &Path, kv: Arc<KvStore>) -> Box<dyn DocumentStore> {
  match SqliteStore::open(&data_dir.join("offtask.db")) {
    Ok(store) => Box::new(store),
    Err(e) => {
      warn!("Document store unavailable, falling back to kv storage: {}", e);
      Box::new(KvDocumentStore::new(kv))
    }
  }
}
