//! SQLite document store backend.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use serde_json::Value;
use std::path::Path;
use std::sync::Mutex;

use super::{Collection, DocumentStore, IndexField};

/// Current schema version, stored in `PRAGMA user_version`.
///
/// Bumps are additive only: migrations may create missing tables and
/// indexes but never drop existing data.
const SCHEMA_VERSION: i64 = 1;

/// Schema for the three collections and their secondary indexes.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    category TEXT,
    priority TEXT,
    status TEXT,
    due_date TEXT,
    created_at TEXT,
    data BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_category ON tasks(category);
CREATE INDEX IF NOT EXISTS idx_tasks_priority ON tasks(priority);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
CREATE INDEX IF NOT EXISTS idx_tasks_due_date ON tasks(due_date);
CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks(created_at);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    data BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS analytics (
    id TEXT PRIMARY KEY,
    date TEXT,
    kind TEXT,
    data BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_analytics_date ON analytics(date);
CREATE INDEX IF NOT EXISTS idx_analytics_kind ON analytics(kind);
"#;

/// SQLite-backed document store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open or create the store at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create store directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open store database at {}: {}", path.display(), e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  /// In-memory store for tests.
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;

    let store = Self {
      conn: Mutex::new(conn),
    };
    store.run_migrations()?;

    Ok(store)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let version: i64 = conn
      .query_row("PRAGMA user_version", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to read schema version: {}", e))?;

    // Additive: creates anything missing, leaves existing data alone.
    conn
      .execute_batch(SCHEMA)
      .map_err(|e| eyre!("Failed to run store migrations: {}", e))?;

    if version < SCHEMA_VERSION {
      conn
        .execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))
        .map_err(|e| eyre!("Failed to set schema version: {}", e))?;
    }

    Ok(())
  }

  /// Pull the indexed column values for a record out of its JSON form.
  fn index_columns(collection: Collection, record: &Value) -> Vec<Option<String>> {
    let field = |name: &str| {
      record
        .get(name)
        .and_then(|v| v.as_str())
        .map(String::from)
    };

    match collection {
      Collection::Tasks => vec![
        field("category"),
        field("priority"),
        field("status"),
        field("due_date"),
        field("created_at"),
      ],
      Collection::Analytics => vec![field("date"), field("kind")],
      Collection::Settings => vec![],
    }
  }
}

impl DocumentStore for SqliteStore {
  fn get_all(&self, collection: Collection) -> Result<Vec<Value>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(&format!("SELECT data FROM {}", collection.name()))
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let records: Vec<Value> = stmt
      .query_map([], |row| {
        let data: Vec<u8> = row.get(0)?;
        Ok(data)
      })
      .map_err(|e| eyre!("Failed to query {}: {}", collection.name(), e))?
      .filter_map(|r| r.ok())
      .filter_map(|data| serde_json::from_slice(&data).ok())
      .collect();

    Ok(records)
  }

  fn get(&self, collection: Collection, key: &str) -> Result<Option<Value>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let key_column = match collection {
      Collection::Settings => "key",
      _ => "id",
    };

    let mut stmt = conn
      .prepare(&format!(
        "SELECT data FROM {} WHERE {} = ?",
        collection.name(),
        key_column
      ))
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let data: Option<Vec<u8>> = stmt.query_row(params![key], |row| row.get(0)).ok();

    match data {
      Some(data) => {
        let record = serde_json::from_slice(&data)
          .map_err(|e| eyre!("Failed to decode record: {}", e))?;
        Ok(Some(record))
      }
      None => Ok(None),
    }
  }

  fn put(&self, collection: Collection, key: &str, record: &Value) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let data =
      serde_json::to_vec(record).map_err(|e| eyre!("Failed to serialize record: {}", e))?;
    let indexed = Self::index_columns(collection, record);

    match collection {
      Collection::Tasks => {
        conn
          .execute(
            "INSERT OR REPLACE INTO tasks (id, category, priority, status, due_date, created_at, data)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![key, indexed[0], indexed[1], indexed[2], indexed[3], indexed[4], data],
          )
          .map_err(|e| eyre!("Failed to store task: {}", e))?;
      }
      Collection::Settings => {
        conn
          .execute(
            "INSERT OR REPLACE INTO settings (key, data) VALUES (?, ?)",
            params![key, data],
          )
          .map_err(|e| eyre!("Failed to store setting: {}", e))?;
      }
      Collection::Analytics => {
        conn
          .execute(
            "INSERT OR REPLACE INTO analytics (id, date, kind, data) VALUES (?, ?, ?, ?)",
            params![key, indexed[0], indexed[1], data],
          )
          .map_err(|e| eyre!("Failed to store analytics event: {}", e))?;
      }
    }

    Ok(())
  }

  fn delete(&self, collection: Collection, key: &str) -> Result<bool> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let key_column = match collection {
      Collection::Settings => "key",
      _ => "id",
    };

    let removed = conn
      .execute(
        &format!("DELETE FROM {} WHERE {} = ?", collection.name(), key_column),
        params![key],
      )
      .map_err(|e| eyre!("Failed to delete from {}: {}", collection.name(), e))?;

    Ok(removed > 0)
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

    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(&format!(
        "SELECT data FROM {} WHERE {} = ?",
        collection.name(),
        index.column()
      ))
      .map_err(|e| eyre!("Failed to prepare index query: {}", e))?;

    let records: Vec<Value> = stmt
      .query_map(params![value], |row| {
        let data: Vec<u8> = row.get(0)?;
        Ok(data)
      })
      .map_err(|e| eyre!("Failed to query index: {}", e))?
      .filter_map(|r| r.ok())
      .filter_map(|data| serde_json::from_slice(&data).ok())
      .collect();

    Ok(records)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_put_get_roundtrip() {
    let store = SqliteStore::in_memory().unwrap();
    let record = json!({"id": "t1", "status": "pending", "title": "hello"});

    store.put(Collection::Tasks, "t1", &record).unwrap();
    let loaded = store.get(Collection::Tasks, "t1").unwrap();
    assert_eq!(loaded, Some(record));
  }

  #[test]
  fn test_get_all_returns_every_record() {
    let store = SqliteStore::in_memory().unwrap();
    store
      .put(Collection::Tasks, "a", &json!({"id": "a"}))
      .unwrap();
    store
      .put(Collection::Tasks, "b", &json!({"id": "b"}))
      .unwrap();

    assert_eq!(store.get_all(Collection::Tasks).unwrap().len(), 2);
  }

  #[test]
  fn test_delete_reports_presence() {
    let store = SqliteStore::in_memory().unwrap();
    store
      .put(Collection::Tasks, "a", &json!({"id": "a"}))
      .unwrap();

    assert!(store.delete(Collection::Tasks, "a").unwrap());
    assert!(!store.delete(Collection::Tasks, "a").unwrap());
  }

  #[test]
  fn test_query_by_index() {
    let store = SqliteStore::in_memory().unwrap();
    store
      .put(
        Collection::Tasks,
        "a",
        &json!({"id": "a", "status": "pending"}),
      )
      .unwrap();
    store
      .put(
        Collection::Tasks,
        "b",
        &json!({"id": "b", "status": "completed"}),
      )
      .unwrap();

    let pending = store
      .query_by_index(Collection::Tasks, IndexField::Status, "pending")
      .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0]["id"], "a");
  }

  #[test]
  fn test_query_by_index_rejects_foreign_index() {
    let store = SqliteStore::in_memory().unwrap();
    assert!(store
      .query_by_index(Collection::Analytics, IndexField::Priority, "high")
      .is_err());
  }

  #[test]
  fn test_reopen_preserves_data_and_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");

    let store = SqliteStore::open(&path).unwrap();
    store
      .put(Collection::Settings, "theme", &json!("dark"))
      .unwrap();
    drop(store);

    let store = SqliteStore::open(&path).unwrap();
    assert_eq!(
      store.get(Collection::Settings, "theme").unwrap(),
      Some(json!("dark"))
    );
  }
}
