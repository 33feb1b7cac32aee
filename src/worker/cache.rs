//! Named, versioned response cache generations.
//!
//! Entries live in one of three generations per app version
//! (`<app>-v<version>-static`, `-dynamic`, `-runtime`). The router owns the
//! generation lifecycle; anything else in the app namespace that is not a
//! current generation is stale and gets purged on activation.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

use super::fetch::{Request, Response};

/// Current generation names for one app version.
#[derive(Debug, Clone)]
pub struct CacheNames {
  app: String,
  version: String,
}

impl CacheNames {
  pub fn new(app: &str, version: &str) -> Self {
    Self {
      app: app.to_string(),
      version: version.to_string(),
    }
  }

  pub fn static_gen(&self) -> String {
    format!("{}-v{}-static", self.app, self.version)
  }

  pub fn dynamic_gen(&self) -> String {
    format!("{}-v{}-dynamic", self.app, self.version)
  }

  pub fn runtime_gen(&self) -> String {
    format!("{}-v{}-runtime", self.app, self.version)
  }

  /// The three current generation names.
  pub fn current(&self) -> [String; 3] {
    [self.static_gen(), self.dynamic_gen(), self.runtime_gen()]
  }

  /// Whether a generation belongs to this application's namespace.
  pub fn owns(&self, generation: &str) -> bool {
    generation.starts_with(&format!("{}-", self.app))
  }

  /// Owned by this app but not one of the current three.
  pub fn is_stale(&self, generation: &str) -> bool {
    self.owns(generation) && !self.current().contains(&generation.to_string())
  }
}

/// Schema for cached response snapshots.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS response_cache (
    generation TEXT NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (generation, request_key)
);

CREATE INDEX IF NOT EXISTS idx_response_cache_key ON response_cache(request_key);
"#;

/// SQLite-backed response cache.
pub struct ResponseCache {
  conn: Mutex<Connection>,
}

impl ResponseCache {
  /// Open or create the cache at the given path.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    let cache = Self {
      conn: Mutex::new(conn),
    };
    cache.run_migrations()?;

    Ok(cache)
  }

  /// In-memory cache for tests.
  pub fn in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache: {}", e))?;

    let cache = Self {
      conn: Mutex::new(conn),
    };
    cache.run_migrations()?;

    Ok(cache)
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(())
  }

  /// Store a response snapshot under a generation.
  pub fn put(&self, generation: &str, request: &Request, response: &Response) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO response_cache
           (generation, request_key, url, status, content_type, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          generation,
          request.identity(),
          request.url.as_str(),
          response.status,
          response.content_type,
          response.body
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    Ok(())
  }

  /// Look up a response in one generation.
  pub fn get(&self, generation: &str, request: &Request) -> Result<Option<Response>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT status, content_type, body FROM response_cache
         WHERE generation = ? AND request_key = ?",
      )
      .map_err(|e| eyre!("Failed to prepare cache lookup: {}", e))?;

    let entry = stmt
      .query_row(params![generation, request.identity()], |row| {
        Ok(Response {
          status: row.get(0)?,
          content_type: row.get(1)?,
          body: row.get(2)?,
        })
      })
      .ok();

    Ok(entry)
  }

  /// Look up a response across every generation (newest write wins).
  ///
  /// Ordered by rowid, not `cached_at`: `datetime('now')` has one-second
  /// granularity, while every insert (including a REPLACE) gets a fresh,
  /// larger rowid.
  pub fn match_any(&self, request: &Request) -> Result<Option<Response>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare(
        "SELECT status, content_type, body FROM response_cache
         WHERE request_key = ?
         ORDER BY rowid DESC
         LIMIT 1",
      )
      .map_err(|e| eyre!("Failed to prepare cache lookup: {}", e))?;

    let entry = stmt
      .query_row(params![request.identity()], |row| {
        Ok(Response {
          status: row.get(0)?,
          content_type: row.get(1)?,
          body: row.get(2)?,
        })
      })
      .ok();

    Ok(entry)
  }

  /// Every generation name currently holding entries.
  pub fn generation_names(&self) -> Result<Vec<String>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let mut stmt = conn
      .prepare("SELECT DISTINCT generation FROM response_cache")
      .map_err(|e| eyre!("Failed to prepare generation query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list generations: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  /// Drop every entry in a generation.
  pub fn delete_generation(&self, generation: &str) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute(
        "DELETE FROM response_cache WHERE generation = ?",
        params![generation],
      )
      .map_err(|e| eyre!("Failed to delete generation '{}': {}", generation, e))?;

    Ok(())
  }

  /// Total stored body bytes in one generation.
  pub fn generation_size(&self, generation: &str) -> Result<u64> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let size: i64 = conn
      .query_row(
        "SELECT COALESCE(SUM(LENGTH(body)), 0) FROM response_cache WHERE generation = ?",
        params![generation],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to size generation '{}': {}", generation, e))?;

    Ok(size as u64)
  }
}
