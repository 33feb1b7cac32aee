//! Task persistence: domain types, the persistence manager, and the
//! deferred sync queue.

pub mod manager;
pub mod sync;
pub mod types;

pub use manager::TaskManager;

use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate an opaque unique id: 16 hex chars over a time + counter nonce.
pub fn new_id() -> String {
  let nanos = chrono::Utc::now()
    .timestamp_nanos_opt()
    .unwrap_or_default();
  let count = ID_COUNTER.fetch_add(1, Ordering::Relaxed);

  let mut hasher = Sha256::new();
  hasher.update(format!("{}:{}", nanos, count).as_bytes());
  let digest = hasher.finalize();

  hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_new_id_is_unique_and_fixed_length() {
    let a = new_id();
    let b = new_id();
    assert_eq!(a.len(), 16);
    assert_ne!(a, b);
  }
}
