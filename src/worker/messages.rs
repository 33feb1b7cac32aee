//! Cross-context control protocol and background sync seam.

use color_eyre::Result;
use futures::future::BoxFuture;
use tokio::sync::oneshot;

/// Sync tag for pending task pushes.
pub const SYNC_TASKS_TAG: &str = "sync-tasks";
/// Sync tag for pending analytics pushes.
pub const SYNC_ANALYTICS_TAG: &str = "sync-analytics";

/// Control messages accepted by the router.
#[derive(Debug)]
pub enum WorkerMessage {
  /// Activate immediately instead of waiting for old instances to close.
  SkipWaiting,
  /// Opportunistically fetch and cache a URL list (best effort, no reply).
  CacheUrls { urls: Vec<String> },
  /// Delete every generation in this application's namespace.
  ClearCache,
  /// Reply with the total byte size of all namespaced cached responses.
  GetCacheSize { reply: oneshot::Sender<WorkerReply> },
}

/// Replies sent over a message's reply channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerReply {
  CacheSize { bytes: u64 },
}

/// Events broadcast to every open client context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
  /// The router took control of existing contexts after activation.
  Claimed,
  /// A background sync pass finished.
  SyncComplete { tag: String, synced: usize },
}

/// One pending item in a background sync pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingItem {
  pub id: String,
}

/// Source of pending items for background sync.
///
/// A full deployment would read these from the persistence manager's
/// durable store; no remote endpoint exists yet, so the shipped source is
/// empty.
pub trait SyncSource: Send + Sync {
  /// Pending items for a sync tag.
  fn pending(&self, tag: &str) -> Vec<PendingItem>;

  /// Push one item to the remote.
  fn sync_item(&self, item: &PendingItem) -> BoxFuture<'static, Result<()>>;

  /// Mark an item as synced so it is not retried.
  fn mark_synced(&self, item: &PendingItem);
}

/// Placeholder source: nothing pending.
pub struct EmptySyncSource;

impl SyncSource for EmptySyncSource {
  fn pending(&self, _tag: &str) -> Vec<PendingItem> {
    Vec::new()
  }

  fn sync_item(&self, _item: &PendingItem) -> BoxFuture<'static, Result<()>> {
    Box::pin(async { Ok(()) })
  }

  fn mark_synced(&self, _item: &PendingItem) {}
}
