//! Persistence manager: CRUD, queries, analytics and import/export over
//! the document store.
//!
//! Error posture: validation failures (`save_task`, `import_data`)
//! propagate to the caller; transient storage failures are logged and
//! converted to safe defaults so UI callers never handle storage hiccups.

use chrono::{Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

use super::sync::{DrainReport, SyncHandler, SyncJob, SyncOp, SyncQueue};
use super::types::{
  escape_html, fold_for_search, truncate_chars, unescape_html, AnalyticsEvent, AnalyticsFilter,
  EventPayload, ExportBundle, Task, TaskDraft, TaskFilter, EXPORT_VERSION, MAX_DESCRIPTION_LEN,
  MAX_TITLE_LEN,
};
use crate::kv::KvStore;
use crate::store::{Collection, DocumentStore, IndexField};

/// Key the pre-document-store versions kept their flat task list under.
const LEGACY_TASKS_KEY: &str = "tasks";

/// Analytics events older than this are removed by cleanup.
const RETENTION_DAYS: i64 = 30;

/// Unified persistence facade over the document store and kv store.
pub struct TaskManager {
  store: Box<dyn DocumentStore>,
  kv: Arc<KvStore>,
  queue: SyncQueue,
}

impl TaskManager {
  /// Construct the manager over an already-opened store.
  pub fn new(store: Box<dyn DocumentStore>, kv: Arc<KvStore>) -> Self {
    let queue = SyncQueue::new(Arc::clone(&kv));
    Self { store, kv, queue }
  }

  // ==========================================================================
  // Tasks
  // ==========================================================================

  /// Validate, sanitize and persist a task.
  ///
  /// Assigns id and `created_at` when absent, refreshes `updated_at`, and
  /// records a `task_saved` analytics event. The only caller-visible
  /// failure is validation: an empty title after trimming. Sanitization is
  /// idempotent: already-escaped text (a re-imported export) comes out
  /// unchanged instead of escaping twice.
  pub async fn save_task(&self, draft: TaskDraft) -> Result<Task> {
    let title = escape_html(&unescape_html(draft.title.trim()));
    if title.is_empty() {
      return Err(eyre!("Task title must not be empty"));
    }
    let title = truncate_chars(&title, MAX_TITLE_LEN);
    let description = truncate_chars(
      &escape_html(&unescape_html(draft.description.trim())),
      MAX_DESCRIPTION_LEN,
    );

    let now = Utc::now();
    let id = match draft.id.filter(|id| !id.is_empty()) {
      Some(id) => id,
      None => super::new_id(),
    };

    let task = Task {
      id,
      title,
      description,
      category: draft.category,
      priority: draft.priority,
      status: draft.status,
      due_date: draft.due_date,
      created_at: draft.created_at.unwrap_or(now),
      updated_at: now,
      completed_at: draft.completed_at,
    };

    let record = serde_json::to_value(&task)
      .map_err(|e| eyre!("Failed to serialize task: {}", e))?;
    self.store.put(Collection::Tasks, &task.id, &record)?;

    self
      .track_event(EventPayload::TaskSaved {
        task_id: task.id.clone(),
      })
      .await;

    Ok(task)
  }

  /// A single task by id. Storage failures log and read as absent.
  pub async fn get_task(&self, id: &str) -> Option<Task> {
    match self.store.get(Collection::Tasks, id) {
      Ok(Some(record)) => serde_json::from_value(record).ok(),
      Ok(None) => None,
      Err(e) => {
        warn!("Failed to load task {}: {}", id, e);
        None
      }
    }
  }

  /// Filtered, sorted task list.
  ///
  /// Filters AND-compose. Sort: priority (high first), then due date
  /// ascending; tasks without a due date come last, newest-created first.
  /// Search is case- and accent-insensitive over title and description.
  pub async fn get_tasks(&self, filter: &TaskFilter) -> Vec<Task> {
    let records = match self.store.get_all(Collection::Tasks) {
      Ok(records) => records,
      Err(e) => {
        warn!("Failed to load tasks: {}", e);
        return Vec::new();
      }
    };

    let today = Utc::now().date_naive();
    let needle = filter
      .search
      .as_deref()
      .map(fold_for_search)
      .filter(|s| !s.is_empty());

    let mut tasks: Vec<Task> = records
      .into_iter()
      .filter_map(|record| serde_json::from_value(record).ok())
      .filter(|task: &Task| {
        if let Some(status) = filter.status {
          if task.status != status {
            return false;
          }
        }
        if let Some(category) = filter.category {
          if task.category != category {
            return false;
          }
        }
        if let Some(priority) = filter.priority {
          if task.priority != priority {
            return false;
          }
        }
        if filter.due_today {
          match task.due_date {
            Some(due) => {
              if due.date_naive() != today {
                return false;
              }
            }
            None => return false,
          }
        }
        if let Some(needle) = &needle {
          let haystack = fold_for_search(&task.title);
          let description = fold_for_search(&task.description);
          if !haystack.contains(needle.as_str()) && !description.contains(needle.as_str()) {
            return false;
          }
        }
        true
      })
      .collect();

    tasks.sort_by(|a, b| {
      a.priority
        .cmp(&b.priority)
        .then_with(|| match (a.due_date, b.due_date) {
          (Some(da), Some(db)) => da.cmp(&db),
          (Some(_), None) => Ordering::Less,
          (None, Some(_)) => Ordering::Greater,
          (None, None) => b.created_at.cmp(&a.created_at),
        })
    });

    tasks
  }

  /// Mark a task completed. Returns false when the task does not exist or
  /// the write fails.
  pub async fn complete_task(&self, id: &str) -> bool {
    let mut task = match self.get_task(id).await {
      Some(task) => task,
      None => return false,
    };

    let now = Utc::now();
    let days_to_complete = task
      .due_date
      .map(|_| (now - task.created_at).num_days());

    task.status = super::types::Status::Completed;
    task.completed_at = Some(now);
    task.updated_at = now;

    let record = match serde_json::to_value(&task) {
      Ok(record) => record,
      Err(e) => {
        warn!("Failed to serialize task {}: {}", id, e);
        return false;
      }
    };
    if let Err(e) = self.store.put(Collection::Tasks, id, &record) {
      warn!("Failed to complete task {}: {}", id, e);
      return false;
    }

    self
      .track_event(EventPayload::TaskCompleted {
        task_id: task.id,
        days_to_complete,
      })
      .await;

    true
  }

  /// Delete a task outright (no tombstone). Records `task_deleted` when a
  /// record was actually removed.
  pub async fn delete_task(&self, id: &str) -> bool {
    match self.store.delete(Collection::Tasks, id) {
      Ok(true) => {
        self
          .track_event(EventPayload::TaskDeleted {
            task_id: id.to_string(),
          })
          .await;
        true
      }
      Ok(false) => false,
      Err(e) => {
        warn!("Failed to delete task {}: {}", id, e);
        false
      }
    }
  }

  // ==========================================================================
  // Settings
  // ==========================================================================

  /// Read a setting, returning the default when absent or undecodable.
  pub async fn get_setting<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
    match self.store.get(Collection::Settings, key) {
      Ok(Some(record)) => record
        .get("value")
        .cloned()
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or(default),
      Ok(None) => default,
      Err(e) => {
        warn!("Failed to load setting '{}': {}", key, e);
        default
      }
    }
  }

  /// Write a setting. Last write wins; returns false on storage failure.
  pub async fn set_setting<T: Serialize>(&self, key: &str, value: &T) -> bool {
    let value = match serde_json::to_value(value) {
      Ok(value) => value,
      Err(e) => {
        warn!("Failed to serialize setting '{}': {}", key, e);
        return false;
      }
    };

    let record = json!({ "key": key, "value": value });
    match self.store.put(Collection::Settings, key, &record) {
      Ok(()) => true,
      Err(e) => {
        warn!("Failed to store setting '{}': {}", key, e);
        false
      }
    }
  }

  // ==========================================================================
  // Analytics
  // ==========================================================================

  /// Append an analytics event. Never raises: returns false on failure.
  ///
  /// `date` and `timestamp` are stamped in UTC: range filters and the
  /// retention cutoff compare in the same timescale regardless of the
  /// machine's offset. Local-time presentation is a display concern.
  pub async fn track_event(&self, payload: EventPayload) -> bool {
    let now = Utc::now();
    let event = AnalyticsEvent {
      id: super::new_id(),
      kind: payload.kind().to_string(),
      data: payload.data(),
      date: now,
      timestamp: now.timestamp_millis(),
    };

    let record = match serde_json::to_value(&event) {
      Ok(record) => record,
      Err(e) => {
        warn!("Failed to serialize analytics event: {}", e);
        return false;
      }
    };

    match self.store.put(Collection::Analytics, &event.id, &record) {
      Ok(()) => true,
      Err(e) => {
        warn!("Failed to store analytics event: {}", e);
        false
      }
    }
  }

  /// Events filtered by kind and an inclusive date range. A kind filter
  /// goes through the secondary index; the date range filters in memory.
  pub async fn get_analytics(&self, filter: &AnalyticsFilter) -> Vec<AnalyticsEvent> {
    let loaded = match &filter.kind {
      Some(kind) => self
        .store
        .query_by_index(Collection::Analytics, IndexField::Kind, kind),
      None => self.store.get_all(Collection::Analytics),
    };
    let records = match loaded {
      Ok(records) => records,
      Err(e) => {
        warn!("Failed to load analytics: {}", e);
        return Vec::new();
      }
    };

    let mut events: Vec<AnalyticsEvent> = records
      .into_iter()
      .filter_map(|record| serde_json::from_value(record).ok())
      .filter(|event: &AnalyticsEvent| {
        if let Some(from) = filter.from {
          if event.date < from {
            return false;
          }
        }
        if let Some(to) = filter.to {
          if event.date > to {
            return false;
          }
        }
        true
      })
      .collect();

    events.sort_by_key(|event| event.timestamp);
    events
  }

  /// Delete analytics events older than the retention window. Returns the
  /// number removed.
  pub async fn cleanup_old_data(&self) -> usize {
    let threshold = Utc::now() - Duration::days(RETENTION_DAYS);

    let records = match self.store.get_all(Collection::Analytics) {
      Ok(records) => records,
      Err(e) => {
        warn!("Failed to load analytics for cleanup: {}", e);
        return 0;
      }
    };

    let mut removed = 0;
    for record in records {
      let event: AnalyticsEvent = match serde_json::from_value(record) {
        Ok(event) => event,
        Err(_) => continue,
      };
      if event.date < threshold {
        match self.store.delete(Collection::Analytics, &event.id) {
          Ok(true) => removed += 1,
          Ok(false) => {}
          Err(e) => warn!("Failed to remove analytics event {}: {}", event.id, e),
        }
      }
    }

    debug!("Cleaned up {} analytics events", removed);
    removed
  }

  // ==========================================================================
  // Import / export
  // ==========================================================================

  /// Serialize the full data snapshot to a transmissible JSON document.
  pub async fn export_data(&self) -> Result<String> {
    let tasks: Vec<Task> = self
      .store
      .get_all(Collection::Tasks)?
      .into_iter()
      .filter_map(|record| serde_json::from_value(record).ok())
      .collect();

    let mut settings = Map::new();
    for record in self.store.get_all(Collection::Settings)? {
      if let (Some(key), Some(value)) = (
        record.get("key").and_then(|k| k.as_str()),
        record.get("value"),
      ) {
        settings.insert(key.to_string(), value.clone());
      }
    }

    let analytics: Vec<AnalyticsEvent> = self
      .store
      .get_all(Collection::Analytics)?
      .into_iter()
      .filter_map(|record| serde_json::from_value(record).ok())
      .collect();

    let bundle = ExportBundle {
      tasks,
      settings,
      analytics,
      export_date: Utc::now(),
      version: EXPORT_VERSION,
    };

    serde_json::to_string_pretty(&bundle).map_err(|e| eyre!("Failed to serialize export: {}", e))
  }

  /// Import a bundle produced by [`export_data`](Self::export_data).
  ///
  /// Fails with a format error when `tasks` is missing or not an array.
  /// Every task goes back through [`save_task`](Self::save_task) and every
  /// setting through [`set_setting`](Self::set_setting), so imported data
  /// is re-validated. Returns the number of tasks imported.
  pub async fn import_data(&self, payload: &str) -> Result<usize> {
    let value: Value =
      serde_json::from_str(payload).map_err(|e| eyre!("Invalid import payload: {}", e))?;

    let tasks = value
      .get("tasks")
      .and_then(|tasks| tasks.as_array())
      .ok_or_else(|| eyre!("Invalid import payload: 'tasks' must be an array"))?;

    let mut imported = 0;
    for task in tasks {
      let draft: TaskDraft = serde_json::from_value(task.clone())
        .map_err(|e| eyre!("Invalid task in import payload: {}", e))?;
      self.save_task(draft).await?;
      imported += 1;
    }

    if let Some(settings) = value.get("settings").and_then(|s| s.as_object()) {
      for (key, setting) in settings {
        self.set_setting(key, setting).await;
      }
    }

    self
      .track_event(EventPayload::DataImported {
        task_count: imported,
      })
      .await;

    Ok(imported)
  }

  // ==========================================================================
  // Legacy migration
  // ==========================================================================

  /// One-time migration of the flat kv task list into the document store.
  ///
  /// Idempotent: the legacy key is removed afterwards, so a second run is
  /// a no-op. Returns the number of tasks migrated.
  pub async fn migrate_legacy(&self) -> Result<usize> {
    if !self.kv.contains(LEGACY_TASKS_KEY) {
      return Ok(0);
    }

    let legacy: Vec<Value> = self.kv.get(LEGACY_TASKS_KEY, Vec::new());
    let mut migrated = 0;

    for record in legacy {
      let draft: TaskDraft = match serde_json::from_value(record) {
        Ok(draft) => draft,
        Err(e) => {
          warn!("Skipping unreadable legacy task: {}", e);
          continue;
        }
      };
      match self.save_task(draft).await {
        Ok(_) => migrated += 1,
        Err(e) => warn!("Skipping invalid legacy task: {}", e),
      }
    }

    self.kv.remove(LEGACY_TASKS_KEY);
    debug!("Migrated {} legacy tasks", migrated);

    Ok(migrated)
  }

  // ==========================================================================
  // Sync queue
  // ==========================================================================

  /// Queue a deferred sync operation.
  pub fn add_to_sync_queue(&self, op: SyncOp) -> SyncJob {
    self.queue.enqueue(op)
  }

  /// Drain the sync queue. A no-op while offline or empty; failed
  /// operations are re-queued for the next drain.
  pub async fn process_sync_queue(&self, handler: &dyn SyncHandler, online: bool) -> DrainReport {
    self.queue.drain(handler, online).await
  }

  /// Number of queued sync operations.
  pub fn pending_sync_ops(&self) -> usize {
    self.queue.len()
  }
}
