//! Task domain types.
//!
//! Enum fields parse leniently: the original data set carries Portuguese
//! labels (`alta`, `financas`, ...) next to the English ones, and anything
//! unrecognized coerces to the variant's default instead of failing a load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Maximum title length in characters, after trimming and escaping.
pub const MAX_TITLE_LEN: usize = 100;
/// Maximum description length in characters.
pub const MAX_DESCRIPTION_LEN: usize = 500;

/// Task priority. Variant order is the sort order (high first).
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Priority {
  High,
  #[default]
  Medium,
  Low,
}

impl Priority {
  pub fn as_str(&self) -> &'static str {
    match self {
      Priority::High => "high",
      Priority::Medium => "medium",
      Priority::Low => "low",
    }
  }
}

impl From<String> for Priority {
  fn from(s: String) -> Self {
    match s.trim().to_lowercase().as_str() {
      "high" | "alta" => Priority::High,
      "low" | "baixa" => Priority::Low,
      "medium" | "media" | "média" => Priority::Medium,
      _ => Priority::Medium,
    }
  }
}

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Status {
  #[default]
  Pending,
  Completed,
  Archived,
}

impl Status {
  pub fn as_str(&self) -> &'static str {
    match self {
      Status::Pending => "pending",
      Status::Completed => "completed",
      Status::Archived => "archived",
    }
  }
}

impl From<String> for Status {
  fn from(s: String) -> Self {
    match s.trim().to_lowercase().as_str() {
      "completed" | "concluida" | "concluída" => Status::Completed,
      "archived" | "arquivada" => Status::Archived,
      "pending" | "pendente" => Status::Pending,
      _ => Status::Pending,
    }
  }
}

/// Fixed category set. Unknown values coerce to `Other`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum Category {
  Work,
  Personal,
  Study,
  Finance,
  Health,
  #[default]
  Other,
}

impl Category {
  pub fn as_str(&self) -> &'static str {
    match self {
      Category::Work => "work",
      Category::Personal => "personal",
      Category::Study => "study",
      Category::Finance => "finance",
      Category::Health => "health",
      Category::Other => "other",
    }
  }
}

impl From<String> for Category {
  fn from(s: String) -> Self {
    match s.trim().to_lowercase().as_str() {
      "work" | "trabalho" => Category::Work,
      "personal" | "pessoal" => Category::Personal,
      "study" | "estudos" | "estudo" => Category::Study,
      "finance" | "financas" | "finanças" => Category::Finance,
      "health" | "saude" | "saúde" => Category::Health,
      _ => Category::Other,
    }
  }
}

/// A persisted task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
  pub id: String,
  pub title: String,
  #[serde(default)]
  pub description: String,
  pub category: Category,
  pub priority: Priority,
  pub status: Status,
  #[serde(default)]
  pub due_date: Option<DateTime<Utc>>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  #[serde(default)]
  pub completed_at: Option<DateTime<Utc>>,
}

/// Caller input for a save. Everything but the title is optional; ids and
/// timestamps are assigned on first save.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskDraft {
  #[serde(default)]
  pub id: Option<String>,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub category: Category,
  #[serde(default)]
  pub priority: Priority,
  #[serde(default)]
  pub status: Status,
  #[serde(default)]
  pub due_date: Option<DateTime<Utc>>,
  #[serde(default)]
  pub created_at: Option<DateTime<Utc>>,
  #[serde(default)]
  pub completed_at: Option<DateTime<Utc>>,
}

impl From<Task> for TaskDraft {
  fn from(task: Task) -> Self {
    Self {
      id: Some(task.id),
      title: task.title,
      description: task.description,
      category: task.category,
      priority: task.priority,
      status: task.status,
      due_date: task.due_date,
      created_at: Some(task.created_at),
      completed_at: task.completed_at,
    }
  }
}

/// AND-composed task list filters.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
  pub status: Option<Status>,
  pub category: Option<Category>,
  pub priority: Option<Priority>,
  pub due_today: bool,
  pub search: Option<String>,
}

/// Analytics filters: kind plus an inclusive date range.
#[derive(Debug, Clone, Default)]
pub struct AnalyticsFilter {
  pub kind: Option<String>,
  pub from: Option<DateTime<Utc>>,
  pub to: Option<DateTime<Utc>>,
}

/// An appended analytics event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsEvent {
  pub id: String,
  pub kind: String,
  pub data: Value,
  pub date: DateTime<Utc>,
  /// Epoch milliseconds, for cheap range comparisons.
  pub timestamp: i64,
}

/// Discriminated event payloads for the kinds the engine knows about, with
/// an opaque escape hatch for free-form events.
#[derive(Debug, Clone)]
pub enum EventPayload {
  TaskSaved {
    task_id: String,
  },
  TaskCompleted {
    task_id: String,
    days_to_complete: Option<i64>,
  },
  TaskDeleted {
    task_id: String,
  },
  DataImported {
    task_count: usize,
  },
  Custom {
    kind: String,
    data: Value,
  },
}

impl EventPayload {
  /// The event type tag.
  pub fn kind(&self) -> &str {
    match self {
      EventPayload::TaskSaved { .. } => "task_saved",
      EventPayload::TaskCompleted { .. } => "task_completed",
      EventPayload::TaskDeleted { .. } => "task_deleted",
      EventPayload::DataImported { .. } => "data_imported",
      EventPayload::Custom { kind, .. } => kind,
    }
  }

  /// The JSON payload carried by the event.
  pub fn data(&self) -> Value {
    match self {
      EventPayload::TaskSaved { task_id } => serde_json::json!({ "task_id": task_id }),
      EventPayload::TaskCompleted {
        task_id,
        days_to_complete,
      } => serde_json::json!({ "task_id": task_id, "days_to_complete": days_to_complete }),
      EventPayload::TaskDeleted { task_id } => serde_json::json!({ "task_id": task_id }),
      EventPayload::DataImported { task_count } => {
        serde_json::json!({ "task_count": task_count })
      }
      EventPayload::Custom { data, .. } => data.clone(),
    }
  }
}

/// Schema version written into export bundles.
pub const EXPORT_VERSION: u32 = 1;

/// Full data snapshot for export/import.
#[derive(Debug, Serialize, Deserialize)]
pub struct ExportBundle {
  pub tasks: Vec<Task>,
  pub settings: Map<String, Value>,
  pub analytics: Vec<AnalyticsEvent>,
  pub export_date: DateTime<Utc>,
  pub version: u32,
}

/// Undo [`escape_html`]. `&amp;` goes last so compound entities collapse
/// one level per pass.
pub fn unescape_html(input: &str) -> String {
  input
    .replace("&lt;", "<")
    .replace("&gt;", ">")
    .replace("&quot;", "\"")
    .replace("&#39;", "'")
    .replace("&amp;", "&")
}

/// Escape HTML-significant characters.
pub fn escape_html(input: &str) -> String {
  let mut out = String::with_capacity(input.len());
  for c in input.chars() {
    match c {
      '&' => out.push_str("&amp;"),
      '<' => out.push_str("&lt;"),
      '>' => out.push_str("&gt;"),
      '"' => out.push_str("&quot;"),
      '\'' => out.push_str("&#39;"),
      _ => out.push(c),
    }
  }
  out
}

/// Normalize text for search: lowercase and strip Latin diacritics.
pub fn fold_for_search(input: &str) -> String {
  input
    .to_lowercase()
    .chars()
    .map(|c| match c {
      'á' | 'à' | 'â' | 'ã' | 'ä' | 'å' => 'a',
      'é' | 'è' | 'ê' | 'ë' => 'e',
      'í' | 'ì' | 'î' | 'ï' => 'i',
      'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
      'ú' | 'ù' | 'û' | 'ü' => 'u',
      'ý' | 'ÿ' => 'y',
      'ç' => 'c',
      'ñ' => 'n',
      _ => c,
    })
    .collect()
}

/// Truncate to at most `max` characters (not bytes).
pub fn truncate_chars(input: &str, max: usize) -> String {
  input.chars().take(max).collect()
}
