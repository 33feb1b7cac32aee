mod config;
mod kv;
mod store;
mod tasks;
mod worker;

use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use config::Config;
use kv::KvStore;
use tasks::sync::NoopSyncHandler;
use tasks::types::{Category, Priority, Status, TaskDraft, TaskFilter};
use tasks::TaskManager;
use worker::{CacheRouter, HttpFetcher, ResponseCache};

#[derive(Parser, Debug)]
#[command(name = "offtask")]
#[command(about = "Offline-first task engine")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offtask/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Add a task
  Add {
    title: String,
    #[arg(long, default_value = "")]
    description: String,
    /// high, medium or low
    #[arg(long)]
    priority: Option<String>,
    #[arg(long)]
    category: Option<String>,
    /// Due date, YYYY-MM-DD
    #[arg(long)]
    due: Option<String>,
  },
  /// List tasks
  List {
    #[arg(long)]
    status: Option<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    search: Option<String>,
    #[arg(long)]
    due_today: bool,
  },
  /// Mark a task completed
  Done { id: String },
  /// Delete a task
  Rm { id: String },
  /// Print a full data export
  Export,
  /// Import a previously exported bundle
  Import { file: PathBuf },
  /// Remove analytics events past the retention window
  Cleanup,
  /// Drain the pending sync queue
  Sync,
  /// Pre-cache the app shell from an origin and report the cache size
  Warm {
    #[arg(long)]
    origin: Option<String>,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;
  let data_dir = config.data_dir()?;
  let _guard = init_logging(&data_dir);

  let kv = Arc::new(KvStore::open(data_dir.join("kv.json")));
  let store = store::open(&data_dir, Arc::clone(&kv));
  let manager = TaskManager::new(store, Arc::clone(&kv));
  manager.migrate_legacy().await?;

  match args.command {
    Command::Add {
      title,
      description,
      priority,
      category,
      due,
    } => {
      let draft = TaskDraft {
        title,
        description,
        priority: priority.map(Priority::from).unwrap_or_default(),
        category: category.map(Category::from).unwrap_or_default(),
        due_date: due.as_deref().map(parse_due).transpose()?,
        ..TaskDraft::default()
      };
      let task = manager.save_task(draft).await?;
      println!("Added {} ({})", task.id, task.title);
    }
    Command::List {
      status,
      category,
      search,
      due_today,
    } => {
      let filter = TaskFilter {
        status: status.map(Status::from),
        category: category.map(Category::from),
        search,
        due_today,
        ..TaskFilter::default()
      };
      let tasks = manager.get_tasks(&filter).await;
      if tasks.is_empty() {
        println!("No tasks found.");
      }
      for task in tasks {
        let due = task
          .due_date
          .map(|d| format!(" due {}", d.format("%Y-%m-%d")))
          .unwrap_or_default();
        println!(
          "{}  [{}] {}{} ({})",
          task.id,
          task.priority.as_str(),
          task.title,
          due,
          task.status.as_str()
        );
      }
    }
    Command::Done { id } => {
      if manager.complete_task(&id).await {
        println!("Completed {}", id);
      } else {
        println!("No such task: {}", id);
      }
    }
    Command::Rm { id } => {
      if manager.delete_task(&id).await {
        println!("Deleted {}", id);
      } else {
        println!("No such task: {}", id);
      }
    }
    Command::Export => {
      println!("{}", manager.export_data().await?);
    }
    Command::Import { file } => {
      let payload = std::fs::read_to_string(&file)
        .map_err(|e| eyre!("Failed to read {}: {}", file.display(), e))?;
      let imported = manager.import_data(&payload).await?;
      println!("Imported {} tasks", imported);
    }
    Command::Cleanup => {
      let removed = manager.cleanup_old_data().await;
      println!("Removed {} analytics events", removed);
    }
    Command::Sync => {
      let report = manager.process_sync_queue(&NoopSyncHandler, true).await;
      println!(
        "Synced {}/{} operations ({} re-queued)",
        report.synced, report.attempted, report.requeued
      );
    }
    Command::Warm { origin } => {
      let router_config = config.router_config(origin.as_deref())?;
      let cache = ResponseCache::open(&data_dir.join("cache.db"))?;
      let router = CacheRouter::new(cache, HttpFetcher::new()?, router_config);

      router.install().await?;
      router.activate().await?;
      println!(
        "Precached {} shell files ({} bytes cached)",
        config.worker.shell.len(),
        router.cache_size()
      );
    }
  }

  Ok(())
}

fn parse_due(raw: &str) -> Result<DateTime<Utc>> {
  let date = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
    .map_err(|e| eyre!("Invalid due date '{}': {}", raw, e))?;
  Ok(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)))
}

fn init_logging(data_dir: &Path) -> tracing_appender::non_blocking::WorkerGuard {
  let appender = tracing_appender::rolling::daily(data_dir.join("logs"), "offtask.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(writer)
    .with_ansi(false)
    .init();

  guard
}
