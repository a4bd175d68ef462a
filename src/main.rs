mod api;
mod app;
mod commands;
mod config;
mod error;
mod event;
mod logging;
mod provider;
mod store;
mod sync;
mod ui;
mod worker;

use chrono::Utc;
use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use api::{ApiClient, Method};
use provider::{OfflineProvider, ProviderSettings};
use store::{CachePolicy, Collection, DurableStore, PendingMutation, SqliteStore, StoreExt};
use worker::{FetchSource, NativePlatform, SyncReport, WriteOutcome};

#[derive(Parser, Debug)]
#[command(name = "hacienda")]
#[command(about = "Offline-first client for the hacienda API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/hacienda/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
  /// Terminal status view (the default)
  Status,
  /// Read a resource, falling back to the offline cache
  Get { path: String },
  /// Write a resource; queued for later when the API is unreachable
  Send {
    /// POST, PUT, PATCH or DELETE
    method: Method,
    path: String,
    /// JSON request body
    #[arg(short, long)]
    data: Option<String>,
  },
  /// Inspect the queue of unsent changes
  #[command(subcommand)]
  Queue(QueueCmd),
  /// Replay queued changes now and print the report
  Sync,
  /// Maintain the read cache
  #[command(subcommand)]
  Cache(CacheCmd),
}

impl Cmd {
  fn is_local(&self) -> bool {
    matches!(self, Cmd::Queue(_) | Cmd::Cache(_))
  }
}

#[derive(Subcommand, Debug)]
enum QueueCmd {
  /// List queued changes, oldest first
  List,
  /// Drop a queued change without sending it
  Discard { id: Uuid },
}

#[derive(Subcommand, Debug)]
enum CacheCmd {
  /// Drop expired entries and trim to the size limit
  Prune,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;

  let interactive = matches!(args.command, None | Some(Cmd::Status));
  let _log_guards = logging::init(&config.data_dir()?.join("logs"), !interactive)?;

  if let Some(command) = args.command.as_ref().filter(|c| c.is_local()) {
    let store = SqliteStore::init(&config.store_path()?)?;
    return run_local(
      command,
      &store,
      CachePolicy::from_config(&config.cache),
      &mut std::io::stdout(),
    );
  }

  let client = Arc::new(ApiClient::new(&config)?);
  let platform = NativePlatform::detect(&config);
  let settings = ProviderSettings::from_config(&config, true)?;
  let cache_policy = settings.cache_policy;
  let provider = OfflineProvider::start(settings, &platform, client);

  let Some(command) = args.command.filter(|c| !matches!(c, Cmd::Status)) else {
    let app = app::App::new(provider, cache_policy, &config.api.base_url, config.title.clone());
    return app.run().await;
  };

  let result = run_command(command, &provider, cache_policy).await;
  provider.shutdown().await;
  result
}

async fn run_command(
  command: Cmd,
  provider: &OfflineProvider<ApiClient>,
  cache_policy: CachePolicy,
) -> Result<()> {
  match command {
    Cmd::Status => Ok(()),
    Cmd::Get { path } => {
      let fetched = provider.client().read(&path).await?;
      if fetched.source == FetchSource::Offline {
        let stored = fetched
          .stored_at
          .map(|t| t.to_rfc3339())
          .unwrap_or_else(|| "unknown".to_string());
        eprintln!("offline: served from cache stored at {}", stored);
      }
      println!("{}", serde_json::to_string_pretty(&fetched.value)?);
      Ok(())
    }
    Cmd::Send { method, path, data } => {
      let payload = data
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|e| eyre!("--data is not valid JSON: {}", e))?;

      if !method.is_write() {
        return Err(eyre!("{} is not a write, use `hacienda get`", method));
      }

      match provider.client().write(method, &path, payload).await? {
        WriteOutcome::Delivered(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        WriteOutcome::Queued(id) => println!("offline: queued as {}", id),
      }
      Ok(())
    }
    Cmd::Sync => {
      require_store(provider)?;
      let report = provider.sync_now().await?;
      print_report(&report);
      Ok(())
    }
    local @ (Cmd::Queue(_) | Cmd::Cache(_)) => {
      let store = require_store(provider)?;
      run_local(&local, store.as_ref(), cache_policy, &mut std::io::stdout())
    }
  }
}

/// Queue and cache maintenance. Works on the store alone, so it needs neither
/// the network nor an API token.
fn run_local(
  command: &Cmd,
  store: &dyn DurableStore,
  cache_policy: CachePolicy,
  out: &mut impl Write,
) -> Result<()> {
  match command {
    Cmd::Queue(QueueCmd::List) => {
      let queue = store.get_all::<PendingMutation>()?.decoded();
      if queue.is_empty() {
        writeln!(out, "Nothing queued.")?;
      }
      for m in queue {
        writeln!(
          out,
          "{}  {:<6} {:<32} {:<8} attempts={} next={}{}",
          m.id,
          m.method,
          m.endpoint,
          m.status.as_str(),
          m.attempt_count,
          m.next_attempt_at.format("%Y-%m-%d %H:%M:%S"),
          m.last_error
            .map(|e| format!("  error: {}", e))
            .unwrap_or_default()
        )?;
      }
    }
    Cmd::Queue(QueueCmd::Discard { id }) => {
      let key = id.to_string();
      if store.get::<PendingMutation>(&key)?.is_none() {
        return Err(eyre!("No queued change with id {}", id));
      }
      store.delete(Collection::Mutations, &key)?;
      writeln!(out, "Discarded {}", id)?;
    }
    Cmd::Cache(CacheCmd::Prune) => {
      let removed = cache_policy.prune(store, Utc::now())?;
      writeln!(out, "Pruned {} cache entries", removed)?;
    }
    other => return Err(eyre!("{:?} needs the network", other)),
  }
  Ok(())
}

fn require_store(provider: &OfflineProvider<ApiClient>) -> Result<&Arc<dyn DurableStore>> {
  provider.store().ok_or_else(|| {
    let reason = provider
      .registration_state()
      .error
      .clone()
      .unwrap_or_else(|| "not supported on this system".to_string());
    eyre!("Offline mode is unavailable: {}", reason)
  })
}

fn print_report(report: &SyncReport) {
  println!(
    "replayed={} failed={} deferred={} remaining={} stalled={} rejected={}",
    report.replayed,
    report.failed,
    report.deferred,
    report.remaining,
    report.stalled,
    report.rejected
  );
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::CacheEntry;
  use serde_json::json;
  use tempfile::TempDir;

  fn run(command: Cmd, store: &dyn DurableStore) -> Result<String> {
    let mut out = Vec::new();
    run_local(&command, store, CachePolicy::default(), &mut out)?;
    Ok(String::from_utf8(out).unwrap())
  }

  #[test]
  fn test_queue_commands_work_on_the_store_alone() {
    let temp_dir = TempDir::new().unwrap();
    let store = SqliteStore::init(&temp_dir.path().join("offline.db")).unwrap();
    let m = PendingMutation::new(Uuid::new_v4(), Method::Post, "ganado", Some(json!({"n": 1})));
    store.put(&m).unwrap();

    let listed = run(Cmd::Queue(QueueCmd::List), &store).unwrap();
    assert!(listed.contains(&m.id.to_string()));
    assert!(listed.contains("pending"));

    let discarded = run(Cmd::Queue(QueueCmd::Discard { id: m.id }), &store).unwrap();
    assert_eq!(discarded.trim(), format!("Discarded {}", m.id));
    assert_eq!(run(Cmd::Queue(QueueCmd::List), &store).unwrap().trim(), "Nothing queued.");

    assert!(run(Cmd::Queue(QueueCmd::Discard { id: m.id }), &store).is_err());
  }

  #[test]
  fn test_cache_prune_works_on_the_store_alone() {
    let temp_dir = TempDir::new().unwrap();
    let store = SqliteStore::init(&temp_dir.path().join("offline.db")).unwrap();
    let mut stale = CacheEntry::new(Method::Get, "ganado", json!([]));
    stale.stored_at = Utc::now() - chrono::Duration::days(30);
    store.put(&stale).unwrap();

    assert_eq!(run(Cmd::Cache(CacheCmd::Prune), &store).unwrap().trim(), "Pruned 1 cache entries");
    assert_eq!(store.count(Collection::Cache).unwrap(), 0);
  }

  #[test]
  fn test_only_maintenance_commands_skip_the_network() {
    assert!(Cmd::Queue(QueueCmd::List).is_local());
    assert!(Cmd::Cache(CacheCmd::Prune).is_local());
    assert!(!Cmd::Sync.is_local());
    assert!(!Cmd::Get { path: "ganado".into() }.is_local());
    assert!(run(Cmd::Sync, &crate::store::MemoryStore::new()).is_err());
  }
}

