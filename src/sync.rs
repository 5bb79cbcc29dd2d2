//! Sync orchestration for the CLI and server.
//!
//! Wires the configured notes connector, embedding provider and SQLite
//! store into an [`Indexer`], runs one incremental sync, and prints a
//! summary. Ctrl-C raises the cancel flag; the note in flight finishes
//! and deletion reconciliation is skipped for that run.

use anyhow::{bail, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use companion_recall_core::ingest::{Indexer, PlanAction, SyncPlan};
use companion_recall_core::models::{SyncRun, SyncStatus};
use companion_recall_core::store::Store;

use crate::config::Config;
use crate::connector_fs::NotesConnector;
use crate::embedding;
use crate::sqlite_store::SqliteStore;

/// Maximum number of per-unit errors echoed to stdout.
const MAX_PRINTED_ERRORS: usize = 10;

/// Build an indexer over the configured store and provider.
pub async fn open_indexer(config: &Config) -> Result<(Arc<SqliteStore>, Indexer)> {
    let store = Arc::new(SqliteStore::open(config).await?);
    let provider = embedding::create_provider(&config.embedding)?;
    let indexer = Indexer::new(store.clone(), provider, config.index_params());
    Ok((store, indexer))
}

/// Run one sync of the notes connector and persist the run record.
pub async fn sync_once(config: &Config, trigger: &str, cancel: &AtomicBool) -> Result<SyncRun> {
    let connector = NotesConnector::from_config(config)?;
    let (store, indexer) = open_indexer(config).await?;
    let run = indexer.sync_incremental(&connector, trigger, cancel).await;
    store.pool().close().await;
    Ok(run?)
}

pub async fn run_sync(config: &Config, trigger: &str, dry_run: bool) -> Result<()> {
    if dry_run {
        let connector = NotesConnector::from_config(config)?;
        let (store, indexer) = open_indexer(config).await?;
        let plan = indexer.plan_sync(&connector).await?;
        store.pool().close().await;
        print_plan(&connector_name(config), &plan);
        return Ok(());
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current note");
            flag.store(true, Ordering::Relaxed);
        }
    });

    let run = sync_once(config, trigger, &cancel).await;
    watcher.abort();
    let run = run?;

    print_run(&run);
    if run.status == SyncStatus::Failed {
        bail!(
            "sync {} failed with {} error(s)",
            run.source,
            run.errors.len()
        );
    }
    Ok(())
}

/// Print the most recent sync runs, newest first.
pub async fn run_runs(config: &Config, limit: usize) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let runs = store.recent_sync_runs(limit).await?;
    store.pool().close().await;

    if runs.is_empty() {
        println!("No sync runs recorded.");
        return Ok(());
    }

    for run in &runs {
        let duration = run
            .completed_at
            .map(|done| format!("{}ms", (done - run.started_at).num_milliseconds()))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {}  {:<9}  {:<8}  new={} updated={} unchanged={} deleted={} errors={}  ({})",
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.source,
            run.status.as_str(),
            run.trigger,
            run.counts.new,
            run.counts.updated,
            run.counts.unchanged,
            run.counts.deleted,
            run.errors.len(),
            duration,
        );
    }
    Ok(())
}

fn connector_name(config: &Config) -> String {
    config
        .connectors
        .notes
        .as_ref()
        .map(|n| n.source.clone())
        .unwrap_or_default()
}

fn print_plan(source: &str, plan: &SyncPlan) {
    println!("sync {} (dry-run)", source);
    println!("  notes found: {}", plan.entries.len());
    println!("  new: {}", plan.count(PlanAction::New));
    println!("  stale: {}", plan.count(PlanAction::Update));
    println!("  restore: {}", plan.count(PlanAction::Restore));
    println!("  unchanged: {}", plan.count(PlanAction::Unchanged));
    println!("  trash: {}", plan.count(PlanAction::Trash));
    let skipped: Vec<&str> = plan
        .entries
        .iter()
        .filter(|e| e.action == PlanAction::Skip)
        .map(|e| e.source_id.as_str())
        .collect();
    if !skipped.is_empty() {
        println!("  unreadable: {} ({})", skipped.len(), skipped.join(", "));
    }
}

fn print_run(run: &SyncRun) {
    let counts = &run.counts;
    println!("sync {}", run.source);
    println!("  scanned: {} notes", counts.total);
    println!("  new: {}", counts.new);
    println!("  updated: {}", counts.updated);
    println!("  unchanged: {}", counts.unchanged);
    println!("  deleted: {}", counts.deleted);
    println!("  embedded: {}", counts.embedded);
    println!("  chunks created: {}", counts.chunks_created);
    if !run.errors.is_empty() {
        println!("  errors: {}", run.errors.len());
        for err in run.errors.iter().take(MAX_PRINTED_ERRORS) {
            println!(
                "    {} [{}] {}: {}",
                err.source_id,
                err.unit,
                err.kind.as_str(),
                err.message
            );
        }
        if run.errors.len() > MAX_PRINTED_ERRORS {
            println!("    ... {} more", run.errors.len() - MAX_PRINTED_ERRORS);
        }
    }
    println!("  status: {}", run.status.as_str());
    if run.status != SyncStatus::Failed {
        println!("ok");
    }
}
