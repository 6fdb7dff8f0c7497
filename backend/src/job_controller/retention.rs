//! Periodic removal of expired batches and orphaned working directories.

use super::BatchEngine;
use crate::config::RetentionConfig;
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    /// How long a finished batch stays queryable.
    pub batch_retention: Duration,
    /// Age after which a directory no batch claims is removed.
    pub file_retention: Duration,
}

impl From<&RetentionConfig> for RetentionPolicy {
    fn from(config: &RetentionConfig) -> Self {
        Self {
            batch_retention: Duration::from_secs(config.batch_retention_secs),
            file_retention: Duration::from_secs(config.file_retention_secs),
        }
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct SweepReport {
    pub batches: Vec<String>,
    pub orphans: Vec<PathBuf>,
}

fn cutoff(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// One sweep as of `now`. Failures are logged and skipped.
pub async fn sweep(engine: &BatchEngine, policy: RetentionPolicy, now: DateTime<Utc>) -> SweepReport {
    let mut report = SweepReport::default();
    let batch_cutoff = cutoff(now, policy.batch_retention);

    let mut expired = engine.store().finished_before(batch_cutoff).await;
    if let Some(ledger) = engine.ledger() {
        match ledger.run(move |l| l.finished_before(batch_cutoff)).await {
            Ok(ids) => expired.extend(ids),
            Err(e) => warn!("Retention could not read the ledger: {}", e),
        }
    }
    expired.sort();
    expired.dedup();
    for id in expired {
        match engine.delete(&id).await {
            Ok(()) => report.batches.push(id),
            Err(e) => warn!("Retention could not remove batch {}: {}", id, e),
        }
    }

    let mut known: HashSet<String> = engine.store().ids().await.into_iter().collect();
    if let Some(ledger) = engine.ledger() {
        match ledger.run(|l| l.ids()).await {
            Ok(ids) => known.extend(ids),
            Err(e) => {
                // Without the ledger's ids nothing can be called an orphan.
                warn!("Retention skipped orphan cleanup: {}", e);
                return report;
            }
        }
    }
    let file_cutoff = SystemTime::from(cutoff(now, policy.file_retention));
    let root = engine.config().working_root.clone();
    let mut entries = match tokio::fs::read_dir(&root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return report,
        Err(e) => {
            warn!("Retention could not list {}: {}", root.display(), e);
            return report;
        }
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().to_string();
        if known.contains(&name) {
            continue;
        }
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        if modified >= file_cutoff {
            continue;
        }
        let path = entry.path();
        let removed = if metadata.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match removed {
            Ok(()) => report.orphans.push(path),
            Err(e) => warn!("Retention could not remove {}: {}", path.display(), e),
        }
    }

    if !report.batches.is_empty() || !report.orphans.is_empty() {
        info!(
            "Retention removed {} batches and {} orphaned entries",
            report.batches.len(),
            report.orphans.len()
        );
    }
    report
}

/// Run [`sweep`] every `interval` until the runtime shuts down.
pub fn spawn(engine: BatchEngine, policy: RetentionPolicy, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            sweep(&engine, policy, Utc::now()).await;
        }
    })
}
