//! In-memory state of every batch known to the engine.
//!
//! - `Batch`: the mutable record of one batch. All transitions of the state
//!   machine go through its methods, which refuse illegal moves.
//! - `BatchStore`: map from batch id to a slot holding the batch behind its
//!   own mutex plus a broadcast channel of progress observations. The map
//!   lock is only held to find a slot; mutations lock the slot, so batches
//!   never contend with each other.
//!
//! Every mutation made through [`BatchStore::update`] publishes a
//! `BatchProgress` observation while the slot is still locked, so
//! subscribers see observations in mutation order.

use chrono::{DateTime, Utc};
use common::jobs::{BatchProgress, BatchStatus};
use common::model::batch::{
    BatchPage, BatchSnapshot, BatchSummary, BatchTotals, DocumentResult, NotificationRecord,
};
use common::model::options::OutputFormat;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};

#[derive(Debug, Error, PartialEq)]
pub enum StateError {
    #[error("cannot move batch from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
    #[error("row {0} already has a result")]
    DuplicateResult(usize),
    #[error("row {row} is outside 1..={total}")]
    RowOutOfRange { row: usize, total: usize },
    #[error("{processed} of {total} records have results")]
    Incomplete { processed: usize, total: usize },
}

#[derive(Debug)]
pub struct Batch {
    id: String,
    status: BatchStatus,
    totals: BatchTotals,
    progress: u8,
    template_name: String,
    format: OutputFormat,
    working_dir: PathBuf,
    results: BTreeMap<usize, DocumentResult>,
    errors: VecDeque<String>,
    errors_dropped: usize,
    max_errors: usize,
    archive_path: Option<PathBuf>,
    notifications: Vec<NotificationRecord>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    cancel_requested_at: Option<DateTime<Utc>>,
    estimated_completion_at: Option<DateTime<Utc>>,
    /// Latest timestamp handed out; keeps recorded times non-decreasing.
    clock: DateTime<Utc>,
}

impl Batch {
    pub fn new(
        id: String,
        total: usize,
        template_name: String,
        format: OutputFormat,
        working_dir: PathBuf,
        max_errors: usize,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            status: BatchStatus::Pending,
            totals: BatchTotals::new(total),
            progress: 0,
            template_name,
            format,
            working_dir,
            results: BTreeMap::new(),
            errors: VecDeque::new(),
            errors_dropped: 0,
            max_errors: max_errors.max(1),
            archive_path: None,
            notifications: Vec::new(),
            created_at,
            started_at: None,
            completed_at: None,
            failed_at: None,
            cancelled_at: None,
            cancel_requested_at: None,
            estimated_completion_at: None,
            clock: created_at,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    pub fn totals(&self) -> BatchTotals {
        self.totals
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at.or(self.failed_at).or(self.cancelled_at)
    }

    pub fn set_estimated_completion(&mut self, at: DateTime<Utc>) {
        self.estimated_completion_at = Some(at);
    }

    fn stamp(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        if now > self.clock {
            self.clock = now;
        }
        self.clock
    }

    fn transition(&mut self, to: BatchStatus) -> Result<(), StateError> {
        let allowed = matches!(
            (self.status, to),
            (BatchStatus::Pending, BatchStatus::Processing)
                | (BatchStatus::Pending, BatchStatus::Cancelled)
                | (BatchStatus::Processing, BatchStatus::Completed)
                | (BatchStatus::Processing, BatchStatus::Failed)
                | (BatchStatus::Processing, BatchStatus::Cancelled)
        );
        if !allowed {
            return Err(StateError::InvalidTransition {
                from: self.status.as_str(),
                to: to.as_str(),
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), StateError> {
        self.transition(BatchStatus::Processing)?;
        self.started_at = Some(self.stamp(now));
        Ok(())
    }

    /// Append the result of one record. Returns the progress before and after.
    pub fn record(&mut self, mut result: DocumentResult) -> Result<(u8, u8), StateError> {
        if self.status != BatchStatus::Processing {
            return Err(StateError::InvalidTransition {
                from: self.status.as_str(),
                to: "record result",
            });
        }
        let row = result.row_index;
        if row == 0 || row > self.totals.total {
            return Err(StateError::RowOutOfRange {
                row,
                total: self.totals.total,
            });
        }
        if self.results.contains_key(&row) {
            return Err(StateError::DuplicateResult(row));
        }
        result.produced_at = self.stamp(result.produced_at);
        if result.is_completed() {
            self.totals.completed += 1;
        } else {
            self.totals.failed += 1;
        }
        self.results.insert(row, result);
        let before = self.progress;
        self.progress = self.progress.max(self.totals.percent());
        Ok((before, self.progress))
    }

    pub fn complete(&mut self, archive_path: PathBuf, now: DateTime<Utc>) -> Result<(), StateError> {
        if self.totals.processed() != self.totals.total {
            return Err(StateError::Incomplete {
                processed: self.totals.processed(),
                total: self.totals.total,
            });
        }
        self.transition(BatchStatus::Completed)?;
        self.archive_path = Some(archive_path);
        self.progress = 100;
        self.completed_at = Some(self.stamp(now));
        Ok(())
    }

    pub fn fail(&mut self, reason: String, now: DateTime<Utc>) -> Result<(), StateError> {
        self.transition(BatchStatus::Failed)?;
        self.push_error(reason);
        self.failed_at = Some(self.stamp(now));
        Ok(())
    }

    /// Record every row still lacking a result as failed with `reason`.
    /// Returns how many rows were filled in.
    pub fn fail_unprocessed(&mut self, reason: &str, now: DateTime<Utc>) -> usize {
        if self.status != BatchStatus::Processing {
            return 0;
        }
        let at = self.stamp(now);
        let missing: Vec<usize> = (1..=self.totals.total)
            .filter(|row| !self.results.contains_key(row))
            .collect();
        for row in &missing {
            self.results
                .insert(*row, DocumentResult::failed(*row, reason.to_string(), at));
        }
        self.totals.failed += missing.len();
        self.progress = self.progress.max(self.totals.percent());
        missing.len()
    }

    /// Mark that cancellation was asked for. Returns false when the batch is
    /// already terminal.
    pub fn request_cancel(&mut self, now: DateTime<Utc>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        if self.cancel_requested_at.is_none() {
            self.cancel_requested_at = Some(self.stamp(now));
        }
        true
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), StateError> {
        self.transition(BatchStatus::Cancelled)?;
        if self.cancel_requested_at.is_none() {
            self.cancel_requested_at = Some(self.stamp(now));
        }
        self.cancelled_at = Some(self.stamp(now));
        Ok(())
    }

    /// Append to the bounded error list, dropping the oldest entry when full.
    pub fn push_error(&mut self, message: String) {
        if self.errors.len() == self.max_errors {
            self.errors.pop_front();
            self.errors_dropped += 1;
        }
        self.errors.push_back(message);
    }

    pub fn push_notification(&mut self, mut record: NotificationRecord) {
        record.at = self.stamp(record.at);
        self.notifications.push(record);
    }

    /// Completed documents as `(file name, path)` in row order.
    pub fn completed_documents(&self) -> Vec<(String, PathBuf)> {
        self.results
            .values()
            .filter_map(|r| match (&r.file_name, &r.file_path) {
                (Some(name), Some(path)) if r.is_completed() => Some((name.clone(), path.clone())),
                _ => None,
            })
            .collect()
    }

    /// Failure messages of individual records, in row order.
    pub fn record_errors(&self) -> Vec<String> {
        self.results
            .values()
            .filter_map(|r| r.error.as_ref().map(|e| format!("row {}: {}", r.row_index, e)))
            .collect()
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            batch_id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            totals: self.totals,
            created_at: self.created_at,
        }
    }

    pub fn observation(&self) -> BatchProgress {
        BatchProgress {
            batch_id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            totals: self.totals,
            observed_at: self.clock,
        }
    }

    /// Snapshot with all results, or the window `offset..offset + limit`.
    pub fn snapshot(&self, window: Option<(usize, usize)>) -> BatchSnapshot {
        let (offset, limit) = window.unwrap_or((0, usize::MAX));
        BatchSnapshot {
            id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            totals: self.totals,
            template_name: self.template_name.clone(),
            format: self.format,
            results: self
                .results
                .values()
                .skip(offset)
                .take(limit)
                .cloned()
                .collect(),
            results_offset: offset,
            errors: self.errors.iter().cloned().collect(),
            errors_dropped: self.errors_dropped,
            archive_path: self.archive_path.clone(),
            notifications: self.notifications.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            failed_at: self.failed_at,
            cancelled_at: self.cancelled_at,
            cancel_requested_at: self.cancel_requested_at,
            estimated_completion_at: self.estimated_completion_at,
        }
    }
}

struct BatchSlot {
    batch: Mutex<Batch>,
    observations: broadcast::Sender<BatchProgress>,
}

impl BatchSlot {
    fn lock(&self) -> MutexGuard<'_, Batch> {
        self.batch.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Result of a conditional removal.
#[derive(Debug, PartialEq)]
pub enum Removal {
    Removed(PathBuf),
    Refused(BatchStatus),
    NotFound,
}

#[derive(Debug, Clone, Default)]
pub struct BatchFilter {
    pub status: Option<BatchStatus>,
}

/// Shared map of batches, cloned into every component that needs it.
#[derive(Clone)]
pub struct BatchStore {
    batches: Arc<RwLock<HashMap<String, Arc<BatchSlot>>>>,
    observation_capacity: usize,
}

impl BatchStore {
    pub fn new(observation_capacity: usize) -> Self {
        Self {
            batches: Arc::new(RwLock::new(HashMap::new())),
            observation_capacity: observation_capacity.max(1),
        }
    }

    async fn slot(&self, id: &str) -> Option<Arc<BatchSlot>> {
        self.batches.read().await.get(id).cloned()
    }

    /// Insert a new batch; `false` when the id is taken.
    pub async fn create(&self, batch: Batch) -> bool {
        let mut batches = self.batches.write().await;
        if batches.contains_key(batch.id()) {
            return false;
        }
        let (tx, _) = broadcast::channel(self.observation_capacity);
        batches.insert(
            batch.id().to_string(),
            Arc::new(BatchSlot {
                batch: Mutex::new(batch),
                observations: tx,
            }),
        );
        true
    }

    pub async fn get(&self, id: &str, window: Option<(usize, usize)>) -> Option<BatchSnapshot> {
        let slot = self.slot(id).await?;
        let snapshot = slot.lock().snapshot(window);
        Some(snapshot)
    }

    /// Run `mutate` under the batch's lock and publish an observation.
    pub async fn update<R>(&self, id: &str, mutate: impl FnOnce(&mut Batch) -> R) -> Option<R> {
        let slot = self.slot(id).await?;
        let mut batch = slot.lock();
        let out = mutate(&mut batch);
        // No subscribers is fine.
        let _ = slot.observations.send(batch.observation());
        Some(out)
    }

    /// Read under the batch's lock without publishing.
    pub async fn read<R>(&self, id: &str, inspect: impl FnOnce(&Batch) -> R) -> Option<R> {
        let slot = self.slot(id).await?;
        let batch = slot.lock();
        Some(inspect(&batch))
    }

    pub async fn subscribe(&self, id: &str) -> Option<broadcast::Receiver<BatchProgress>> {
        Some(self.slot(id).await?.observations.subscribe())
    }

    /// Remove the batch when `allow` accepts its current state.
    pub async fn remove_if(&self, id: &str, allow: impl FnOnce(&Batch) -> bool) -> Removal {
        let mut batches = self.batches.write().await;
        let Some(slot) = batches.get(id).cloned() else {
            return Removal::NotFound;
        };
        let batch = slot.lock();
        if !allow(&batch) {
            return Removal::Refused(batch.status());
        }
        let dir = batch.working_dir().to_path_buf();
        drop(batch);
        batches.remove(id);
        Removal::Removed(dir)
    }

    /// Summaries ordered by creation time, then id.
    pub async fn list(&self, filter: &BatchFilter, offset: usize, limit: usize) -> BatchPage {
        let slots: Vec<Arc<BatchSlot>> = self.batches.read().await.values().cloned().collect();
        let mut items: Vec<BatchSummary> = slots
            .iter()
            .map(|slot| slot.lock().summary())
            .filter(|s| filter.status.is_none_or(|status| s.status == status))
            .collect();
        items.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.batch_id.cmp(&b.batch_id))
        });
        let total = items.len();
        let items = items.into_iter().skip(offset).take(limit).collect();
        BatchPage {
            items,
            total,
            offset,
            limit,
        }
    }

    /// Ids of terminal batches that finished before `cutoff`.
    pub async fn finished_before(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        let slots: Vec<Arc<BatchSlot>> = self.batches.read().await.values().cloned().collect();
        slots
            .iter()
            .filter_map(|slot| {
                let batch = slot.lock();
                match batch.finished_at() {
                    Some(at) if at < cutoff => Some(batch.id().to_string()),
                    _ => None,
                }
            })
            .collect()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.batches.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn batch(id: &str, total: usize) -> Batch {
        Batch::new(
            id.to_string(),
            total,
            "t".into(),
            OutputFormat::Txt,
            PathBuf::from("/tmp").join(id),
            3,
            Utc::now(),
        )
    }

    fn ok(row: usize) -> DocumentResult {
        DocumentResult::completed(
            row,
            format!("document_{}.txt", row),
            PathBuf::from(format!("/tmp/{}.txt", row)),
            1,
            Utc::now(),
        )
    }

    #[test]
    fn illegal_transitions_are_refused() {
        let mut b = batch("a", 1);
        assert!(b.complete(PathBuf::new(), Utc::now()).is_err());
        assert!(b.fail("x".into(), Utc::now()).is_err());
        b.start(Utc::now()).unwrap();
        assert!(b.start(Utc::now()).is_err());
        b.record(ok(1)).unwrap();
        b.complete(PathBuf::from("a.zip"), Utc::now()).unwrap();
        assert!(b.cancel(Utc::now()).is_err());
        assert!(!b.request_cancel(Utc::now()));
        assert_eq!(b.status(), BatchStatus::Completed);
    }

    #[test]
    fn results_are_unique_and_in_range() {
        let mut b = batch("a", 2);
        b.start(Utc::now()).unwrap();
        b.record(ok(2)).unwrap();
        assert_eq!(b.record(ok(2)), Err(StateError::DuplicateResult(2)));
        assert!(matches!(
            b.record(ok(3)),
            Err(StateError::RowOutOfRange { .. })
        ));
        assert!(matches!(
            b.complete(PathBuf::new(), Utc::now()),
            Err(StateError::Incomplete { .. })
        ));
        let (before, after) = b.record(ok(1)).unwrap();
        assert_eq!((before, after), (50, 100));
        let rows: Vec<usize> = b.snapshot(None).results.iter().map(|r| r.row_index).collect();
        assert_eq!(rows, vec![1, 2]);
    }

    #[test]
    fn timestamps_never_go_backwards() {
        let mut b = batch("a", 1);
        let created = b.created_at();
        b.start(created - Duration::seconds(5)).unwrap();
        let snap = b.snapshot(None);
        assert!(snap.started_at.unwrap() >= created);
    }

    #[test]
    fn aborting_fills_unprocessed_rows() {
        let mut b = batch("a", 4);
        b.start(Utc::now()).unwrap();
        b.record(ok(2)).unwrap();
        assert_eq!(b.fail_unprocessed("template broke", Utc::now()), 3);
        let totals = b.totals();
        assert_eq!((totals.completed, totals.failed), (1, 3));
        b.fail("template broke".into(), Utc::now()).unwrap();
        let snap = b.snapshot(None);
        assert_eq!(snap.results.len(), 4);
        assert_eq!(snap.results[0].error.as_deref(), Some("template broke"));
    }

    #[test]
    fn error_list_is_bounded() {
        let mut b = batch("a", 1);
        for i in 0..5 {
            b.push_error(format!("e{}", i));
        }
        let snap = b.snapshot(None);
        assert_eq!(snap.errors, vec!["e2", "e3", "e4"]);
        assert_eq!(snap.errors_dropped, 2);
    }

    #[test]
    fn snapshot_window() {
        let mut b = batch("a", 4);
        b.start(Utc::now()).unwrap();
        for row in [4, 1, 3, 2] {
            b.record(ok(row)).unwrap();
        }
        let snap = b.snapshot(Some((1, 2)));
        let rows: Vec<usize> = snap.results.iter().map(|r| r.row_index).collect();
        assert_eq!(rows, vec![2, 3]);
        assert_eq!(snap.results_offset, 1);
    }

    #[tokio::test]
    async fn store_publishes_observations_and_refuses_busy_removal() {
        let store = BatchStore::new(8);
        assert!(store.create(batch("a", 1)).await);
        assert!(!store.create(batch("a", 1)).await);
        let mut rx = store.subscribe("a").await.unwrap();
        store.update("a", |b| b.start(Utc::now())).await.unwrap().unwrap();
        assert_eq!(rx.recv().await.unwrap().status, BatchStatus::Processing);

        let refused = store
            .remove_if("a", |b| b.status() != BatchStatus::Processing)
            .await;
        assert_eq!(refused, Removal::Refused(BatchStatus::Processing));
        assert_eq!(store.remove_if("zzz", |_| true).await, Removal::NotFound);
        assert!(matches!(
            store.remove_if("a", |_| true).await,
            Removal::Removed(_)
        ));
        assert!(store.get("a", None).await.is_none());
    }

    #[tokio::test]
    async fn list_filters_and_pages() {
        let store = BatchStore::new(8);
        for id in ["a", "b", "c"] {
            store.create(batch(id, 1)).await;
        }
        store.update("b", |b| b.start(Utc::now())).await;
        let filter = BatchFilter {
            status: Some(BatchStatus::Pending),
        };
        let page = store.list(&filter, 0, 10).await;
        assert_eq!(page.total, 2);
        let page = store.list(&BatchFilter::default(), 1, 1).await;
        assert_eq!(page.total, 3);
        assert_eq!(page.items.len(), 1);
    }
}
