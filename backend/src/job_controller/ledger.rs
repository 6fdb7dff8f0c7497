//! Optional SQLite ledger of finished batches.
//!
//! Terminal snapshots are stored as JSON so a batch stays queryable (status,
//! download) after it leaves memory. Each operation opens its own
//! connection; callers in async code go through [`BatchLedger::run`].

use chrono::{DateTime, SecondsFormat, Utc};
use common::model::batch::BatchSnapshot;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger database: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("ledger snapshot encoding: {0}")]
    Json(#[from] serde_json::Error),
    #[error("ledger task: {0}")]
    Task(String),
}

#[derive(Debug, Clone)]
pub struct BatchLedger {
    path: PathBuf,
}

/// Fixed-width RFC 3339 so text comparison orders by time.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl BatchLedger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let ledger = Self {
            path: path.as_ref().to_path_buf(),
        };
        ledger.connection()?.execute_batch(
            "CREATE TABLE IF NOT EXISTS batches (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                finished_at TEXT,
                snapshot TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS batches_finished_at ON batches (finished_at);",
        )?;
        Ok(ledger)
    }

    fn connection(&self) -> Result<Connection, LedgerError> {
        Ok(Connection::open(&self.path)?)
    }

    /// Run a blocking ledger operation on the blocking pool.
    pub async fn run<T, F>(&self, op: F) -> Result<T, LedgerError>
    where
        T: Send + 'static,
        F: FnOnce(&BatchLedger) -> Result<T, LedgerError> + Send + 'static,
    {
        let ledger = self.clone();
        tokio::task::spawn_blocking(move || op(&ledger))
            .await
            .map_err(|e| LedgerError::Task(e.to_string()))?
    }

    pub fn record(&self, snapshot: &BatchSnapshot) -> Result<(), LedgerError> {
        let json = serde_json::to_string(snapshot)?;
        self.connection()?.execute(
            "INSERT OR REPLACE INTO batches (id, status, finished_at, snapshot) VALUES (?1, ?2, ?3, ?4)",
            params![
                snapshot.id,
                snapshot.status.as_str(),
                snapshot.finished_at().map(timestamp),
                json
            ],
        )?;
        Ok(())
    }

    pub fn load(&self, id: &str) -> Result<Option<BatchSnapshot>, LedgerError> {
        let json: Option<String> = self
            .connection()?
            .query_row("SELECT snapshot FROM batches WHERE id = ?1", [id], |row| {
                row.get(0)
            })
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub fn delete(&self, id: &str) -> Result<bool, LedgerError> {
        let removed = self
            .connection()?
            .execute("DELETE FROM batches WHERE id = ?1", [id])?;
        Ok(removed > 0)
    }

    pub fn finished_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>, LedgerError> {
        let conn = self.connection()?;
        let mut stmt =
            conn.prepare("SELECT id FROM batches WHERE finished_at IS NOT NULL AND finished_at < ?1")?;
        let ids = stmt
            .query_map([timestamp(cutoff)], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    pub fn ids(&self) -> Result<Vec<String>, LedgerError> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare("SELECT id FROM batches")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }
}
