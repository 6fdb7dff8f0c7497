#![allow(dead_code)]

use async_trait::async_trait;
use common::events::BatchEvent;
use common::model::options::OutputOptions;
use common::requests::NotificationTarget;
use docbatch_backend::config::{EngineConfig, RateLimitConfig};
use docbatch_backend::error::RenderError;
use docbatch_backend::job_controller::{BatchEngine, EngineDeps, Submission};
use docbatch_backend::notify::{Notifier, NotifyError};
use docbatch_backend::render::{RenderRequest, Renderer};
use docbatch_backend::source::{self, ParsedSource, SourceOptions};
use docbatch_backend::template::{MediaType, TemplateModel, TemplateOptions};
use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Renderer with scripted failures and a call log.
#[derive(Default)]
pub struct StubRenderer {
    delay: Duration,
    fail_rows: HashSet<usize>,
    fail_all: bool,
    transient_failures: u32,
    attempts: Mutex<HashMap<usize, u32>>,
    calls: Mutex<Vec<(usize, Instant)>>,
}

impl StubRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fail_rows(mut self, rows: &[usize]) -> Self {
        self.fail_rows = rows.iter().copied().collect();
        self
    }

    pub fn fail_all(mut self) -> Self {
        self.fail_all = true;
        self
    }

    /// Every row fails transiently this many times before it renders.
    pub fn transient_failures(mut self, n: u32) -> Self {
        self.transient_failures = n;
        self
    }

    pub fn calls(&self) -> Vec<(usize, Instant)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Renderer for StubRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, RenderError> {
        let row = request.row_index();
        self.calls.lock().unwrap().push((row, Instant::now()));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_all || self.fail_rows.contains(&row) {
            return Err(RenderError::UpstreamFatal(format!("row {} rejected", row)));
        }
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(row).or_insert(0);
            *n += 1;
            *n
        };
        if attempt <= self.transient_failures {
            return Err(RenderError::UpstreamTransient(format!(
                "row {} attempt {} unavailable",
                row, attempt
            )));
        }
        Ok(format!("document for row {}", row).into_bytes())
    }

    fn supports(&self, _: &TemplateModel, _: &OutputOptions) -> Result<(), String> {
        Ok(())
    }
}

/// Keeps every event it is handed.
#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<(BatchEvent, Option<NotificationTarget>)>>,
    progress_delay: Duration,
}

impl RecordingNotifier {
    /// Holds every progress delivery for `delay` before recording it.
    pub fn slow_progress(delay: Duration) -> Self {
        Self {
            progress_delay: delay,
            ..Self::default()
        }
    }

    pub fn events_for(&self, batch_id: &str) -> Vec<BatchEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, _)| e.summary().batch_id == batch_id)
            .map(|(e, _)| e.clone())
            .collect()
    }

    pub fn terminal_for(&self, batch_id: &str) -> Vec<BatchEvent> {
        self.events_for(batch_id)
            .into_iter()
            .filter(BatchEvent::is_terminal)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        event: &BatchEvent,
        target: Option<&NotificationTarget>,
    ) -> Result<(), NotifyError> {
        if !event.is_terminal() {
            tokio::time::sleep(self.progress_delay).await;
        }
        self.events
            .lock()
            .unwrap()
            .push((event.clone(), target.cloned()));
        Ok(())
    }
}

/// Engine settings for tests: generous rate limit, millisecond retries,
/// no threshold notifications.
pub fn config(root: &Path) -> EngineConfig {
    EngineConfig {
        working_root: root.to_path_buf(),
        rate_limit: RateLimitConfig {
            requests: 10_000,
            window_ms: 1_000,
        },
        default_retry_base_delay_ms: 1,
        progress_thresholds: Vec::new(),
        ..EngineConfig::default()
    }
}

pub fn engine(
    config: EngineConfig,
    renderer: Arc<dyn Renderer>,
    notifier: Arc<RecordingNotifier>,
) -> BatchEngine {
    BatchEngine::new(
        config,
        EngineDeps {
            renderer,
            notifier,
            ledger: None,
            public_base_url: "http://docs.test".to_string(),
        },
    )
}

pub fn template(body: &str) -> TemplateModel {
    TemplateModel::parse(
        body.as_bytes().to_vec(),
        MediaType::Text,
        TemplateOptions {
            name: "letter".to_string(),
            optional: Vec::new(),
        },
    )
    .unwrap()
}

pub fn records(csv: &str) -> ParsedSource {
    source::parse(csv.as_bytes(), &SourceOptions::default()).unwrap()
}

/// `n` rows of `name,email,amount`.
pub fn numbered_rows(n: usize) -> String {
    let mut csv = String::from("name,email,amount\n");
    for i in 1..=n {
        csv.push_str(&format!("P{},p{}@x.io,{}\n", i, i, i));
    }
    csv
}

pub const LETTER: &str = "Dear [name] <[email]>, you owe [amount].";

pub fn submission(csv: &str, options: OutputOptions) -> Submission {
    Submission {
        batch_id: None,
        template: template(LETTER),
        source: records(csv),
        options,
        notify: None,
    }
}

/// Entry names of a zip archive in stored order.
pub fn archive_entries(path: &Path) -> Vec<String> {
    let file = std::fs::File::open(path).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

pub fn archive_entry(path: &Path, name: &str) -> String {
    let file = std::fs::File::open(path).unwrap();
    let mut archive = zip::ZipArchive::new(file).unwrap();
    let mut entry = archive.by_name(name).unwrap();
    let mut text = String::new();
    entry.read_to_string(&mut text).unwrap();
    text
}
