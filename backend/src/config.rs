//! Application configuration.
//!
//! Loaded from the TOML file named by `DOCBATCH_CONFIG` (defaults apply when
//! unset), then overridden by individual `DOCBATCH_*` variables, then
//! validated. Unknown keys are rejected so typos surface at startup.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_ENV: &str = "DOCBATCH_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {name}: {value}")]
    Env { name: String, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub retention: RetentionConfig,
    pub renderer: RendererConfig,
    pub notifications: NotificationConfig,
    /// SQLite file keeping finished batches queryable after retention.
    pub ledger_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Prefix of download links sent in notifications.
    pub public_base_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            public_base_url: "http://127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    pub requests: usize,
    pub window_ms: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests: 60,
            window_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub working_root: PathBuf,
    pub max_concurrent_per_batch: usize,
    pub max_concurrent_batches: usize,
    pub default_batch_size: usize,
    pub default_retry_attempts: u32,
    pub default_retry_base_delay_ms: u64,
    pub render_timeout_ms: u64,
    pub rate_limit: RateLimitConfig,
    /// Progress percentages that trigger a progress notification.
    pub progress_thresholds: Vec<u8>,
    pub max_errors_per_batch: usize,
    /// Buffered observations per subscriber before lagging ones skip ahead.
    pub observation_capacity: usize,
    /// Expected render time of one document, for completion estimates.
    pub estimated_render_ms: u64,
    pub max_source_bytes: usize,
    pub max_source_rows: usize,
}

impl EngineConfig {
    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            working_root: std::env::temp_dir().join("docbatch"),
            max_concurrent_per_batch: 8,
            max_concurrent_batches: 4,
            default_batch_size: 4,
            default_retry_attempts: 3,
            default_retry_base_delay_ms: 1_000,
            render_timeout_ms: 300_000,
            rate_limit: RateLimitConfig::default(),
            progress_thresholds: vec![50],
            max_errors_per_batch: 100,
            observation_capacity: 64,
            estimated_render_ms: 500,
            max_source_bytes: crate::source::DEFAULT_MAX_BYTES,
            max_source_rows: crate::source::DEFAULT_MAX_ROWS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetentionConfig {
    pub batch_retention_secs: u64,
    pub file_retention_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            batch_retention_secs: 24 * 3600,
            file_retention_secs: 24 * 3600,
            sweep_interval_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RendererConfig {
    pub fonts_dir: PathBuf,
    pub font_family: String,
    pub upstream_url: Option<String>,
    pub upstream_token: Option<String>,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            fonts_dir: PathBuf::from("./fonts"),
            font_family: "Arial".to_string(),
            upstream_url: None,
            upstream_token: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NotificationConfig {
    /// Directory for outgoing `.eml` files; mail is off when unset.
    pub pickup_dir: Option<PathBuf>,
    pub from_address: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            pickup_dir: None,
            from_address: "docbatch@localhost".to_string(),
        }
    }
}

impl AppConfig {
    /// File, then environment, then validation.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(PathBuf::from(path))?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: PathBuf) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Override single settings from `lookup` (the process environment in
    /// production).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        fn parsed<T: std::str::FromStr>(name: &str, value: String) -> Result<T, ConfigError> {
            value.parse().map_err(|_| ConfigError::Env {
                name: name.to_string(),
                value,
            })
        }

        if let Some(v) = lookup("DOCBATCH_HOST") {
            self.server.host = v;
        }
        if let Some(v) = lookup("DOCBATCH_PORT") {
            self.server.port = parsed("DOCBATCH_PORT", v)?;
        }
        if let Some(v) = lookup("DOCBATCH_PUBLIC_BASE_URL") {
            self.server.public_base_url = v;
        }
        if let Some(v) = lookup("DOCBATCH_WORKING_ROOT") {
            self.engine.working_root = PathBuf::from(v);
        }
        if let Some(v) = lookup("DOCBATCH_RATE_LIMIT") {
            self.engine.rate_limit.requests = parsed("DOCBATCH_RATE_LIMIT", v)?;
        }
        if let Some(v) = lookup("DOCBATCH_UPSTREAM_URL") {
            self.renderer.upstream_url = Some(v);
        }
        if let Some(v) = lookup("DOCBATCH_UPSTREAM_TOKEN") {
            self.renderer.upstream_token = Some(v);
        }
        if let Some(v) = lookup("DOCBATCH_LEDGER_PATH") {
            self.ledger_path = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let engine = &self.engine;
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if engine.max_concurrent_per_batch == 0 {
            return invalid("engine.max_concurrent_per_batch must be at least 1");
        }
        if engine.max_concurrent_batches == 0 {
            return invalid("engine.max_concurrent_batches must be at least 1");
        }
        if engine.default_batch_size == 0 {
            return invalid("engine.default_batch_size must be at least 1");
        }
        if engine.rate_limit.requests == 0 || engine.rate_limit.window_ms == 0 {
            return invalid("engine.rate_limit needs positive requests and window_ms");
        }
        if engine.default_retry_base_delay_ms == 0 {
            return invalid("engine.default_retry_base_delay_ms must be positive");
        }
        if engine.render_timeout_ms == 0 {
            return invalid("engine.render_timeout_ms must be positive");
        }
        if engine.progress_thresholds.iter().any(|t| *t == 0 || *t >= 100) {
            return invalid("engine.progress_thresholds must lie strictly between 0 and 100");
        }
        if engine.max_source_bytes == 0 || engine.max_source_bytes > crate::source::DEFAULT_MAX_BYTES {
            return invalid("engine.max_source_bytes must be between 1 byte and 100 MiB");
        }
        if engine.max_source_rows == 0 || engine.max_source_rows > crate::source::DEFAULT_MAX_ROWS {
            return invalid("engine.max_source_rows must be between 1 and 100000");
        }
        if self.retention.sweep_interval_secs == 0 {
            return invalid("retention.sweep_interval_secs must be positive");
        }
        if let Some(url) = &self.renderer.upstream_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return invalid("renderer.upstream_url must be an http(s) URL");
            }
        }
        Ok(())
    }
}
