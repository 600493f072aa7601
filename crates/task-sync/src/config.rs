//! Engine configuration.
//!
//! A `SyncConfig` is built once and handed to `SyncEngine::new` and
//! `HistoryReconstructor::new`. Nothing reads settings from ambient state.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Maximum slug length in file names.
pub const MAX_SLUG_LEN: usize = 50;

/// Name of the archive sub-folder inside a project folder.
pub const ARCHIVE_DIR: &str = "archive";

/// Sync engine configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Folder holding the project's active task documents
    pub project_folder: String,
    /// Visibility polling after create and delete
    pub poll: RetryPolicy,
    /// Per-call retries for transient store errors
    pub network: RetryPolicy,
    /// Re-read and retry budget for version conflicts on update
    pub conflict_retries: u32,
    /// Timeout applied to every individual store call
    pub call_timeout: Duration,
    /// Suffix attempts when resolving a free path (`-2`, `-3`, ...)
    pub max_path_attempts: u32,
    /// How long a refresh trusts this engine's own writes and deletes over a
    /// listing that does not show them yet
    pub listing_grace: Duration,
    pub history: HistoryConfig,
}

/// History reconstruction settings.
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Upper bound of candidate paths tried during historical path discovery
    pub max_candidates: usize,
    /// Metadata cache capacity (entries)
    pub cache_capacity: usize,
    /// Metadata cache entries older than this are evicted
    pub cache_ttl: Duration,
    /// Expired entries are swept at most this often
    pub cache_sweep_interval: Duration,
    pub call_timeout: Duration,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_candidates: 20,
            cache_capacity: 500,
            cache_ttl: Duration::from_secs(30 * 60),
            cache_sweep_interval: Duration::from_secs(60),
            call_timeout: Duration::from_secs(10),
        }
    }
}

impl SyncConfig {
    /// Defaults for everything except the project folder.
    pub fn new(project_folder: impl Into<String>) -> Self {
        Self {
            project_folder: project_folder.into().trim_matches('/').to_string(),
            poll: RetryPolicy::default(),
            network: RetryPolicy {
                max_attempts: 3,
                ..RetryPolicy::default()
            },
            conflict_retries: 3,
            call_timeout: Duration::from_secs(10),
            max_path_attempts: 50,
            listing_grace: Duration::from_secs(10 * 60),
            history: HistoryConfig::default(),
        }
    }

    /// Folder holding archived documents of the project.
    pub fn archive_folder(&self) -> String {
        format!("{}/{}", self.project_folder, ARCHIVE_DIR)
    }

    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `TASK_SYNC_PROJECT_FOLDER`: folder of the project's task documents
    ///
    /// Optional:
    /// - `TASK_SYNC_POLL_ATTEMPTS`: visibility poll attempts (default 8)
    /// - `TASK_SYNC_POLL_DELAY_MS`: first poll delay in milliseconds (default 500)
    /// - `TASK_SYNC_CONFLICT_RETRIES`: update retries on conflict (default 3)
    /// - `TASK_SYNC_CALL_TIMEOUT_MS`: per-call timeout in milliseconds (default 10000)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading values through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let folder = lookup("TASK_SYNC_PROJECT_FOLDER")
            .filter(|f| !f.trim_matches('/').is_empty())
            .ok_or(ConfigError::MissingProjectFolder)?;
        let mut config = Self::new(folder);

        if let Some(attempts) = parse_var::<u32>(&lookup, "TASK_SYNC_POLL_ATTEMPTS")? {
            config.poll.max_attempts = attempts.max(1);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "TASK_SYNC_POLL_DELAY_MS")? {
            config.poll.initial_delay = Duration::from_millis(ms);
            config.poll.max_delay = config.poll.max_delay.max(config.poll.initial_delay);
        }
        if let Some(retries) = parse_var::<u32>(&lookup, "TASK_SYNC_CONFLICT_RETRIES")? {
            config.conflict_retries = retries;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "TASK_SYNC_CALL_TIMEOUT_MS")? {
            config.call_timeout = Duration::from_millis(ms);
            config.history.call_timeout = config.call_timeout;
        }
        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("TASK_SYNC_PROJECT_FOLDER environment variable not set")]
    MissingProjectFolder,

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}
