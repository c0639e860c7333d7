//! Tracker configuration.

use crate::error::{TrackerError, TrackerResult};
use beacon_storage::STORAGE_FILE_NAME;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Maximum events held in memory before spilling to the overflow store.
pub const QUEUE_SIZE_LIMIT: usize = 50;
/// Maximum events held in the overflow store before the oldest is dropped.
pub const STORAGE_SIZE_LIMIT: usize = 100;
/// Default suppression window for repeated background flushes.
pub const DEFAULT_DEBOUNCE_WINDOW_MS: u64 = 5_000;

/// Configuration for a [`Tracker`](crate::Tracker).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Site identifier stamped on every event as `idsite`.
    pub site_id: String,

    /// Seconds between scheduled flushes. Must be at least 1.
    pub flush_interval_secs: u64,

    /// Collector endpoint receiving `POST {"events": [...]}`.
    pub collector_url: String,

    /// Directory holding the overflow file.
    pub data_dir: PathBuf,

    pub queue_size_limit: usize,

    pub storage_size_limit: usize,

    /// Background flushes within this many milliseconds of the last one are skipped.
    pub debounce_window_ms: u64,

    /// Log batches instead of sending them.
    pub dry_run: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            site_id: String::new(),
            flush_interval_secs: 60,
            collector_url: "https://collector.beacon.dev/v1/events".to_string(),
            data_dir: PathBuf::from("."),
            queue_size_limit: QUEUE_SIZE_LIMIT,
            storage_size_limit: STORAGE_SIZE_LIMIT,
            debounce_window_ms: DEFAULT_DEBOUNCE_WINDOW_MS,
            dry_run: false,
        }
    }
}

impl TrackerConfig {
    /// Config for a site with the given flush interval and data directory.
    pub fn new(
        site_id: impl Into<String>,
        flush_interval_secs: u64,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            site_id: site_id.into(),
            flush_interval_secs,
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_collector_url(mut self, url: impl Into<String>) -> Self {
        self.collector_url = url.into();
        self
    }

    pub fn validate(&self) -> TrackerResult<()> {
        if self.site_id.trim().is_empty() {
            return Err(TrackerError::Config("site_id must not be empty".into()));
        }
        if self.flush_interval_secs == 0 {
            return Err(TrackerError::Config(
                "flush_interval_secs must be at least 1".into(),
            ));
        }
        if self.queue_size_limit == 0 || self.storage_size_limit == 0 {
            return Err(TrackerError::Config(
                "queue and storage size limits must be positive".into(),
            ));
        }
        if !self.dry_run {
            reqwest::Url::parse(&self.collector_url).map_err(|e| {
                TrackerError::Config(format!("invalid collector_url {:?}: {e}", self.collector_url))
            })?;
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_millis(self.debounce_window_ms)
    }

    /// Full path of the overflow file.
    pub fn storage_path(&self) -> PathBuf {
        self.data_dir.join(STORAGE_FILE_NAME)
    }
}
