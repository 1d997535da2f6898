//! Recorder configuration (recorder.toml)
//!
//! Handles loading, saving, and providing defaults for recorder settings.
//! Settings are stored in TOML format in the platform-specific config
//! directory; every field is optional in the file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default size of the chunk buffer (1 MiB)
pub const DEFAULT_REPLAY_BUFFER_CAPACITY: usize = 1024 * 1024;
/// Default size of the event batch buffer (200 KiB)
pub const DEFAULT_EVENT_BUFFER_CAPACITY: usize = 200 * 1024;
pub const DEFAULT_EXPECTED_MAX_TRACKED_OBJECTS: usize = 250;
pub const DEFAULT_EXPECTED_MAX_TICKS_IN_FLIGHT: usize = 5;

const CONFIG_FILE: &str = "recorder.toml";

/// Errors loading or saving a config file
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Verbosity of recorder diagnostics
///
/// Applied on top of the `tracing` filter: a message is emitted only when
/// the configured level is at least the message's level.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    None,
    Error,
    #[default]
    Warning,
    Info,
    /// Per-cycle encode timings
    Profiling,
}

impl LogLevel {
    /// Whether messages at `level` should be emitted
    pub fn allows(self, level: LogLevel) -> bool {
        level != LogLevel::None && self >= level
    }
}

/// Recorder settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Application version written into every chunk header
    pub app_version: String,
    /// User id attached to every recorded event
    pub user_id: String,
    /// Nominal tick rate written into every chunk header (default: 20)
    pub tick_rate_hz: i16,
    /// Chunk buffer size in bytes (default: 1 MiB)
    pub replay_buffer_capacity: usize,
    /// Event batch buffer size in bytes (default: 200 KiB)
    pub event_buffer_capacity: usize,
    /// Maximum time a chunk or event batch is held before flushing (default: 500ms)
    pub flush_interval_ms: u64,
    /// Upper bound on the worker's idle wait between cycles (default: 1ms)
    pub poll_interval_ms: u64,
    /// Expected number of tracked objects, used to size pools (default: 250)
    pub expected_max_tracked_objects: usize,
    /// Ticks allowed to queue before the oldest are dropped (default: 5)
    pub expected_max_ticks_in_flight: usize,
    /// Expected number of events per batch (default: 100)
    pub expected_max_events_in_packet: usize,
    /// Concurrent uploads before new chunks go straight to disk (default: 1000)
    pub max_outstanding_uploads: usize,
    /// Interval between failed chunk retry sweeps (default: 60s)
    pub retry_interval_secs: u64,
    /// How long the first chunk waits for geolocation (default: 3s)
    pub geolocation_wait_ms: u64,
    /// Bound on the worker join and upload drain at shutdown (default: 5s)
    pub shutdown_timeout_ms: u64,
    /// Where chunks that failed to upload are kept (default: data dir)
    pub failed_chunks_dir: Option<PathBuf>,
    /// Optional base64 text copy of every chunk, grouped by session
    pub session_cache_dir: Option<PathBuf>,
    pub log_level: LogLevel,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            app_version: String::new(),
            user_id: String::new(),
            tick_rate_hz: 20,
            replay_buffer_capacity: DEFAULT_REPLAY_BUFFER_CAPACITY,
            event_buffer_capacity: DEFAULT_EVENT_BUFFER_CAPACITY,
            flush_interval_ms: 500,
            poll_interval_ms: 1,
            expected_max_tracked_objects: DEFAULT_EXPECTED_MAX_TRACKED_OBJECTS,
            expected_max_ticks_in_flight: DEFAULT_EXPECTED_MAX_TICKS_IN_FLIGHT,
            expected_max_events_in_packet: 100,
            max_outstanding_uploads: 1000,
            retry_interval_secs: 60,
            geolocation_wait_ms: 3000,
            shutdown_timeout_ms: 5000,
            failed_chunks_dir: None,
            session_cache_dir: None,
            log_level: LogLevel::default(),
        }
    }
}

impl RecorderConfig {
    /// Load a config file, surfacing I/O and parse errors
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn geolocation_wait(&self) -> Duration {
        Duration::from_millis(self.geolocation_wait_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Capacity of the object snapshot pool: every tracked object in every
    /// tick that may be queued at once
    pub fn object_pool_capacity(&self) -> usize {
        self.expected_max_tracked_objects * self.expected_max_ticks_in_flight.max(1)
    }

    /// Directory for failed chunks, falling back to the platform data dir
    pub fn resolved_failed_chunks_dir(&self) -> Option<PathBuf> {
        self.failed_chunks_dir
            .clone()
            .or_else(|| data_dir().map(|dir| dir.join("FailedChunks")))
    }
}

/// Returns the platform-specific configuration directory.
///
/// On Windows: `%APPDATA%\Insight\config`
/// On macOS: `~/Library/Application Support/io.insightxr.Insight`
/// On Linux: `~/.config/insight`
///
/// Returns `None` if the home directory cannot be determined.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io", "insightxr", "Insight")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Returns the platform-specific data directory for persisted chunks.
///
/// Returns `None` if the home directory cannot be determined.
pub fn data_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io", "insightxr", "Insight")
        .map(|dirs| dirs.data_dir().to_path_buf())
}

/// Loads the configuration from disk.
///
/// Reads `recorder.toml` from the platform's configuration directory.
/// Returns default values if the file doesn't exist or cannot be parsed.
pub fn load() -> RecorderConfig {
    config_dir()
        .and_then(|dir| std::fs::read_to_string(dir.join(CONFIG_FILE)).ok())
        .and_then(|content| toml::from_str(&content).ok())
        .unwrap_or_default()
}

/// Saves the configuration to disk.
///
/// Writes `recorder.toml` to the platform's configuration directory,
/// creating the directory if it doesn't exist.
pub fn save(config: &RecorderConfig) -> Result<(), ConfigError> {
    if let Some(dir) = config_dir() {
        save_to(config, &dir.join(CONFIG_FILE))?;
    }
    Ok(())
}

/// Saves the configuration to an explicit path.
pub fn save_to(config: &RecorderConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
