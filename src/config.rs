//! Configuration types for listing-ingest

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, str::FromStr, time::Duration};

/// How pages are scheduled
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// One fetch context, pages in order
    #[default]
    Sequential,
    /// A pool of workers fed from a shared page queue
    Parallel,
}

impl FromStr for SessionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Ok(SessionMode::Sequential),
            "parallel" => Ok(SessionMode::Parallel),
            other => Err(Error::config(
                "mode",
                format!("unknown session mode '{other}' (expected 'sequential' or 'parallel')"),
            )),
        }
    }
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionMode::Sequential => f.write_str("sequential"),
            SessionMode::Parallel => f.write_str("parallel"),
        }
    }
}

/// Page range and scheduling settings
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Scheduling model (default: sequential)
    #[serde(default)]
    pub mode: SessionMode,

    /// First page to ingest, inclusive (default: 1)
    #[serde(default = "default_start_page")]
    pub start_page: u32,

    /// Last page to ingest, inclusive (default: 10)
    #[serde(default = "default_end_page")]
    pub end_page: u32,

    /// Number of parallel workers (default: 2)
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// How long an idle worker waits on the page queue before re-checking (default: 200ms)
    #[serde(default = "default_queue_poll_timeout", with = "duration_millis_serde")]
    pub queue_poll_timeout: Duration,

    /// Sequential mode: report progress every N pages (default: 5)
    #[serde(default = "default_progress_every_pages")]
    pub progress_every_pages: u32,

    /// Parallel mode: report progress at this interval (default: 5s)
    #[serde(default = "default_progress_interval", with = "duration_millis_serde")]
    pub progress_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: SessionMode::default(),
            start_page: default_start_page(),
            end_page: default_end_page(),
            workers: default_workers(),
            queue_poll_timeout: default_queue_poll_timeout(),
            progress_every_pages: default_progress_every_pages(),
            progress_interval: default_progress_interval(),
        }
    }
}

impl SessionConfig {
    /// Number of pages in the configured range
    pub fn page_count(&self) -> usize {
        if self.end_page < self.start_page {
            0
        } else {
            (self.end_page - self.start_page) as usize + 1
        }
    }
}

/// Buffering settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Records held in memory before a flush is triggered (default: 3000)
    #[serde(default = "default_flush_threshold")]
    pub flush_threshold: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            flush_threshold: default_flush_threshold(),
        }
    }
}

/// Backup file settings for batches the sink could not take
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Write backup files for failed flushes (default: true)
    #[serde(default = "default_true")]
    pub backup_enabled: bool,

    /// Directory for backup files (default: "data/backup")
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            backup_enabled: true,
            backup_dir: default_backup_dir(),
        }
    }
}

/// Incremental mode settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IncrementalConfig {
    /// Skip records whose reference is already in the sink (default: false)
    #[serde(default)]
    pub incremental: bool,

    /// Session state file (default: "data/scraping_state.json")
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

impl Default for IncrementalConfig {
    fn default() -> Self {
        Self {
            incremental: false,
            state_file: default_state_file(),
        }
    }
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "listings.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Listing page retrieval settings for the built-in HTTP fetcher
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Listing URL template; `{page}` is replaced by the page number
    #[serde(default = "default_listing_url")]
    pub listing_url: String,

    /// Base for resolving relative listing links
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// User-Agent header sent with each request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            listing_url: default_listing_url(),
            base_url: default_base_url(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl FetchConfig {
    /// Listing URL for one page
    pub fn page_url(&self, page: u32) -> String {
        self.listing_url.replace("{page}", &page.to_string())
    }
}

/// Retry configuration for acquiring worker fetch contexts
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Main configuration for an ingestion session
///
/// Fields are organized into logical sub-configs:
/// - [`session`](SessionConfig) - page range, mode, workers, progress cadence
/// - [`buffer`](BufferConfig) - flush threshold
/// - [`backup`](BackupConfig) - backup directory
/// - [`incremental`](IncrementalConfig) - dedup against the sink, state file
/// - [`fetch`](FetchConfig) - HTTP listing retrieval
///
/// Sub-configs are flattened, so the JSON form is a single flat object
/// except for `persistence` and `retry`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Page range and scheduling
    #[serde(flatten)]
    pub session: SessionConfig,

    /// Buffer behaviour
    #[serde(flatten)]
    pub buffer: BufferConfig,

    /// Backup files
    #[serde(flatten)]
    pub backup: BackupConfig,

    /// Incremental mode
    #[serde(flatten)]
    pub incremental: IncrementalConfig,

    /// HTTP fetcher settings
    #[serde(flatten)]
    pub fetch: FetchConfig,

    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Fetch context acquisition retry
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    /// Reject settings that would make a session meaningless
    ///
    /// This is the only fatal check in the pipeline; it runs before any page
    /// is fetched.
    pub fn validate(&self) -> Result<()> {
        if self.session.end_page < self.session.start_page {
            return Err(Error::config(
                "end_page",
                format!(
                    "end_page ({}) is before start_page ({})",
                    self.session.end_page, self.session.start_page
                ),
            ));
        }
        if self.buffer.flush_threshold == 0 {
            return Err(Error::config(
                "flush_threshold",
                "flush_threshold must be at least 1",
            ));
        }
        if self.session.mode == SessionMode::Parallel && self.session.workers == 0 {
            return Err(Error::config(
                "workers",
                "parallel mode needs at least one worker",
            ));
        }
        if !self.fetch.listing_url.contains("{page}") {
            return Err(Error::config(
                "listing_url",
                format!(
                    "listing_url '{}' has no {{page}} placeholder",
                    self.fetch.listing_url
                ),
            ));
        }
        Ok(())
    }
}

// Default value functions
fn default_start_page() -> u32 {
    1
}

fn default_end_page() -> u32 {
    10
}

fn default_workers() -> usize {
    2
}

fn default_queue_poll_timeout() -> Duration {
    Duration::from_millis(200)
}

fn default_progress_every_pages() -> u32 {
    5
}

fn default_progress_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_flush_threshold() -> usize {
    3000
}

fn default_true() -> bool {
    true
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("data/backup")
}

fn default_state_file() -> PathBuf {
    PathBuf::from("data/scraping_state.json")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("listings.db")
}

fn default_listing_url() -> String {
    "https://www.lacentrale.fr/listing?options=&page={page}&sortBy=firstOnlineDateDesc".to_string()
}

fn default_base_url() -> String {
    "https://www.lacentrale.fr".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    concat!("listing-ingest/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Sub-second Duration serialization helper
mod duration_millis_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
