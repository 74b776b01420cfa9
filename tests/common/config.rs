//! Session configuration against a mock listing server

use listing_ingest::Config;
use listing_ingest::config::RetryConfig;
use std::path::Path;
use std::time::Duration;

/// Config fetching `start..=end` from `server_uri`, with every file under `dir`
pub fn server_config(dir: &Path, server_uri: &str, start: u32, end: u32) -> Config {
    let mut config = Config::default();
    config.session.start_page = start;
    config.session.end_page = end;
    config.session.queue_poll_timeout = Duration::from_millis(20);
    config.fetch.listing_url = format!("{server_uri}/listing?page={{page}}");
    config.fetch.base_url = server_uri.to_string();
    config.fetch.request_timeout = Duration::from_secs(5);
    config.backup.backup_dir = dir.join("backup");
    config.incremental.state_file = dir.join("scraping_state.json");
    config.persistence.database_path = dir.join("listings.db");
    config.retry = RetryConfig {
        max_attempts: 1,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config
}

/// Backup files written under `dir`, sorted by name
pub fn backup_files(dir: &Path) -> Vec<std::path::PathBuf> {
    let Ok(entries) = std::fs::read_dir(dir.join("backup")) else {
        return Vec::new();
    };
    let mut files: Vec<_> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
    files.sort();
    files
}
