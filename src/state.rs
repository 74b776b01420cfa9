//! Session state file
//!
//! A small JSON document written at the end of every incremental session and
//! read at the start of the next. It is advisory: deduplication relies on
//! the reference ledger rebuilt from the sink, and the timestamp never
//! filters which pages are fetched.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Summary of the previous incremental session
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    /// When the session finished
    #[serde(alias = "last_scrape_time", deserialize_with = "timestamp")]
    pub last_run_time: DateTime<Utc>,
    /// New records found by that session
    #[serde(alias = "cars_found")]
    pub new_records: u64,
    /// References known when it finished
    #[serde(default, alias = "total_known_cars")]
    pub total_known: u64,
}

// Accepts RFC 3339 and naive ISO-8601 timestamps (read as UTC)
fn timestamp<'de, D>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

/// Reads and writes the session state file
#[derive(Clone, Debug)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Store backed by `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// State file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the previous session's state
    ///
    /// A missing file means first run. An unreadable or corrupt file is
    /// logged and also treated as first run.
    pub async fn load(&self) -> Option<SessionState> {
        match self.read().await {
            Ok(Some(state)) => {
                tracing::info!(
                    last_run_time = %state.last_run_time,
                    new_records = state.new_records,
                    total_known = state.total_known,
                    "Loaded previous session state"
                );
                Some(state)
            }
            Ok(None) => {
                tracing::info!(path = %self.path.display(), "No previous session state, first run");
                None
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Ignoring unreadable session state"
                );
                None
            }
        }
    }

    async fn read(&self) -> Result<Option<SessionState>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::State(format!("Failed to read state file: {}", e))),
        };
        let state = serde_json::from_slice(&bytes)
            .map_err(|e| Error::State(format!("Failed to parse state file: {}", e)))?;
        Ok(Some(state))
    }

    /// Write the state for the session that just ended
    ///
    /// Returns whether the write succeeded. Failure is logged, never fatal.
    pub async fn persist(&self, new_records: u64, total_known: u64) -> bool {
        let state = SessionState {
            last_run_time: Utc::now(),
            new_records,
            total_known,
        };
        match self.write(&state).await {
            Ok(()) => {
                tracing::info!(
                    path = %self.path.display(),
                    new_records,
                    total_known,
                    "Saved session state"
                );
                true
            }
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    "Failed to save session state"
                );
                false
            }
        }
    }

    async fn write(&self, state: &SessionState) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::State(format!("Failed to create state directory: {}", e)))?;
        }

        let body = serde_json::to_vec_pretty(state)?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| Error::State(format!("Failed to write state file: {}", e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::State(format!("Failed to replace state file: {}", e)))?;

        Ok(())
    }
}
