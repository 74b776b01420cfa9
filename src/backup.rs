//! Backup files for records the sink did not accept
//!
//! Each batch lands in its own write-once JSON file named
//! `{reason}_{timestamp}_{count}_records.json`. The pipeline never reads
//! these files back; they exist for manual recovery.

use crate::types::Record;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Why a batch was written to backup
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupReason {
    /// The sink accepted only part of the batch
    PartialFailure,
    /// The sink raised an error for the whole batch
    DbFailure,
}

impl BackupReason {
    /// Code used as the filename prefix
    pub fn code(&self) -> &'static str {
        match self {
            BackupReason::PartialFailure => "partial_failure",
            BackupReason::DbFailure => "db_failure",
        }
    }
}

impl std::fmt::Display for BackupReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Upper bound on suffixes tried when timestamps collide
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Writes record batches to the backup directory
#[derive(Clone, Debug)]
pub struct BackupWriter {
    dir: PathBuf,
}

impl BackupWriter {
    /// Create a writer targeting `dir` (created on first write)
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Backup directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `records` as a pretty JSON array in their original form
    ///
    /// Returns `Ok(None)` without touching the filesystem for an empty batch.
    /// A file is never overwritten: if the timestamped name is taken a
    /// numeric suffix is appended.
    pub async fn write(&self, reason: BackupReason, records: &[Record]) -> Result<Option<PathBuf>> {
        if records.is_empty() {
            return Ok(None);
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::Backup {
                path: self.dir.clone(),
                reason: format!("Failed to create backup directory: {}", e),
            })?;

        let body = serde_json::to_vec_pretty(records)?;
        let stem = format!(
            "{}_{}_{}_records",
            reason.code(),
            chrono::Local::now().format("%Y-%m-%d_%H-%M-%S%.3f"),
            records.len()
        );

        let mut attempt = 0;
        loop {
            let name = if attempt == 0 {
                format!("{stem}.json")
            } else {
                format!("{stem}_{attempt}.json")
            };
            let path = self.dir.join(name);

            let file = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;

            match file {
                Ok(mut file) => {
                    let written = async {
                        file.write_all(&body).await?;
                        file.flush().await?;
                        file.sync_all().await
                    }
                    .await;
                    if let Err(e) = written {
                        return Err(Error::Backup {
                            path,
                            reason: e.to_string(),
                        });
                    }

                    tracing::warn!(
                        reason = %reason,
                        records = records.len(),
                        path = %path.display(),
                        "Wrote backup batch"
                    );
                    return Ok(Some(path));
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    attempt += 1;
                    if attempt >= MAX_NAME_ATTEMPTS {
                        return Err(Error::Backup {
                            path,
                            reason: "no free backup filename".to_string(),
                        });
                    }
                }
                Err(e) => {
                    return Err(Error::Backup {
                        path,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}
