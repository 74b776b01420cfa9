//! In-memory record buffer and the flush that drains it into the sink.
//!
//! The buffer never flushes on its own; whoever owns it checks
//! [`Buffer::is_full`] and calls [`FlushCoordinator::flush`]. Every flush
//! leaves the buffer empty. Records the sink does not take are routed to the
//! backup writer, which is the only recovery path (sink writes are never
//! retried).

use crate::backup::{BackupReason, BackupWriter};
use crate::sink::{InsertReport, Sink};
use crate::types::{Event, Record, Stats};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Ordered records awaiting a flush
#[derive(Debug)]
pub struct Buffer {
    records: Vec<Record>,
    threshold: usize,
}

impl Buffer {
    /// Empty buffer that reports full at `threshold` records
    pub fn new(threshold: usize) -> Self {
        Self {
            records: Vec::with_capacity(threshold.min(4096)),
            threshold: threshold.max(1),
        }
    }

    /// Add one record
    pub fn append(&mut self, record: Record) {
        self.records.push(record);
    }

    /// Add a page's worth of records, preserving order
    pub fn extend(&mut self, records: impl IntoIterator<Item = Record>) {
        self.records.extend(records);
    }

    /// Records currently held
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing is held
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Flush threshold
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Whether the owner should flush now
    pub fn is_full(&self) -> bool {
        self.records.len() >= self.threshold
    }

    /// Take every record, leaving the buffer empty
    pub fn drain(&mut self) -> Vec<Record> {
        std::mem::take(&mut self.records)
    }
}

/// What a flush did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Buffer was empty; the sink was not called
    Empty,
    /// Every record was accepted
    Saved {
        /// Records accepted
        accepted: usize,
    },
    /// The sink took only part of the batch
    Partial {
        /// Records accepted
        accepted: usize,
        /// Records written to a backup file (0 if backups are disabled or failed)
        backed_up: usize,
    },
    /// The sink raised an error
    Failed {
        /// Records written to a backup file (0 if backups are disabled or failed)
        backed_up: usize,
    },
}

impl FlushOutcome {
    /// Records the sink accepted
    pub fn accepted(&self) -> usize {
        match self {
            FlushOutcome::Saved { accepted } | FlushOutcome::Partial { accepted, .. } => *accepted,
            FlushOutcome::Empty | FlushOutcome::Failed { .. } => 0,
        }
    }
}

/// Drains a [`Buffer`] into the sink, with backup on failure
#[derive(Clone)]
pub struct FlushCoordinator {
    sink: Arc<dyn Sink>,
    backup: Option<BackupWriter>,
    event_tx: Option<broadcast::Sender<Event>>,
}

impl FlushCoordinator {
    /// Coordinator writing to `sink`; `backup` is `None` when backups are disabled
    pub fn new(sink: Arc<dyn Sink>, backup: Option<BackupWriter>) -> Self {
        Self {
            sink,
            backup,
            event_tx: None,
        }
    }

    /// Emit [`Event::Flushed`] and [`Event::BackupWritten`] on `event_tx`
    pub fn with_events(mut self, event_tx: broadcast::Sender<Event>) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    /// Flush during the session (threshold reached)
    pub async fn flush(&self, buffer: &mut Buffer, stats: &mut Stats) -> FlushOutcome {
        self.flush_inner(buffer, stats, false).await
    }

    /// End-of-session flush
    pub async fn flush_final(&self, buffer: &mut Buffer, stats: &mut Stats) -> FlushOutcome {
        self.flush_inner(buffer, stats, true).await
    }

    async fn flush_inner(
        &self,
        buffer: &mut Buffer,
        stats: &mut Stats,
        final_flush: bool,
    ) -> FlushOutcome {
        if buffer.is_empty() {
            return FlushOutcome::Empty;
        }

        let batch = buffer.drain();
        let submitted = batch.len();
        stats.flush_attempts += 1;

        tracing::debug!(submitted, final_flush, "Flushing buffer");

        let outcome = match self.sink.insert_many(&batch).await {
            Ok(report) if report.accepted >= submitted => {
                tracing::info!(accepted = submitted, final_flush, "Flushed buffer to sink");
                FlushOutcome::Saved {
                    accepted: submitted,
                }
            }
            Ok(report) => {
                let accepted = report.accepted;
                let remainder = unaccepted(batch, &report);
                tracing::warn!(
                    submitted,
                    accepted,
                    remainder = remainder.len(),
                    final_flush,
                    "Sink accepted only part of the batch"
                );
                let backed_up = self
                    .backup(BackupReason::PartialFailure, &remainder, stats)
                    .await;
                FlushOutcome::Partial {
                    accepted,
                    backed_up,
                }
            }
            Err(e) => {
                stats.sink_errors += 1;
                stats.errors += 1;
                tracing::error!(
                    submitted,
                    final_flush,
                    error = %e,
                    kind = %e.kind(),
                    "Sink write failed"
                );
                let backed_up = self.backup(BackupReason::DbFailure, &batch, stats).await;
                FlushOutcome::Failed { backed_up }
            }
        };

        let accepted = outcome.accepted();
        stats.records_saved += accepted as u64;
        self.emit(Event::Flushed {
            submitted,
            accepted,
            final_flush,
        });

        outcome
    }

    /// Write a backup batch; returns how many records it holds (0 on failure)
    async fn backup(&self, reason: BackupReason, records: &[Record], stats: &mut Stats) -> usize {
        let Some(writer) = &self.backup else {
            if !records.is_empty() {
                tracing::warn!(
                    reason = %reason,
                    records = records.len(),
                    "Backups disabled, unsaved records dropped"
                );
            }
            return 0;
        };

        match writer.write(reason, records).await {
            Ok(Some(path)) => {
                stats.backups_written += 1;
                self.emit(Event::BackupWritten {
                    reason,
                    path,
                    records: records.len(),
                });
                records.len()
            }
            Ok(None) => 0,
            Err(e) => {
                stats.backup_failures += 1;
                stats.errors += 1;
                tracing::error!(
                    reason = %reason,
                    records = records.len(),
                    error = %e,
                    "Failed to write backup batch, records lost"
                );
                0
            }
        }
    }

    fn emit(&self, event: Event) {
        if let Some(tx) = &self.event_tx {
            // No subscribers is fine
            let _ = tx.send(event);
        }
    }
}

/// Records of `batch` the sink did not store
///
/// Uses the exact rejected references when the sink reports them, otherwise
/// the positional tail beyond the accepted count.
fn unaccepted(batch: Vec<Record>, report: &InsertReport) -> Vec<Record> {
    let expected = batch.len().saturating_sub(report.accepted);
    match &report.rejected {
        Some(rejected) if rejected.len() == expected => {
            let rejected: HashSet<&str> = rejected.iter().map(String::as_str).collect();
            batch
                .into_iter()
                .filter(|record| rejected.contains(record.reference()))
                .collect()
        }
        _ => batch.into_iter().skip(report.accepted).collect(),
    }
}
