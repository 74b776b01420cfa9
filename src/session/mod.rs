//! Ingestion sessions
//!
//! An [`Ingestor`] runs one session over the configured page range, either
//! sequentially with a single fetch context or with a pool of workers
//! feeding a collector. In both modes a single task owns the buffer, the
//! statistics and the reference ledger; workers only produce page results.
//!
//! Every session ends the same way, whether it completed or was aborted:
//! a final flush, the state file in incremental mode, and a final report.

use crate::backup::BackupWriter;
use crate::buffer::{Buffer, FlushCoordinator};
use crate::config::{Config, SessionMode};
use crate::db::Database;
use crate::ledger::ReferenceLedger;
use crate::page::{
    FetcherFactory, HttpFetcherFactory, PageFetcher, PageParser, PageYield, PreloadedStateParser,
};
use crate::retry::with_retry;
use crate::sink::Sink;
use crate::state::{SessionState, StateStore};
use crate::types::{Event, PageId, SessionPhase, Stats};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

pub mod parallel;
mod sequential;

pub use parallel::{PageQueue, WorkerMessage};

/// Capacity of the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Runs ingestion sessions against a sink
///
/// Cheap to clone; clones share the sink, collaborators and event channel.
#[derive(Clone)]
pub struct Ingestor {
    config: Arc<Config>,
    sink: Arc<dyn Sink>,
    fetchers: Arc<dyn FetcherFactory>,
    parser: Arc<dyn PageParser>,
    event_tx: broadcast::Sender<Event>,
}

impl Ingestor {
    /// Create an ingestor from explicit collaborators
    ///
    /// Fails only if the configuration is invalid.
    pub fn new(
        config: Config,
        sink: Arc<dyn Sink>,
        fetchers: Arc<dyn FetcherFactory>,
        parser: Arc<dyn PageParser>,
    ) -> Result<Self> {
        config.validate()?;
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            config: Arc::new(config),
            sink,
            fetchers,
            parser,
            event_tx,
        })
    }

    /// Create an ingestor with the SQLite sink, HTTP fetcher and preloaded
    /// state parser
    pub async fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        let parser = PreloadedStateParser::new(&config.fetch.base_url)?;
        let fetchers = HttpFetcherFactory::new(config.fetch.clone());
        let db = Database::new(&config.persistence.database_path).await?;
        Self::new(config, Arc::new(db), Arc::new(fetchers), Arc::new(parser))
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run a session in the configured mode
    pub async fn run(&self, cancel: CancellationToken) -> SessionReport {
        match self.config.session.mode {
            SessionMode::Sequential => self.run_sequential(cancel).await,
            SessionMode::Parallel => self.run_parallel(cancel).await,
        }
    }

    fn emit(&self, event: Event) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    /// Shared session start: state file, ledger seed, buffer, flusher
    async fn begin(&self, mode: SessionMode) -> Session {
        let config = &self.config;
        let incremental = config.incremental.incremental;
        let mut stats = Stats::default();
        let mut ledger = ReferenceLedger::new();
        let state_store = incremental.then(|| StateStore::new(&config.incremental.state_file));

        let mut previous_state = None;
        if let Some(store) = &state_store {
            previous_state = store.load().await;
            if let Err(e) = ledger.seed(self.sink.as_ref()).await {
                stats.errors += 1;
                tracing::error!(
                    error = %e,
                    kind = %e.kind(),
                    "Failed to seed reference ledger, continuing with an empty ledger"
                );
            }
        }

        let backup = config
            .backup
            .backup_enabled
            .then(|| BackupWriter::new(&config.backup.backup_dir));
        let flusher =
            FlushCoordinator::new(self.sink.clone(), backup).with_events(self.event_tx.clone());

        tracing::info!(
            mode = %mode,
            start_page = config.session.start_page,
            end_page = config.session.end_page,
            incremental,
            known_references = ledger.len(),
            flush_threshold = config.buffer.flush_threshold,
            "Starting ingestion session"
        );
        self.emit(Event::SessionStarted {
            mode,
            start_page: PageId(config.session.start_page),
            end_page: PageId(config.session.end_page),
            known_references: ledger.len(),
        });

        Session {
            mode,
            phase: SessionPhase::Running,
            stats,
            buffer: Buffer::new(config.buffer.flush_threshold),
            ledger,
            incremental,
            flusher,
            state_store,
            previous_state,
            event_tx: self.event_tx.clone(),
            started_at: Utc::now(),
        }
    }

    /// Shared session end: final flush, state file, report
    async fn finish(&self, mut session: Session, phase: SessionPhase) -> SessionReport {
        session.set_phase(SessionPhase::Flushing { final_flush: true });
        session
            .flusher
            .flush_final(&mut session.buffer, &mut session.stats)
            .await;

        let mut state_saved = false;
        if let Some(store) = &session.state_store {
            state_saved = store
                .persist(session.stats.new_records, session.ledger.len() as u64)
                .await;
            if !state_saved {
                session.stats.errors += 1;
            }
        }

        session.set_phase(phase);
        let finished_at = Utc::now();
        let stats = session.stats;
        let elapsed = (finished_at - session.started_at).num_milliseconds();

        tracing::info!(
            mode = %session.mode,
            phase = ?phase,
            elapsed_ms = elapsed,
            pages_processed = stats.pages_processed,
            pages_failed = stats.pages_failed,
            records_found = stats.records_found,
            records_validated = stats.records_validated,
            records_saved = stats.records_saved,
            records_skipped_invalid = stats.records_skipped_invalid,
            records_skipped_unlinked = stats.records_skipped_unlinked,
            existing_records_skipped = stats.existing_records_skipped,
            new_records = stats.new_records,
            flush_attempts = stats.flush_attempts,
            backups_written = stats.backups_written,
            backup_failures = stats.backup_failures,
            sink_errors = stats.sink_errors,
            fetch_errors = stats.fetch_errors,
            workers_failed = stats.workers_failed,
            errors = stats.errors,
            success_rate = format!("{:.1}", stats.success_rate()),
            "Ingestion session finished"
        );
        self.emit(Event::SessionFinished {
            phase,
            stats: stats.clone(),
            finished_at,
        });

        SessionReport {
            mode: session.mode,
            phase,
            stats,
            known_references: session.ledger.len(),
            previous_state: session.previous_state,
            state_saved,
            started_at: session.started_at,
            finished_at,
        }
    }
}

/// Acquire a worker-private fetch context, retrying transient failures
///
/// Returns [`Error::Cancelled`] if the token fires first.
pub(crate) async fn acquire_fetcher(
    fetchers: &dyn FetcherFactory,
    retry: &crate::config::RetryConfig,
    worker_id: usize,
    cancel: &CancellationToken,
) -> Result<Box<dyn PageFetcher>> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = with_retry(retry, || fetchers.create(worker_id)) => {
            result.map_err(|e| match e {
                Error::ResourceAcquisition { .. } => e,
                other => Error::ResourceAcquisition {
                    worker_id,
                    message: other.to_string(),
                },
            })
        }
    }
}

/// Result of one session
#[derive(Clone, Debug)]
pub struct SessionReport {
    /// Scheduling model used
    pub mode: SessionMode,
    /// `Completed` or `Aborted`
    pub phase: SessionPhase,
    /// Final counters
    pub stats: Stats,
    /// Size of the reference ledger at the end (0 outside incremental mode)
    pub known_references: usize,
    /// State left by the previous incremental session, if any
    pub previous_state: Option<SessionState>,
    /// Whether the state file was written
    pub state_saved: bool,
    /// Session start
    pub started_at: DateTime<Utc>,
    /// Session end
    pub finished_at: DateTime<Utc>,
}

impl SessionReport {
    /// Whether every page was attempted
    pub fn is_completed(&self) -> bool {
        self.phase == SessionPhase::Completed
    }
}

/// State owned by the single task that drives a session
pub(crate) struct Session {
    mode: SessionMode,
    phase: SessionPhase,
    stats: Stats,
    buffer: Buffer,
    ledger: ReferenceLedger,
    incremental: bool,
    flusher: FlushCoordinator,
    state_store: Option<StateStore>,
    previous_state: Option<SessionState>,
    event_tx: broadcast::Sender<Event>,
    started_at: DateTime<Utc>,
}

impl Session {
    fn set_phase(&mut self, phase: SessionPhase) {
        if self.phase != phase {
            tracing::trace!(from = ?self.phase, to = ?phase, "Session phase change");
            self.phase = phase;
        }
    }

    fn emit(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    /// Ledger for the page processor, only consulted in incremental mode
    fn ledger_view(&self) -> Option<&ReferenceLedger> {
        self.incremental.then_some(&self.ledger)
    }

    /// Fold a page's records into the buffer and flush at threshold
    async fn absorb(&mut self, page: PageYield, worker_id: usize) {
        self.set_phase(SessionPhase::Buffering);

        let stats = &mut self.stats;
        stats.pages_processed += 1;
        stats.records_found += page.found as u64;
        stats.existing_records_skipped += page.skipped_existing as u64;
        stats.records_skipped_unlinked += page.skipped_unlinked as u64;
        stats.records_skipped_invalid += page.skipped_invalid as u64;

        let records = if self.incremental {
            let (admitted, repeated) = self.ledger.admit(page.records);
            stats.existing_records_skipped += repeated as u64;
            stats.new_records += admitted.len() as u64;
            admitted
        } else {
            page.records
        };

        let count = records.len();
        stats.records_validated += count as u64;
        self.buffer.extend(records);

        tracing::info!(
            page = page.page.get(),
            worker_id,
            found = page.found,
            buffered = count,
            buffer_len = self.buffer.len(),
            "Page processed"
        );
        self.emit(Event::PageProcessed {
            page: page.page,
            worker_id,
            records: count,
        });

        if self.buffer.is_full() {
            self.set_phase(SessionPhase::Flushing { final_flush: false });
            self.flusher.flush(&mut self.buffer, &mut self.stats).await;
        }
        self.set_phase(SessionPhase::Running);
    }

    fn page_failed(&mut self, page: PageId, worker_id: usize, error: &Error) {
        self.stats.pages_failed += 1;
        self.stats.fetch_errors += 1;
        self.stats.errors += 1;
        tracing::warn!(
            page = page.get(),
            worker_id,
            error = %error,
            kind = %error.kind(),
            "Page failed, skipping"
        );
        self.emit(Event::PageFailed {
            page,
            worker_id,
            error: error.to_string(),
        });
        self.set_phase(SessionPhase::Running);
    }

    fn worker_failed(&mut self, worker_id: usize, error: &Error) {
        self.stats.workers_failed += 1;
        self.stats.errors += 1;
        tracing::error!(
            worker_id,
            error = %error,
            kind = %error.kind(),
            "Worker could not acquire a fetch context"
        );
        self.emit(Event::WorkerFailed {
            worker_id,
            error: error.to_string(),
        });
    }

    fn report_progress(&self) {
        let stats = &self.stats;
        tracing::info!(
            pages_processed = stats.pages_processed,
            pages_failed = stats.pages_failed,
            records_found = stats.records_found,
            records_saved = stats.records_saved,
            records_skipped = stats.records_skipped(),
            buffered = self.buffer.len(),
            errors = stats.errors,
            success_rate = format!("{:.1}", stats.success_rate()),
            "Ingestion progress"
        );
        self.emit(Event::Progress {
            stats: stats.clone(),
            buffered: self.buffer.len(),
        });
    }
}
