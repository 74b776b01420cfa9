//! # listing-ingest
//!
//! Buffered, failure-tolerant ingestion of paginated listings into a sink.
//!
//! ## Design Philosophy
//!
//! listing-ingest is designed to be:
//! - **Loss-averse** - Every validated record ends up in the sink or in a backup file
//! - **Resumable** - Incremental sessions skip what the sink already holds
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! A session walks a page range, extracts listing candidates from each page,
//! validates them and buffers the survivors. Full buffers are flushed to the
//! [`Sink`]; records the sink does not accept are written to timestamped JSON
//! backup files. Sessions run sequentially with one fetch context or in
//! parallel with a pool of workers feeding a single collector.
//!
//! ## Quick Start
//!
//! ```no_run
//! use listing_ingest::{Config, Ingestor, SessionMode};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.session.start_page = 1;
//!     config.session.end_page = 50;
//!     config.session.mode = SessionMode::Parallel;
//!     config.incremental.incremental = true;
//!
//!     let ingestor = Ingestor::from_config(config).await?;
//!
//!     // Subscribe to events
//!     let mut events = ingestor.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let report = ingestor.run(CancellationToken::new()).await;
//!     println!("saved {} records", report.stats.records_saved);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Backup files for records the sink did not accept
pub mod backup;
/// Record buffer and flush coordination
pub mod buffer;
/// Configuration types
pub mod config;
/// SQLite sink
pub mod db;
/// Error types
pub mod error;
/// Known listing references
pub mod ledger;
/// Page fetching, parsing and filtering
pub mod page;
/// Retry logic with exponential backoff
pub mod retry;
/// Sequential and parallel ingestion sessions
pub mod session;
/// Sink abstraction
pub mod sink;
/// Incremental session state file
pub mod state;
/// Core types and events
pub mod types;
/// Record schema validation
pub mod validator;

#[cfg(test)]
mod test_helpers;

// Re-export commonly used types
pub use backup::{BackupReason, BackupWriter};
pub use config::{Config, SessionMode};
pub use db::Database;
pub use error::{DatabaseError, Error, FailureKind, Result};
pub use ledger::ReferenceLedger;
pub use page::{FetcherFactory, PageFetcher, PageParser, ParsedPage};
pub use session::{Ingestor, SessionReport};
pub use sink::{InsertReport, Sink};
pub use state::{SessionState, StateStore};
pub use types::{Event, PageId, Record, SessionPhase, Stats};
pub use validator::validate;

use tokio_util::sync::CancellationToken;

/// Run one session in the configured mode, stopping cleanly on a signal.
///
/// On a termination signal the session is cancelled: no new page is started,
/// pages already being fetched complete, and the usual final flush and state
/// file write happen before the report is returned.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use listing_ingest::{Config, Ingestor, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let ingestor = Ingestor::from_config(Config::default()).await?;
///
///     // Run with automatic signal handling
///     let report = run_with_shutdown(&ingestor).await;
///     println!("{:?}", report.phase);
///
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(ingestor: &Ingestor) -> SessionReport {
    let cancel = CancellationToken::new();
    let run = ingestor.run(cancel.clone());
    tokio::pin!(run);

    tokio::select! {
        report = &mut run => report,
        _ = wait_for_signal() => {
            tracing::info!("Stopping session, in-flight pages will complete");
            cancel.cancel();
            run.await
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
