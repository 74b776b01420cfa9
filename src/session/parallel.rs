//! Parallel session: a pool of workers feeding a single collector.
//!
//! Workers pull page numbers from a shared [`PageQueue`], each with its own
//! fetch context, and send what they found over a bounded channel. The
//! collector is the only task that touches the buffer, the statistics and
//! the reference ledger. Workers read a snapshot of the ledger taken after
//! seeding; duplicates that slip past the snapshot are caught when the
//! collector admits them.

use crate::config::{RetryConfig, SessionMode};
use crate::error::Error;
use crate::ledger::ReferenceLedger;
use crate::page::{FetcherFactory, PageProcessor, PageYield};
use crate::types::{Event, PageId, SessionPhase};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use super::{Ingestor, Session, SessionReport, acquire_fetcher};

/// Minimum capacity of the worker result channel
const MIN_CHANNEL_CAPACITY: usize = 16;

/// Result messages queued per worker before senders wait
const MESSAGES_PER_WORKER: usize = 4;

/// Page numbers waiting for a worker
///
/// Each page is handed out exactly once. Closing the queue drops whatever
/// is still waiting.
#[derive(Debug, Default)]
pub struct PageQueue {
    pages: Mutex<VecDeque<PageId>>,
}

impl PageQueue {
    /// Queue holding `pages` in order
    pub fn new<I: IntoIterator<Item = PageId>>(pages: I) -> Self {
        Self {
            pages: Mutex::new(pages.into_iter().collect()),
        }
    }

    /// Queue holding every page in `start..=end`
    pub fn for_range(start: u32, end: u32) -> Self {
        Self::new((start..=end).map(PageId))
    }

    /// Next page, or `None` once the queue is empty or closed
    pub async fn pop(&self) -> Option<PageId> {
        self.pages.lock().await.pop_front()
    }

    /// Drop every waiting page; returns how many were dropped
    pub async fn close(&self) -> usize {
        let mut pages = self.pages.lock().await;
        let dropped = pages.len();
        pages.clear();
        dropped
    }

    /// Pages still waiting
    pub async fn len(&self) -> usize {
        self.pages.lock().await.len()
    }

    /// Whether no page is waiting
    pub async fn is_empty(&self) -> bool {
        self.pages.lock().await.is_empty()
    }
}

/// What a worker reports to the collector
#[derive(Debug)]
pub enum WorkerMessage {
    /// Fetch context acquired, about to pull pages
    Started {
        /// Worker number
        worker_id: usize,
    },
    /// One page handled, successfully or not
    Page {
        /// Worker number
        worker_id: usize,
        /// Page number
        page: PageId,
        /// Records found, or the fetch error
        outcome: crate::Result<PageYield>,
    },
    /// No fetch context could be acquired; the worker is gone
    Failed {
        /// Worker number
        worker_id: usize,
        /// Acquisition error
        error: Error,
    },
    /// Worker stopped pulling pages
    Finished {
        /// Worker number
        worker_id: usize,
        /// Pages the worker handled
        pages: u64,
        /// Records the worker sent
        records: u64,
    },
}

/// Everything one worker task needs
struct WorkerContext {
    worker_id: usize,
    queue: Arc<PageQueue>,
    fetchers: Arc<dyn FetcherFactory>,
    retry: RetryConfig,
    processor: PageProcessor,
    ledger: Option<Arc<ReferenceLedger>>,
    tx: mpsc::Sender<WorkerMessage>,
    cancel: CancellationToken,
}

/// Pull pages until the queue is empty or the session is cancelled
async fn run_worker(ctx: WorkerContext) {
    let WorkerContext {
        worker_id,
        queue,
        fetchers,
        retry,
        processor,
        ledger,
        tx,
        cancel,
    } = ctx;

    let fetcher = match acquire_fetcher(fetchers.as_ref(), &retry, worker_id, &cancel).await {
        Ok(fetcher) => fetcher,
        Err(Error::Cancelled) => {
            tracing::debug!(worker_id, "Cancelled before a fetch context was acquired");
            let _ = tx
                .send(WorkerMessage::Finished {
                    worker_id,
                    pages: 0,
                    records: 0,
                })
                .await;
            return;
        }
        Err(error) => {
            let _ = tx.send(WorkerMessage::Failed { worker_id, error }).await;
            return;
        }
    };

    if tx.send(WorkerMessage::Started { worker_id }).await.is_err() {
        fetcher.close().await;
        return;
    }
    tracing::debug!(worker_id, "Worker started");

    let mut pages = 0u64;
    let mut records = 0u64;
    while !cancel.is_cancelled() {
        let Some(page) = queue.pop().await else {
            break;
        };

        let outcome = processor
            .process(page, fetcher.as_ref(), ledger.as_deref())
            .await;
        pages += 1;
        if let Ok(page_yield) = &outcome {
            records += page_yield.records.len() as u64;
        }

        let message = WorkerMessage::Page {
            worker_id,
            page,
            outcome,
        };
        if tx.send(message).await.is_err() {
            tracing::warn!(worker_id, page = page.get(), "Collector gone, stopping worker");
            break;
        }
    }

    fetcher.close().await;
    tracing::debug!(worker_id, pages, records, "Worker finished");
    let _ = tx
        .send(WorkerMessage::Finished {
            worker_id,
            pages,
            records,
        })
        .await;
}

impl Ingestor {
    /// Run the page range with a pool of workers
    ///
    /// Pages are completed in no particular order. On cancellation the
    /// queue is closed, pages already being fetched complete, and the
    /// session ends with the usual final flush and state file write.
    pub async fn run_parallel(&self, cancel: CancellationToken) -> SessionReport {
        let mut session = self.begin(SessionMode::Parallel).await;
        let config = self.config.session.clone();

        let queue = Arc::new(PageQueue::for_range(config.start_page, config.end_page));
        let page_count = (config.end_page - config.start_page) as usize + 1;
        let workers = config.workers.clamp(1, page_count);

        let ledger = session
            .incremental
            .then(|| Arc::new(session.ledger.clone()));
        let processor = PageProcessor::new(self.parser.clone(), session.incremental);

        let (tx, mut rx) = mpsc::channel(
            (workers * MESSAGES_PER_WORKER).max(MIN_CHANNEL_CAPACITY),
        );
        let handles: Vec<_> = (1..=workers)
            .map(|worker_id| {
                tokio::spawn(run_worker(WorkerContext {
                    worker_id,
                    queue: queue.clone(),
                    fetchers: self.fetchers.clone(),
                    retry: self.config.retry.clone(),
                    processor: processor.clone(),
                    ledger: ledger.clone(),
                    tx: tx.clone(),
                    cancel: cancel.clone(),
                }))
            })
            .collect();
        drop(tx);

        tracing::info!(workers, pages = page_count, "Workers spawned");

        let mut phase = SessionPhase::Completed;
        let mut cancelled = false;
        let mut failed_workers = 0usize;
        let mut last_progress = Instant::now();

        loop {
            if cancel.is_cancelled() && !cancelled {
                cancelled = true;
                let dropped = queue.close().await;
                tracing::warn!(dropped, "Cancellation requested, closed the page queue");
                phase = SessionPhase::Aborted;
            }

            match tokio::time::timeout(config.queue_poll_timeout, rx.recv()).await {
                Ok(Some(message)) => {
                    if let WorkerMessage::Failed { .. } = &message {
                        failed_workers += 1;
                    }
                    self.handle_message(&mut session, message).await;
                }
                Ok(None) => break,
                Err(_) => {}
            }

            if last_progress.elapsed() >= config.progress_interval {
                session.report_progress();
                last_progress = Instant::now();
            }
        }

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                session.stats.errors += 1;
                tracing::error!(error = %e, "Worker task panicked");
            }
        }

        let remaining = queue.close().await;
        if remaining > 0 {
            tracing::warn!(remaining, "Pages left unprocessed");
            phase = SessionPhase::Aborted;
        }
        if failed_workers == workers {
            tracing::error!(workers, "No worker could acquire a fetch context");
            phase = SessionPhase::Aborted;
        }

        self.finish(session, phase).await
    }

    /// Fold one worker message into the session
    async fn handle_message(&self, session: &mut Session, message: WorkerMessage) {
        match message {
            WorkerMessage::Started { worker_id } => {
                session.emit(Event::WorkerStarted { worker_id });
            }
            WorkerMessage::Page {
                worker_id,
                outcome: Ok(page_yield),
                ..
            } => session.absorb(page_yield, worker_id).await,
            WorkerMessage::Page {
                worker_id,
                page,
                outcome: Err(e),
            } => session.page_failed(page, worker_id, &e),
            WorkerMessage::Failed { worker_id, error } => session.worker_failed(worker_id, &error),
            WorkerMessage::Finished {
                worker_id,
                pages,
                records,
            } => {
                tracing::info!(worker_id, pages, records, "Worker finished");
                session.emit(Event::WorkerFinished {
                    worker_id,
                    pages,
                    records,
                });
            }
        }
    }
}
