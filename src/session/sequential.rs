//! Sequential session: one fetch context, pages in ascending order.

use crate::Error;
use crate::config::SessionMode;
use crate::page::PageProcessor;
use crate::types::{Event, PageId, SessionPhase};
use tokio_util::sync::CancellationToken;

use super::{Ingestor, SessionReport, acquire_fetcher};

/// Worker id reported for the single sequential context
const SEQUENTIAL_WORKER: usize = 0;

impl Ingestor {
    /// Run the page range with a single fetch context
    ///
    /// Cancellation is checked between pages; a page already being fetched
    /// completes first. The final flush and the state file write happen
    /// whether the session completed or not.
    pub async fn run_sequential(&self, cancel: CancellationToken) -> SessionReport {
        let mut session = self.begin(SessionMode::Sequential).await;
        let config = self.config.session.clone();

        let fetcher = match acquire_fetcher(
            self.fetchers.as_ref(),
            &self.config.retry,
            SEQUENTIAL_WORKER,
            &cancel,
        )
        .await
        {
            Ok(fetcher) => fetcher,
            Err(Error::Cancelled) => {
                tracing::warn!("Cancelled before a fetch context was acquired");
                return self.finish(session, SessionPhase::Aborted).await;
            }
            Err(e) => {
                session.worker_failed(SEQUENTIAL_WORKER, &e);
                return self.finish(session, SessionPhase::Aborted).await;
            }
        };
        self.emit(Event::WorkerStarted {
            worker_id: SEQUENTIAL_WORKER,
        });

        let processor = PageProcessor::new(self.parser.clone(), session.incremental);
        let progress_every = config.progress_every_pages.max(1);
        let mut phase = SessionPhase::Completed;
        let mut attempted: u32 = 0;

        for page in (config.start_page..=config.end_page).map(PageId) {
            if cancel.is_cancelled() {
                tracing::warn!(page = page.get(), "Cancellation requested, stopping before page");
                phase = SessionPhase::Aborted;
                break;
            }

            session.set_phase(SessionPhase::Fetching);
            match fetcher.fetch(page).await {
                Ok(content) => {
                    session.set_phase(SessionPhase::Parsing);
                    let page_yield = processor.extract(page, &content, session.ledger_view());
                    session.absorb(page_yield, SEQUENTIAL_WORKER).await;
                }
                Err(e) => session.page_failed(page, SEQUENTIAL_WORKER, &e),
            }

            attempted += 1;
            if attempted % progress_every == 0 {
                session.report_progress();
            }
        }

        fetcher.close().await;
        self.finish(session, phase).await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use crate::Ingestor;
    use crate::backup::BackupReason;
    use crate::sink::Sink;
    use crate::state::StateStore;
    use crate::test_helpers::{
        FailingSink, JsonPageParser, MemorySink, ScriptedFactory, ScriptedPages, page_json,
        test_config,
    };
    use crate::types::{Event, PageId, SessionPhase};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn ingestor(
        config: crate::Config,
        sink: Arc<dyn Sink>,
        factory: &ScriptedFactory,
    ) -> Ingestor {
        Ingestor::new(
            config,
            sink,
            Arc::new(factory.clone()),
            Arc::new(JsonPageParser),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn threshold_two_flushes_once_then_final() {
        let temp = TempDir::new().unwrap();
        let mut config = test_config(temp.path(), 1, 3);
        config.buffer.flush_threshold = 2;

        let pages = ScriptedPages::new([
            (1, page_json(&["A"])),
            (2, page_json(&["B"])),
            (3, page_json(&["C"])),
        ]);
        let factory = ScriptedFactory::new(pages);
        let sink = Arc::new(MemorySink::new());
        let ingestor = ingestor(config, sink.clone(), &factory);
        let mut events = ingestor.subscribe();

        let report = ingestor.run_sequential(CancellationToken::new()).await;

        assert_eq!(report.phase, SessionPhase::Completed);
        assert_eq!(report.stats.records_saved, 3);
        assert_eq!(report.stats.flush_attempts, 2);
        assert_eq!(report.stats.backups_written, 0);
        assert_eq!(sink.insert_calls(), 2);
        assert_eq!(sink.references(), vec!["A", "B", "C"]);
        assert!(!temp.path().join("backup").exists());

        let mut flushes = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let Event::Flushed {
                submitted,
                final_flush,
                ..
            } = event
            {
                flushes.push((submitted, final_flush));
            }
        }
        assert_eq!(flushes, vec![(2, false), (1, true)]);

        assert_eq!(factory.created(), 1);
        assert_eq!(factory.closed(), 1);
    }

    #[tokio::test]
    async fn failing_sink_backs_up_whole_batch() {
        let temp = TempDir::new().unwrap();
        let mut config = test_config(temp.path(), 1, 1);
        config.buffer.flush_threshold = 5;

        let pages = ScriptedPages::new([(1, page_json(&["A", "B", "C", "D", "E"]))]);
        let factory = ScriptedFactory::new(pages);
        let sink = Arc::new(FailingSink::new());
        let ingestor = ingestor(config, sink.clone(), &factory);
        let mut events = ingestor.subscribe();

        let report = ingestor.run_sequential(CancellationToken::new()).await;

        assert_eq!(report.stats.flush_attempts, 1);
        assert_eq!(sink.insert_calls(), 1, "final flush of an empty buffer is a no-op");
        assert_eq!(report.stats.records_saved, 0);
        assert_eq!(report.stats.errors, 1);
        assert_eq!(report.stats.backups_written, 1);

        let backups: Vec<_> = std::fs::read_dir(temp.path().join("backup"))
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(backups.len(), 1);
        let content: Vec<serde_json::Value> =
            serde_json::from_slice(&std::fs::read(&backups[0]).unwrap()).unwrap();
        let references: Vec<&str> = content
            .iter()
            .map(|v| v["item"]["reference"].as_str().unwrap())
            .collect();
        assert_eq!(references, vec!["A", "B", "C", "D", "E"]);

        let mut saw_backup = false;
        while let Ok(event) = events.try_recv() {
            if let Event::BackupWritten { reason, records, .. } = event {
                assert_eq!(reason, BackupReason::DbFailure);
                assert_eq!(records, 5);
                saw_backup = true;
            }
        }
        assert!(saw_backup);
    }

    #[tokio::test]
    async fn incremental_skips_seeded_references_and_saves_state() {
        let temp = TempDir::new().unwrap();
        let mut config = test_config(temp.path(), 1, 1);
        config.incremental.incremental = true;

        let pages = ScriptedPages::new([(1, page_json(&["X1", "X2"]))]);
        let factory = ScriptedFactory::new(pages);
        let sink = Arc::new(MemorySink::with_references(["X1"]));
        let ingestor = ingestor(config.clone(), sink.clone(), &factory);

        let report = ingestor.run_sequential(CancellationToken::new()).await;

        assert_eq!(report.stats.records_validated, 1);
        assert_eq!(report.stats.existing_records_skipped, 1);
        assert_eq!(report.stats.new_records, 1);
        assert_eq!(report.stats.records_saved, 1);
        assert_eq!(report.known_references, 2);
        assert!(report.previous_state.is_none());
        assert!(report.state_saved);
        assert_eq!(sink.references(), vec!["X1", "X2"]);

        let state = StateStore::new(&config.incremental.state_file)
            .load()
            .await
            .unwrap();
        assert_eq!(state.new_records, 1);
        assert_eq!(state.total_known, 2);

        // Second run sees the first run's state and finds nothing new
        let report = ingestor.run_sequential(CancellationToken::new()).await;
        assert_eq!(report.previous_state.unwrap().new_records, 1);
        assert_eq!(report.stats.new_records, 0);
        assert_eq!(report.stats.existing_records_skipped, 2);
        assert_eq!(report.stats.flush_attempts, 0);
    }

    #[tokio::test]
    async fn same_record_twice_in_one_session_is_admitted_once() {
        let temp = TempDir::new().unwrap();
        let mut config = test_config(temp.path(), 1, 2);
        config.incremental.incremental = true;

        let pages = ScriptedPages::new([(1, page_json(&["R1"])), (2, page_json(&["R1"]))]);
        let factory = ScriptedFactory::new(pages);
        let sink = Arc::new(MemorySink::new());
        let ingestor = ingestor(config, sink.clone(), &factory);

        let report = ingestor.run_sequential(CancellationToken::new()).await;

        assert_eq!(report.stats.records_validated, 1);
        assert_eq!(report.stats.existing_records_skipped, 1);
        assert_eq!(report.stats.records_saved, 1);
    }

    #[tokio::test]
    async fn failed_page_is_skipped_and_counted() {
        let temp = TempDir::new().unwrap();
        let config = test_config(temp.path(), 1, 3);

        // Page 2 is missing, so its fetch fails
        let pages = ScriptedPages::new([(1, page_json(&["A"])), (3, page_json(&["C"]))]);
        let factory = ScriptedFactory::new(pages.clone());
        let sink = Arc::new(MemorySink::new());
        let ingestor = ingestor(config, sink.clone(), &factory);

        let report = ingestor.run_sequential(CancellationToken::new()).await;

        assert_eq!(report.phase, SessionPhase::Completed);
        assert_eq!(report.stats.pages_processed, 2);
        assert_eq!(report.stats.pages_failed, 1);
        assert_eq!(report.stats.fetch_errors, 1);
        assert_eq!(report.stats.errors, 1);
        assert_eq!(sink.references(), vec!["A", "C"]);

        let fetched: Vec<PageId> = pages.fetched().into_iter().map(|(_, p)| p).collect();
        assert_eq!(fetched, vec![PageId(1), PageId(2), PageId(3)]);
    }

    #[tokio::test]
    async fn context_failure_aborts_with_final_flush_and_state() {
        let temp = TempDir::new().unwrap();
        let mut config = test_config(temp.path(), 1, 3);
        config.incremental.incremental = true;

        let factory = ScriptedFactory::new(ScriptedPages::default()).failing_for([0]);
        let sink = Arc::new(MemorySink::new());
        let ingestor = ingestor(config, sink.clone(), &factory);

        let report = ingestor.run_sequential(CancellationToken::new()).await;

        assert_eq!(report.phase, SessionPhase::Aborted);
        assert_eq!(report.stats.workers_failed, 1);
        assert_eq!(report.stats.pages_processed, 0);
        assert!(report.state_saved);
        assert_eq!(sink.insert_calls(), 0);
    }

    #[tokio::test]
    async fn cancelled_session_flushes_what_it_has() {
        let temp = TempDir::new().unwrap();
        let config = test_config(temp.path(), 1, 3);

        let pages = ScriptedPages::new([
            (1, page_json(&["A"])),
            (2, page_json(&["B"])),
            (3, page_json(&["C"])),
        ]);
        let factory = ScriptedFactory::new(pages).with_delay(Duration::from_millis(50));
        let sink = Arc::new(MemorySink::new());
        let ingestor = ingestor(config, sink.clone(), &factory);
        let mut events = ingestor.subscribe();

        let cancel = CancellationToken::new();
        let run = {
            let ingestor = ingestor.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { ingestor.run_sequential(cancel).await })
        };

        // Cancel as soon as the first page lands
        loop {
            if let Event::PageProcessed { .. } = events.recv().await.unwrap() {
                cancel.cancel();
                break;
            }
        }

        let report = run.await.unwrap();
        assert_eq!(report.phase, SessionPhase::Aborted);
        assert!(report.stats.pages_processed >= 1);
        assert!(report.stats.pages_processed < 3);
        assert_eq!(
            report.stats.records_saved,
            report.stats.pages_processed,
            "everything buffered before cancellation is flushed"
        );
        assert_eq!(factory.closed(), 1);
    }
}
