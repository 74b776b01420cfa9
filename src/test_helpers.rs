//! Shared test doubles for sinks, fetchers and parsers.

use crate::config::{Config, RetryConfig};
use crate::error::DatabaseError;
use crate::page::{FetcherFactory, PageFetcher, PageParser, ParsedPage};
use crate::sink::{InsertReport, Sink};
use crate::types::{PageId, Record};
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Config for a session over `start..=end` with every file under `dir`
pub(crate) fn test_config(dir: &Path, start: u32, end: u32) -> Config {
    let mut config = Config::default();
    config.session.start_page = start;
    config.session.end_page = end;
    config.session.queue_poll_timeout = Duration::from_millis(20);
    config.session.progress_interval = Duration::from_millis(50);
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

/// Canonical listing URL used by the helpers
pub(crate) fn listing_url(reference: &str) -> String {
    format!("https://www.lacentrale.fr/auto-occasion-annonce-{reference}.html")
}

/// Candidate as found in page state (no URL yet)
pub(crate) fn listing_candidate(reference: &str) -> Value {
    json!({
        "item": {
            "reference": reference,
            "price": 12500,
            "customerReference": "C1",
            "vehicle": {
                "make": "RENAULT",
                "model": "CLIO",
                "year": 2018,
                "mileage": 61000,
                "energy": "ESSENCE"
            }
        }
    })
}

/// Valid record with its URL attached
pub(crate) fn listing_record(reference: &str) -> Record {
    Record::from_candidate(listing_candidate(reference))
        .unwrap()
        .with_url(&listing_url(reference))
}

/// Page content understood by [`JsonPageParser`], one linked candidate per reference
pub(crate) fn page_json(references: &[&str]) -> String {
    let candidates: Vec<Value> = references.iter().map(|r| listing_candidate(r)).collect();
    let links: HashMap<String, String> = references
        .iter()
        .map(|r| (r.to_string(), listing_url(r)))
        .collect();
    json!({"candidates": candidates, "links": links}).to_string()
}

/// Parser for `{"candidates": [...], "links": {...}}` content
pub(crate) struct JsonPageParser;

impl PageParser for JsonPageParser {
    fn parse(&self, content: &str) -> ParsedPage {
        let Ok(mut value) = serde_json::from_str::<Value>(content) else {
            return ParsedPage::default();
        };
        let candidates = match value.get_mut("candidates").map(Value::take) {
            Some(Value::Array(candidates)) => candidates,
            _ => Vec::new(),
        };
        let links = value
            .get("links")
            .and_then(|links| serde_json::from_value(links.clone()).ok())
            .unwrap_or_default();
        ParsedPage { candidates, links }
    }
}

/// Sink that stores references in memory
///
/// References already stored are reported back as rejected.
#[derive(Default)]
pub(crate) struct MemorySink {
    stored: Mutex<Vec<String>>,
    insert_calls: AtomicUsize,
}

impl MemorySink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_references<I, S>(references: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            stored: Mutex::new(references.into_iter().map(Into::into).collect()),
            insert_calls: AtomicUsize::new(0),
        }
    }

    /// Stored references in insertion order
    pub(crate) fn references(&self) -> Vec<String> {
        self.stored.lock().unwrap().clone()
    }

    pub(crate) fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn insert_many(&self, records: &[Record]) -> Result<InsertReport> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        let mut stored = self.stored.lock().unwrap();
        let mut rejected = Vec::new();
        for record in records {
            if stored.iter().any(|r| r == record.reference()) {
                rejected.push(record.reference().to_string());
            } else {
                stored.push(record.reference().to_string());
            }
        }
        Ok(InsertReport {
            accepted: records.len() - rejected.len(),
            rejected: Some(rejected),
        })
    }

    async fn list_all_references(&self) -> Result<HashSet<String>> {
        Ok(self.stored.lock().unwrap().iter().cloned().collect())
    }
}

/// Sink whose every call fails
#[derive(Default)]
pub(crate) struct FailingSink {
    insert_calls: AtomicUsize,
}

impl FailingSink {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for FailingSink {
    async fn insert_many(&self, _records: &[Record]) -> Result<InsertReport> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::Database(DatabaseError::QueryFailed(
            "database is locked".to_string(),
        )))
    }

    async fn list_all_references(&self) -> Result<HashSet<String>> {
        Err(Error::Database(DatabaseError::ConnectionFailed(
            "connection refused".to_string(),
        )))
    }
}

/// Sink that accepts only the first `limit` records of each batch and
/// reports a count only
pub(crate) struct PartialSink {
    limit: usize,
}

impl PartialSink {
    pub(crate) fn new(limit: usize) -> Self {
        Self { limit }
    }
}

#[async_trait]
impl Sink for PartialSink {
    async fn insert_many(&self, records: &[Record]) -> Result<InsertReport> {
        Ok(InsertReport::count_only(records.len().min(self.limit)))
    }

    async fn list_all_references(&self) -> Result<HashSet<String>> {
        Ok(HashSet::new())
    }
}

/// Pages shared by every fetcher a [`ScriptedFactory`] creates
#[derive(Clone, Default)]
pub(crate) struct ScriptedPages {
    content: Arc<HashMap<u32, String>>,
    fetched: Arc<Mutex<Vec<(usize, PageId)>>>,
}

impl ScriptedPages {
    pub(crate) fn new<I>(pages: I) -> Self
    where
        I: IntoIterator<Item = (u32, String)>,
    {
        Self {
            content: Arc::new(pages.into_iter().collect()),
            fetched: Arc::default(),
        }
    }

    /// Every (worker, page) fetch in order
    pub(crate) fn fetched(&self) -> Vec<(usize, PageId)> {
        self.fetched.lock().unwrap().clone()
    }

    fn fetch(&self, worker_id: usize, page: PageId) -> Result<String> {
        self.fetched.lock().unwrap().push((worker_id, page));
        self.content
            .get(&page.get())
            .cloned()
            .ok_or_else(|| Error::Fetch {
                page: page.get(),
                message: "HTTP error: 503 Service Unavailable".to_string(),
            })
    }
}

/// Fetcher serving scripted pages; unknown pages fail to fetch
pub(crate) struct ScriptedFetcher {
    pages: ScriptedPages,
    worker_id: usize,
    delay: Duration,
    closed: Arc<AtomicUsize>,
}

impl ScriptedFetcher {
    pub(crate) fn new<I>(pages: I) -> Self
    where
        I: IntoIterator<Item = (u32, String)>,
    {
        Self {
            pages: ScriptedPages::new(pages),
            worker_id: 0,
            delay: Duration::ZERO,
            closed: Arc::default(),
        }
    }
}

#[async_trait]
impl PageFetcher for ScriptedFetcher {
    async fn fetch(&self, page: PageId) -> Result<String> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.pages.fetch(self.worker_id, page)
    }

    async fn close(self: Box<Self>) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory handing out [`ScriptedFetcher`]s
#[derive(Clone, Default)]
pub(crate) struct ScriptedFactory {
    pub(crate) pages: ScriptedPages,
    failing_workers: HashSet<usize>,
    delay: Duration,
    created: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    pub(crate) fn new(pages: ScriptedPages) -> Self {
        Self {
            pages,
            ..Self::default()
        }
    }

    /// Worker ids whose context can never be created
    pub(crate) fn failing_for<I: IntoIterator<Item = usize>>(mut self, workers: I) -> Self {
        self.failing_workers = workers.into_iter().collect();
        self
    }

    /// Delay every fetch
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub(crate) fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FetcherFactory for ScriptedFactory {
    async fn create(&self, worker_id: usize) -> Result<Box<dyn PageFetcher>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.failing_workers.contains(&worker_id) {
            return Err(Error::ResourceAcquisition {
                worker_id,
                message: "no browser available".to_string(),
            });
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedFetcher {
            pages: self.pages.clone(),
            worker_id,
            delay: self.delay,
            closed: self.closed.clone(),
        }))
    }
}
