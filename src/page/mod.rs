//! Page processing
//!
//! Turns one page number into the records ready for the buffer. Fetching and
//! parsing are collaborators behind traits so the pipeline never depends on
//! how pages are retrieved or what markup they use.
//!
//! ## Submodules
//!
//! - [`fetcher`] - HTTP fetch context and its per-worker factory
//! - [`parser`] - Extraction of listings embedded in page markup

use crate::Result;
use crate::ledger::ReferenceLedger;
use crate::types::{PageId, Record};
use crate::validator;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub mod fetcher;
pub mod parser;

pub use fetcher::{HttpFetcher, HttpFetcherFactory};
pub use parser::PreloadedStateParser;

/// Retrieves the raw content of a page
///
/// A fetcher is a private context: one per worker, never shared.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch the raw content of `page`
    async fn fetch(&self, page: PageId) -> Result<String>;

    /// Release the context
    async fn close(self: Box<Self>) {}
}

/// Creates worker-private fetch contexts
#[async_trait]
pub trait FetcherFactory: Send + Sync {
    /// Create the context for `worker_id`
    async fn create(&self, worker_id: usize) -> Result<Box<dyn PageFetcher>>;
}

/// Extracts listing candidates and their links from raw page content
pub trait PageParser: Send + Sync {
    /// Parse `content`; content without the expected structure yields an
    /// empty page, never an error
    fn parse(&self, content: &str) -> ParsedPage;
}

/// What a parser found on a page
#[derive(Clone, Debug, Default)]
pub struct ParsedPage {
    /// Candidate listings in page order
    pub candidates: Vec<Value>,
    /// Canonical URL per listing reference
    pub links: HashMap<String, String>,
}

/// Records produced by one page, with per-page skip counts
#[derive(Clone, Debug)]
pub struct PageYield {
    /// Page processed
    pub page: PageId,
    /// Records ready for the buffer, in page order
    pub records: Vec<Record>,
    /// Candidates seen on the page
    pub found: usize,
    /// Candidates already in the ledger
    pub skipped_existing: usize,
    /// Candidates without a listing URL
    pub skipped_unlinked: usize,
    /// Candidates without a reference or failing validation
    pub skipped_invalid: usize,
}

impl PageYield {
    fn empty(page: PageId) -> Self {
        Self {
            page,
            records: Vec::new(),
            found: 0,
            skipped_existing: 0,
            skipped_unlinked: 0,
            skipped_invalid: 0,
        }
    }
}

/// Fetches, parses, filters and validates one page
#[derive(Clone)]
pub struct PageProcessor {
    parser: Arc<dyn PageParser>,
    incremental: bool,
}

impl PageProcessor {
    /// Processor using `parser`; with `incremental` set, references in the
    /// ledger are skipped before validation
    pub fn new(parser: Arc<dyn PageParser>, incremental: bool) -> Self {
        Self {
            parser,
            incremental,
        }
    }

    /// Process `page` with the caller's fetch context
    ///
    /// The ledger is only read. Fetch errors propagate; nothing is retried.
    pub async fn process(
        &self,
        page: PageId,
        fetcher: &dyn PageFetcher,
        ledger: Option<&ReferenceLedger>,
    ) -> Result<PageYield> {
        let content = fetcher.fetch(page).await?;
        Ok(self.extract(page, &content, ledger))
    }

    /// Filter the candidates in already-fetched content
    pub fn extract(&self, page: PageId, content: &str, ledger: Option<&ReferenceLedger>) -> PageYield {
        let parsed = self.parser.parse(content);
        let mut result = PageYield::empty(page);
        result.found = parsed.candidates.len();

        if parsed.candidates.is_empty() {
            tracing::debug!(page = page.get(), "No listings on page");
            return result;
        }

        for candidate in parsed.candidates {
            let Some(record) = Record::from_candidate(candidate) else {
                result.skipped_invalid += 1;
                continue;
            };

            if self.incremental
                && let Some(ledger) = ledger
                && ledger.contains(record.reference())
            {
                result.skipped_existing += 1;
                continue;
            }

            let Some(url) = parsed.links.get(record.reference()) else {
                tracing::debug!(
                    page = page.get(),
                    reference = record.reference(),
                    "No listing link for reference"
                );
                result.skipped_unlinked += 1;
                continue;
            };

            let record = record.with_url(url);
            if validator::validate_record(&record) {
                result.records.push(record);
            } else {
                result.skipped_invalid += 1;
            }
        }

        tracing::debug!(
            page = page.get(),
            found = result.found,
            kept = result.records.len(),
            skipped_existing = result.skipped_existing,
            skipped_unlinked = result.skipped_unlinked,
            skipped_invalid = result.skipped_invalid,
            "Processed page"
        );

        result
    }
}
