//! HTTP fetch context

use crate::config::FetchConfig;
use crate::types::PageId;
use crate::{Error, Result};
use async_trait::async_trait;

use super::{FetcherFactory, PageFetcher};

/// Fetches listing pages over HTTP
///
/// Each instance owns its own client and connection pool.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    config: FetchConfig,
    worker_id: usize,
}

impl HttpFetcher {
    /// Build a fetcher with the configured timeout and user agent
    pub fn new(config: FetchConfig, worker_id: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::ResourceAcquisition {
                worker_id,
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            config,
            worker_id,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, page: PageId) -> Result<String> {
        let url = self.config.page_url(page.get());
        tracing::debug!(worker_id = self.worker_id, page = page.get(), url = %url, "Fetching page");

        let response = self.client.get(&url).send().await.map_err(|e| {
            let message = if e.is_timeout() {
                format!(
                    "Timeout fetching '{}' (exceeded {} seconds)",
                    url,
                    self.config.request_timeout.as_secs()
                )
            } else if e.is_connect() {
                format!("Connection failed for '{}': {}", url, e)
            } else {
                format!("Failed to fetch '{}': {}", url, e)
            };
            Error::Fetch {
                page: page.get(),
                message,
            }
        })?;

        if !response.status().is_success() {
            return Err(Error::Fetch {
                page: page.get(),
                message: format!("HTTP error: {} {}", response.status(), url),
            });
        }

        response.text().await.map_err(|e| Error::Fetch {
            page: page.get(),
            message: format!("Failed to read response body from '{}': {}", url, e),
        })
    }

    async fn close(self: Box<Self>) {
        tracing::debug!(worker_id = self.worker_id, "Closing HTTP fetch context");
    }
}

/// Creates one [`HttpFetcher`] per worker
#[derive(Clone, Debug)]
pub struct HttpFetcherFactory {
    config: FetchConfig,
}

impl HttpFetcherFactory {
    /// Factory for fetchers using `config`
    pub fn new(config: FetchConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl FetcherFactory for HttpFetcherFactory {
    async fn create(&self, worker_id: usize) -> Result<Box<dyn PageFetcher>> {
        let fetcher = HttpFetcher::new(self.config.clone(), worker_id)?;
        Ok(Box::new(fetcher))
    }
}
