//! Timeout-bounded HTTP GETs for provider clients.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::{StatusCode, Url};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

/// Longest slice of an error response body kept for diagnostics.
const ERROR_BODY_SNIPPET_CHARS: usize = 300;

/// Exponential retry schedule. `max_retries = 0` means a single attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub delay_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(250),
            delay_cap: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (zero-based).
    pub fn delay_before(&self, retry: usize) -> Duration {
        let factor = u32::try_from(retry)
            .ok()
            .and_then(|shift| 1u32.checked_shl(shift))
            .unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor).min(self.delay_cap)
    }

    /// Longest a fetch can take when every attempt runs into `attempt_timeout`.
    pub fn worst_case(&self, attempt_timeout: Duration) -> Duration {
        let attempts = u32::try_from(self.max_retries.saturating_add(1)).unwrap_or(u32::MAX);
        (0..self.max_retries)
            .map(|retry| self.delay_before(retry))
            .fold(attempt_timeout.saturating_mul(attempts), Duration::saturating_add)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    /// Requests allowed in flight across every provider run.
    pub max_in_flight: usize,
    pub retry: RetryPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            max_in_flight: 8,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub status: StatusCode,
    /// Final URL with the query string (and so the API key) removed.
    pub url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{url} answered {status}: {body_snippet}")]
    Status {
        status: u16,
        url: String,
        body_snippet: String,
    },
    #[error("http client is shutting down")]
    Closed,
}

impl FetchError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Request(err) if err.is_timeout())
    }

    /// Connection trouble, 5xx and 429 are worth another attempt; anything else is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Request(err) => err.is_timeout() || err.is_connect(),
            FetchError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            FetchError::Closed => false,
        }
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    in_flight: Arc<Semaphore>,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(agent) = config.user_agent.as_deref() {
            builder = builder.user_agent(agent);
        }

        Ok(Self {
            client: builder.build().context("building provider http client")?,
            in_flight: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            retry: config.retry,
        })
    }

    /// GET `url` for one provider category and return the body of a 2xx response.
    /// Query strings never reach the logs since providers carry API keys there.
    pub async fn get(
        &self,
        run_id: Uuid,
        provider: &str,
        category: &str,
        url: &Url,
    ) -> Result<ProviderResponse, FetchError> {
        let span = info_span!("http_fetch", %run_id, provider, category, path = url.path());
        self.get_with_retries(url).instrument(span).await
    }

    async fn get_with_retries(&self, url: &Url) -> Result<ProviderResponse, FetchError> {
        let _permit = self.in_flight.acquire().await.map_err(|_| FetchError::Closed)?;

        let mut retry = 0usize;
        loop {
            match self.get_once(url).await {
                Ok(resp) => return Ok(resp),
                Err(err) if err.is_retryable() && retry < self.retry.max_retries => {
                    let delay = self.retry.delay_before(retry);
                    debug!(retry, ?delay, error = %err, "retrying provider request");
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn get_once(&self, url: &Url) -> Result<ProviderResponse, FetchError> {
        let resp = self.client.get(url.clone()).send().await?;
        let status = resp.status();
        let url = without_query(resp.url());
        let body = resp.bytes().await?.to_vec();

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url,
                body_snippet: String::from_utf8_lossy(&body)
                    .chars()
                    .take(ERROR_BODY_SNIPPET_CHARS)
                    .collect(),
            });
        }
        Ok(ProviderResponse { status, url, body })
    }
}

fn without_query(url: &Url) -> String {
    let mut clean = url.clone();
    clean.set_query(None);
    clean.to_string()
}
