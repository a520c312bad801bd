//! Provider client contracts + Guardian / NYT / NewsAPI implementations.

use std::sync::Arc;

use async_trait::async_trait;
use nagg_core::Provider;
use nagg_storage::{FetchError, HttpFetcher};
use thiserror::Error;
use tracing::debug;
use url::Url;
use uuid::Uuid;

pub mod mapper;
pub mod payload;

pub use mapper::{escape_html, map_guardian, map_newsapi, map_nyt, map_record};
pub use payload::{
    parse_payload, GuardianFields, GuardianResult, NewsApiArticle, NytMultimedia, NytStory, RawRecord,
};

pub const CRATE_NAME: &str = "nagg-adapters";

pub const GUARDIAN_BASE_URL: &str = "https://content.guardianapis.com";
pub const NYT_BASE_URL: &str = "https://api.nytimes.com";
pub const NEWS_API_BASE_URL: &str = "https://newsapi.org";

/// Guardian results requested per category.
pub const GUARDIAN_PAGE_SIZE: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchContext {
    pub run_id: Uuid,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{provider}: no API key configured")]
    MissingApiKey { provider: Provider },
    #[error("{provider}/{category}: invalid request url: {message}")]
    InvalidUrl {
        provider: Provider,
        category: String,
        message: String,
    },
    #[error("{provider}/{category}: {source}")]
    Fetch {
        provider: Provider,
        category: String,
        #[source]
        source: FetchError,
    },
    #[error("{provider}/{category}: undecodable response: {source}")]
    Decode {
        provider: Provider,
        category: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{provider}/{category}: provider reported an error: {message}")]
    ProviderStatus {
        provider: Provider,
        category: String,
        message: String,
    },
}

impl AdapterError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, AdapterError::Fetch { source, .. } if source.is_timeout())
    }
}

/// One external news API. `fetch` performs exactly one request per category.
#[async_trait]
pub trait NewsProvider: Send + Sync {
    fn provider(&self) -> Provider;

    async fn fetch(&self, ctx: &FetchContext, category: &str) -> Result<Vec<RawRecord>, AdapterError>;
}

/// Base URL and credential for one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoint {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl ProviderEndpoint {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    pub fn default_for(provider: Provider, api_key: Option<String>) -> Self {
        let base = match provider {
            Provider::Guardian => GUARDIAN_BASE_URL,
            Provider::Nyt => NYT_BASE_URL,
            Provider::NewsApi => NEWS_API_BASE_URL,
        };
        Self::new(base, api_key)
    }
}

/// HTTP-backed client shared by all three providers; the per-provider differences
/// are the request URL and the response shape.
pub struct HttpNewsProvider {
    provider: Provider,
    http: Arc<HttpFetcher>,
    endpoint: ProviderEndpoint,
}

impl HttpNewsProvider {
    pub fn new(provider: Provider, http: Arc<HttpFetcher>, endpoint: ProviderEndpoint) -> Self {
        Self {
            provider,
            http,
            endpoint,
        }
    }

    pub fn request_url(&self, category: &str) -> Result<Url, AdapterError> {
        let api_key = self
            .endpoint
            .api_key
            .as_deref()
            .ok_or(AdapterError::MissingApiKey {
                provider: self.provider,
            })?;
        build_request_url(self.provider, &self.endpoint.base_url, api_key, category)
    }
}

#[async_trait]
impl NewsProvider for HttpNewsProvider {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn fetch(&self, ctx: &FetchContext, category: &str) -> Result<Vec<RawRecord>, AdapterError> {
        let url = self.request_url(category)?;
        let response = self
            .http
            .get(ctx.run_id, self.provider.as_str(), category, &url)
            .await
            .map_err(|source| AdapterError::Fetch {
                provider: self.provider,
                category: category.to_string(),
                source,
            })?;
        let records = parse_payload(self.provider, category, &response.body)?;
        debug!(provider = %self.provider, category, records = records.len(), "decoded provider payload");
        Ok(records)
    }
}

pub fn build_request_url(
    provider: Provider,
    base_url: &str,
    api_key: &str,
    category: &str,
) -> Result<Url, AdapterError> {
    let base = base_url.trim_end_matches('/');
    let page_size = GUARDIAN_PAGE_SIZE.to_string();
    let parsed = match provider {
        Provider::Guardian => Url::parse_with_params(
            &format!("{base}/search"),
            [
                ("api-key", api_key),
                ("q", category),
                ("section", category),
                ("page-size", page_size.as_str()),
                ("order-by", "newest"),
                ("show-fields", "headline,body,thumbnail,byline"),
            ],
        ),
        Provider::Nyt => Url::parse(&format!("{base}/svc/topstories/v2/")).and_then(|root| {
            let mut url = root.join(&format!("{category}.json"))?;
            url.query_pairs_mut().append_pair("api-key", api_key);
            Ok(url)
        }),
        Provider::NewsApi => Url::parse_with_params(
            &format!("{base}/v2/top-headlines"),
            [("apiKey", api_key), ("country", "us"), ("category", category)],
        ),
    };
    parsed.map_err(|err| AdapterError::InvalidUrl {
        provider,
        category: category.to_string(),
        message: err.to_string(),
    })
}

pub fn adapter_for_provider(
    provider: Provider,
    http: Arc<HttpFetcher>,
    endpoint: ProviderEndpoint,
) -> Box<dyn NewsProvider> {
    Box::new(HttpNewsProvider::new(provider, http, endpoint))
}
