//! Article persistence (keyed upsert, query surface, cache invalidation) + HTTP fetch utilities for NAGG.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use nagg_core::{Article, ArticleDraft, ArticleQuery, Page, SearchQuery};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

pub mod cache;
pub mod http;
pub mod memory;
pub mod postgres;

pub use cache::{invalidate_article, ArticleCache, CacheKey, MemoryArticleCache, NoopArticleCache};
pub use http::{FetchError, HttpClientConfig, HttpFetcher, ProviderResponse, RetryPolicy};
pub use memory::MemoryArticleStore;
pub use postgres::PgArticleStore;

pub const CRATE_NAME: &str = "nagg-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("article `{title}` disappeared during upsert")]
    Vanished { title: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result of a keyed upsert. At most one of `created` / `changed` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub article: Article,
    pub created: bool,
    pub changed: bool,
}

impl UpsertOutcome {
    pub fn needs_notification(&self) -> bool {
        self.created || self.changed
    }
}

/// Durable article store keyed by exact title.
///
/// `upsert` must be atomic per title: concurrent upserts of one title never produce two rows
/// and never surface a uniqueness violation. Implementations invalidate the injected cache after
/// every successful create, update or delete.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    async fn find_by_title(&self, title: &str) -> Result<Option<Article>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Article>, StoreError>;

    async fn upsert(&self, draft: &ArticleDraft) -> Result<UpsertOutcome, StoreError>;

    async fn list_titles(&self) -> Result<HashSet<String>, StoreError>;

    /// Title -> fingerprint of every stored article, used to seed the per-run dedup snapshot.
    async fn title_fingerprints(&self) -> Result<HashMap<String, String>, StoreError>;

    fn invalidate_cache(&self, id: Uuid);

    /// Filtered listing, newest first.
    async fn list(&self, query: &ArticleQuery) -> Result<Page<Article>, StoreError>;

    async fn search(&self, query: &SearchQuery) -> Result<Page<Article>, StoreError>;

    async fn distinct_categories(&self) -> Result<Vec<String>, StoreError>;

    async fn distinct_authors(&self) -> Result<Vec<String>, StoreError>;

    /// Unique display domains derived from article sources.
    async fn list_sources(&self) -> Result<Vec<String>, StoreError>;

    async fn delete_all(&self) -> Result<u64, StoreError>;
}

/// Stable SHA-256 over every mapped field of a draft.
pub fn fingerprint(draft: &ArticleDraft) -> String {
    const SEP: &[u8] = b"\x1f";
    let mut hasher = Sha256::new();
    for part in [
        draft.title.as_str(),
        draft.content.as_str(),
        draft.author.as_str(),
        draft.source.as_str(),
        draft.category.as_str(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update(SEP);
    }
    match &draft.image {
        Some(image) => {
            hasher.update(b"1");
            hasher.update(image.as_bytes());
        }
        None => hasher.update(b"0"),
    }
    hasher.update(SEP);
    match draft.published_at {
        Some(ts) => {
            hasher.update(b"1");
            hasher.update(ts.timestamp_micros().to_be_bytes());
        }
        None => hasher.update(b"0"),
    }
    hex::encode(hasher.finalize())
}
