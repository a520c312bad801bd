//! Core domain model for NAGG: canonical articles, drafts, change events and query types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

pub const CRATE_NAME: &str = "nagg-core";

/// Upper bound, in serialized bytes, of a single change event.
pub const CHANGE_EVENT_MAX_BYTES: usize = 10 * 1024;

pub const UNKNOWN_AUTHOR: &str = "Unknown";
pub const UNKNOWN_SOURCE: &str = "Unknown Source";
pub const UNCATEGORIZED: &str = "Uncategorized";

/// Broadcast channel and event name used for article change notifications.
pub const ARTICLES_CHANNEL: &str = "articles";
pub const ARTICLE_UPDATED_EVENT: &str = "ArticleUpdated";

pub const DEFAULT_PER_PAGE: usize = 20;
pub const MAX_PER_PAGE: usize = 100;

/// External news API an article was ingested from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Guardian,
    Nyt,
    NewsApi,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Guardian, Provider::Nyt, Provider::NewsApi];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Guardian => "guardian",
            Provider::Nyt => "nyt",
            Provider::NewsApi => "newsapi",
        }
    }

    /// Categories (Guardian, NewsAPI) or sections (NYT) polled when no override is configured.
    pub fn default_categories(&self) -> &'static [&'static str] {
        match self {
            Provider::Guardian | Provider::NewsApi => &[
                "business",
                "entertainment",
                "general",
                "health",
                "science",
                "sports",
                "technology",
            ],
            Provider::Nyt => &[
                "home",
                "world",
                "politics",
                "technology",
                "health",
                "science",
                "sports",
            ],
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown provider `{0}`")]
pub struct UnknownProvider(pub String);

impl FromStr for Provider {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "guardian" | "the-guardian" => Ok(Provider::Guardian),
            "nyt" | "new-york-times" | "nytimes" => Ok(Provider::Nyt),
            "newsapi" | "news-api" => Ok(Provider::NewsApi),
            other => Err(UnknownProvider(other.to_string())),
        }
    }
}

/// Normalized article produced by a provider mapper, before persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleDraft {
    pub title: String,
    pub content: String,
    pub author: String,
    pub source: String,
    pub category: String,
    pub image: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Canonical persisted article. `title` is the identity key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub author: String,
    pub source: String,
    pub category: String,
    pub image: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Article {
    pub fn from_draft(id: Uuid, draft: &ArticleDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: draft.title.clone(),
            content: draft.content.clone(),
            author: draft.author.clone(),
            source: draft.source.clone(),
            category: draft.category.clone(),
            image: draft.image.clone(),
            published_at: draft.published_at,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrites every mapped field from `draft`, leaving identity and `created_at` intact.
    pub fn apply_draft(&mut self, draft: &ArticleDraft, now: DateTime<Utc>) {
        self.content = draft.content.clone();
        self.author = draft.author.clone();
        self.source = draft.source.clone();
        self.category = draft.category.clone();
        self.image = draft.image.clone();
        self.published_at = draft.published_at;
        self.updated_at = now;
    }

    pub fn source_domain(&self) -> Option<String> {
        source_domain(&self.source)
    }
}

/// Narrowed projection of an article pushed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub published_time: Option<DateTime<Utc>>,
    pub image: Option<String>,
}

impl From<&Article> for ChangeEvent {
    fn from(article: &Article) -> Self {
        Self {
            id: article.id,
            title: article.title.clone(),
            content: article.content.clone(),
            published_time: article.published_at,
            image: article.image.clone(),
        }
    }
}

/// Display domain for a source URL: `https://www.theguardian.com/x` -> `theguardian`.
pub fn source_domain(source: &str) -> Option<String> {
    let url = Url::parse(source).ok()?;
    let host = url.host_str()?;
    let parts: Vec<&str> = host.split('.').filter(|p| !p.is_empty()).collect();
    let picked = if parts.len() > 2 {
        parts.get(parts.len() - 2)
    } else {
        parts.first()
    };
    picked.map(|p| p.to_ascii_lowercase())
}

pub fn category_or_default(category: &str) -> String {
    let trimmed = category.trim();
    if trimmed.is_empty() {
        UNCATEGORIZED.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Case-insensitive set filter over category, source and author. Empty sets match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleFilter {
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub authors: Vec<String>,
}

impl ArticleFilter {
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty() && self.sources.is_empty() && self.authors.is_empty()
    }

    pub fn matches(&self, article: &Article) -> bool {
        let category_ok = self.categories.is_empty()
            || self
                .categories
                .iter()
                .any(|c| c.eq_ignore_ascii_case(&article.category));
        let author_ok = self.authors.is_empty()
            || self.authors.iter().any(|a| a.eq_ignore_ascii_case(&article.author));
        let source_ok = self.sources.is_empty() || {
            let domain = article.source_domain();
            self.sources.iter().any(|s| {
                s.eq_ignore_ascii_case(&article.source)
                    || domain.as_deref().is_some_and(|d| s.eq_ignore_ascii_case(d))
            })
        };
        category_ok && author_ok && source_ok
    }

    /// Lower-cased copies of each set, as compared by storage backends.
    pub fn lowered(&self) -> (Vec<String>, Vec<String>, Vec<String>) {
        let lower = |v: &[String]| v.iter().map(|s| s.to_lowercase()).collect::<Vec<_>>();
        (lower(&self.categories), lower(&self.sources), lower(&self.authors))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleQuery {
    #[serde(default)]
    pub filter: ArticleFilter,
    pub page: usize,
    pub per_page: usize,
}

impl Default for ArticleQuery {
    fn default() -> Self {
        Self {
            filter: ArticleFilter::default(),
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl ArticleQuery {
    pub fn normalized(mut self) -> Self {
        self.page = self.page.max(1);
        self.per_page = self.per_page.clamp(1, MAX_PER_PAGE);
        self
    }

    pub fn offset(&self) -> usize {
        self.page.saturating_sub(1).saturating_mul(self.per_page)
    }

    pub fn is_default_listing(&self) -> bool {
        self.filter.is_empty() && self.page == 1 && self.per_page == DEFAULT_PER_PAGE
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub term: String,
    #[serde(default)]
    pub filter: ArticleFilter,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub page: usize,
    pub per_page: usize,
}

impl SearchQuery {
    pub fn as_listing(&self) -> ArticleQuery {
        ArticleQuery {
            filter: self.filter.clone(),
            page: self.page,
            per_page: self.per_page,
        }
        .normalized()
    }

    pub fn matches(&self, article: &Article) -> bool {
        let term = self.term.trim().to_lowercase();
        let term_ok = term.is_empty()
            || article.title.to_lowercase().contains(&term)
            || article.content.to_lowercase().contains(&term);
        let from_ok = self.created_from.map_or(true, |from| article.created_at >= from);
        let to_ok = self.created_to.map_or(true, |to| article.created_at <= to);
        term_ok && from_ok && to_ok && self.filter.matches(article)
    }
}

/// One page of results, shaped like the paginator the original clients consume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub current_page: usize,
    pub per_page: usize,
    pub total: usize,
    pub last_page: usize,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, current_page: usize, per_page: usize, total: usize) -> Self {
        let last_page = total.div_ceil(per_page.max(1)).max(1);
        Self {
            data,
            current_page,
            per_page,
            total,
            last_page,
        }
    }

    /// Slices an already-ordered result set.
    pub fn paginate(items: Vec<T>, query: &ArticleQuery) -> Self {
        let total = items.len();
        let data = items
            .into_iter()
            .skip(query.offset())
            .take(query.per_page)
            .collect();
        Self::new(data, query.page, query.per_page, total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn article(category: &str, source: &str, author: &str) -> Article {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().unwrap();
        Article {
            id: Uuid::new_v4(),
            title: "Markets rally".into(),
            content: "Stocks rose on Monday.".into(),
            author: author.into(),
            source: source.into(),
            category: category.into(),
            image: None,
            published_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn provider_names_round_trip_through_from_str() {
        for provider in Provider::ALL {
            assert_eq!(provider.as_str().parse::<Provider>().unwrap(), provider);
        }
        assert_eq!("NYTimes".parse::<Provider>().unwrap(), Provider::Nyt);
        let err = "reuters".parse::<Provider>().unwrap_err();
        assert_eq!(err, UnknownProvider("reuters".into()));
        assert_eq!(err.to_string(), "unknown provider `reuters`");
        let boxed: Box<dyn std::error::Error + Send + Sync> = Box::new(err);
        assert!(boxed.source().is_none());
    }

    #[test]
    fn default_category_lists_have_seven_entries() {
        for provider in Provider::ALL {
            assert_eq!(provider.default_categories().len(), 7);
        }
        assert!(Provider::Nyt.default_categories().contains(&"politics"));
    }

    #[test]
    fn source_domain_uses_second_to_last_label_for_subdomains() {
        assert_eq!(
            source_domain("https://www.theguardian.com/technology/2026/ai").as_deref(),
            Some("theguardian")
        );
        assert_eq!(source_domain("https://nytimes.com/a").as_deref(), Some("nytimes"));
        assert_eq!(source_domain("Unknown Source"), None);
    }

    #[test]
    fn blank_category_falls_back_to_uncategorized() {
        assert_eq!(category_or_default("  "), UNCATEGORIZED);
        assert_eq!(category_or_default(" world "), "world");
    }

    #[test]
    fn filter_is_case_insensitive_and_matches_source_domain() {
        let a = article("Technology", "https://www.theguardian.com/x", "Jane Doe");
        let filter = ArticleFilter {
            categories: vec!["technology".into()],
            sources: vec!["TheGuardian".into()],
            authors: vec!["jane doe".into()],
        };
        assert!(filter.matches(&a));

        let other = ArticleFilter {
            categories: vec!["sports".into()],
            ..Default::default()
        };
        assert!(!other.matches(&a));
        assert!(ArticleFilter::default().matches(&a));
    }

    #[test]
    fn change_event_serializes_with_camel_case_keys() {
        let a = article("world", "https://nytimes.com/a", "Unknown");
        let json = serde_json::to_value(ChangeEvent::from(&a)).unwrap();
        assert!(json.get("publishedTime").is_some());
        assert!(json.get("published_at").is_none());
        assert_eq!(json["title"], "Markets rally");
    }

    #[test]
    fn pagination_reports_last_page() {
        let query = ArticleQuery {
            page: 2,
            per_page: 2,
            ..Default::default()
        };
        let page = Page::paginate(vec![1, 2, 3, 4, 5], &query);
        assert_eq!(page.data, vec![3, 4]);
        assert_eq!(page.total, 5);
        assert_eq!(page.last_page, 3);

        let empty: Page<i32> = Page::paginate(vec![], &ArticleQuery::default());
        assert_eq!(empty.last_page, 1);
    }
}
