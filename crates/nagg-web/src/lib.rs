//! Axum JSON API and live article updates for NAGG.

use std::collections::HashSet;
use std::fmt::Display;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, KeepAliveStream},
        IntoResponse, Response, Sse,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use futures::{Stream, StreamExt};
use nagg_core::{Article, ArticleFilter, ArticleQuery, SearchQuery, ARTICLES_CHANNEL, DEFAULT_PER_PAGE, MAX_PER_PAGE};
use nagg_storage::{ArticleCache, ArticleStore, CacheKey, StoreError};
use nagg_sync::{ChangeNotifier, ChannelBroadcaster, IngestionService, SyncConfig, SyncError, SyncRuntime};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "nagg-web";

const SUGGESTION_LIMIT: usize = 5;
const SNIPPET_CHARS: usize = 100;
/// Titles that do not contain the term still qualify as suggestions above this score.
const FUZZY_MIN_SIMILARITY: f64 = 0.85;

type EventStream = Pin<Box<dyn Stream<Item = Result<Event, axum::Error>> + Send>>;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ArticleStore>,
    pub cache: Arc<dyn ArticleCache>,
    pub notifier: Arc<ChangeNotifier>,
    pub broadcaster: Arc<ChannelBroadcaster>,
    pub service: Arc<IngestionService>,
}

impl From<&SyncRuntime> for AppState {
    fn from(runtime: &SyncRuntime) -> Self {
        Self {
            store: Arc::clone(&runtime.store),
            cache: runtime.cache.clone(),
            notifier: Arc::clone(&runtime.notifier),
            broadcaster: Arc::clone(&runtime.broadcaster),
            service: Arc::clone(&runtime.service),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct ArticlesParams {
    categories: Option<String>,
    sources: Option<String>,
    authors: Option<String>,
    page: Option<usize>,
    per_page: Option<usize>,
}

impl ArticlesParams {
    fn into_query(self) -> ArticleQuery {
        ArticleQuery {
            filter: ArticleFilter {
                categories: split_list(self.categories.as_deref()),
                sources: split_list(self.sources.as_deref()),
                authors: split_list(self.authors.as_deref()),
            },
            page: self.page.unwrap_or(1),
            per_page: self.per_page.unwrap_or(DEFAULT_PER_PAGE),
        }
        .normalized()
    }
}

#[derive(Debug, Deserialize, Default)]
struct SearchParams {
    search: Option<String>,
    category: Option<String>,
    source: Option<String>,
    author: Option<String>,
    date_from: Option<String>,
    date_to: Option<String>,
    page: Option<usize>,
    per_page: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct SuggestParams {
    search: Option<String>,
    category: Option<String>,
    source: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct Suggestion {
    title: String,
    author: String,
    source: String,
    image: Option<String>,
    content_snippet: String,
}

impl From<&Article> for Suggestion {
    fn from(article: &Article) -> Self {
        Self {
            title: article.title.clone(),
            author: article.author.clone(),
            source: article.source.clone(),
            image: article.image.clone(),
            content_snippet: content_snippet(&article.content),
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/articles", get(articles_handler).delete(delete_articles_handler))
        .route("/api/articles/{id}", get(article_handler))
        .route("/api/search", get(search_handler))
        .route("/api/suggest", get(suggest_handler))
        .route("/api/filter/categories", get(categories_handler))
        .route("/api/filter/sources", get(sources_handler))
        .route("/api/filter/authors", get(authors_handler))
        .route("/api/events", get(events_handler))
        .route("/api/ingest/{provider}", post(ingest_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let runtime = SyncRuntime::from_config(SyncConfig::from_env()).await?;
    serve(runtime).await
}

/// Starts the scheduler when enabled, then serves until the listener fails.
pub async fn serve(runtime: SyncRuntime) -> anyhow::Result<()> {
    let scheduler =
        nagg_sync::maybe_build_scheduler(&runtime.config, Arc::clone(&runtime.service)).await?;
    if let Some(sched) = &scheduler {
        sched.start().await.context("starting scheduler")?;
        info!(cron = %runtime.config.sync_cron, "ingestion scheduler started");
    }

    let port = runtime.config.web_port;
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    info!(port, "serving article API");
    axum::serve(listener, app(AppState::from(&runtime))).await?;
    Ok(())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn articles_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ArticlesParams>,
) -> Response {
    let query = params.into_query();
    let slot = query
        .is_default_listing()
        .then(|| CacheSlot::take(state.cache.as_ref(), CacheKey::AllArticles));
    if let Some(cached) = slot.as_ref().and_then(|slot| state.cache.get(&slot.key)) {
        return Json(cached).into_response();
    }
    match state.store.list(&query).await {
        Ok(page) => cached_json(state.cache.as_ref(), slot, &page),
        Err(err) => server_error(err),
    }
}

async fn article_handler(State(state): State<Arc<AppState>>, AxumPath(id): AxumPath<Uuid>) -> Response {
    let slot = CacheSlot::take(state.cache.as_ref(), CacheKey::Article(id));
    if let Some(cached) = state.cache.get(&slot.key) {
        return Json(cached).into_response();
    }
    match state.store.find_by_id(id).await {
        Ok(Some(article)) => cached_json(state.cache.as_ref(), Some(slot), &article),
        Ok(None) => json_error(StatusCode::NOT_FOUND, format!("article {id} not found")),
        Err(err) => server_error(err),
    }
}

async fn delete_articles_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.store.delete_all().await {
        Ok(deleted) => {
            info!(deleted, "deleted all articles");
            let outcome = state.notifier.publish_reset().await;
            info!(?outcome, "reset event sent");
            Json(json!({ "deleted": deleted })).into_response()
        }
        Err(err) => server_error(err),
    }
}

async fn search_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> Response {
    let created_from = match parse_date_bound(params.date_from.as_deref(), false) {
        Ok(bound) => bound,
        Err(message) => return json_error(StatusCode::UNPROCESSABLE_ENTITY, message),
    };
    let created_to = match parse_date_bound(params.date_to.as_deref(), true) {
        Ok(bound) => bound,
        Err(message) => return json_error(StatusCode::UNPROCESSABLE_ENTITY, message),
    };

    let query = SearchQuery {
        term: params.search.unwrap_or_default().trim().to_string(),
        filter: ArticleFilter {
            categories: split_list(params.category.as_deref()),
            sources: split_list(params.source.as_deref()),
            authors: split_list(params.author.as_deref()),
        },
        created_from,
        created_to,
        page: params.page.unwrap_or(1).max(1),
        per_page: params.per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE),
    };
    match state.store.search(&query).await {
        Ok(page) => Json(page).into_response(),
        Err(err) => server_error(err),
    }
}

async fn suggest_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SuggestParams>,
) -> Response {
    let term = params.search.as_deref().map(str::trim).unwrap_or_default();
    if term.is_empty() {
        return json_error(StatusCode::UNPROCESSABLE_ENTITY, "the search field is required");
    }
    let filter = ArticleFilter {
        categories: split_list(params.category.as_deref()),
        sources: split_list(params.source.as_deref()),
        authors: Vec::new(),
    };
    match suggestions(state.store.as_ref(), term, filter).await {
        Ok(found) => Json(found).into_response(),
        Err(err) => server_error(err),
    }
}

async fn categories_handler(State(state): State<Arc<AppState>>) -> Response {
    values_response(state.store.distinct_categories().await)
}

async fn sources_handler(State(state): State<Arc<AppState>>) -> Response {
    values_response(state.store.list_sources().await)
}

async fn authors_handler(State(state): State<Arc<AppState>>) -> Response {
    values_response(state.store.distinct_authors().await)
}

async fn events_handler(State(state): State<Arc<AppState>>) -> Sse<KeepAliveStream<EventStream>> {
    let mut rx = state.broadcaster.subscribe();
    let event_stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(message) if message.channel == ARTICLES_CHANNEL => {
                    let data = String::from_utf8_lossy(&message.payload).into_owned();
                    yield Ok(Event::default().event(message.event).data(data));
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber fell behind; messages skipped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(event_stream.boxed()).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

async fn ingest_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(provider): AxumPath<String>,
) -> Response {
    match state.service.run_ingestion(&provider).await {
        Ok(summary) => Json(summary).into_response(),
        Err(err @ SyncError::UnknownProvider(_)) => json_error(StatusCode::NOT_FOUND, err.to_string()),
        Err(err @ SyncError::ProviderDisabled(_)) => json_error(StatusCode::CONFLICT, err.to_string()),
    }
}

/// Substring matches first qualify, then recent titles close enough to the term. Both are
/// ranked by Jaro-Winkler similarity of the title.
async fn suggestions(
    store: &dyn ArticleStore,
    term: &str,
    filter: ArticleFilter,
) -> Result<Vec<Suggestion>, StoreError> {
    let matched = store
        .search(&SearchQuery {
            term: term.to_string(),
            filter: filter.clone(),
            page: 1,
            per_page: MAX_PER_PAGE,
            ..Default::default()
        })
        .await?
        .data;
    let recent = store
        .list(&ArticleQuery {
            filter,
            page: 1,
            per_page: MAX_PER_PAGE,
        })
        .await?
        .data;
    Ok(rank_suggestions(term, &matched, &recent))
}

fn rank_suggestions(term: &str, matched: &[Article], recent: &[Article]) -> Vec<Suggestion> {
    let needle = term.to_lowercase();
    let mut seen = HashSet::new();
    let mut scored = Vec::new();

    for article in matched {
        if seen.insert(article.id) {
            scored.push((title_similarity(&needle, &article.title), article));
        }
    }
    for article in recent {
        let score = title_similarity(&needle, &article.title);
        if score >= FUZZY_MIN_SIMILARITY && seen.insert(article.id) {
            scored.push((score, article));
        }
    }

    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored
        .into_iter()
        .take(SUGGESTION_LIMIT)
        .map(|(_, article)| Suggestion::from(article))
        .collect()
}

fn title_similarity(needle: &str, title: &str) -> f64 {
    strsim::jaro_winkler(needle, &title.to_lowercase())
}

fn content_snippet(content: &str) -> String {
    let head: String = content.chars().take(SNIPPET_CHARS).collect();
    format!("{head}...")
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Accepts RFC 3339 timestamps or plain `YYYY-MM-DD` dates. A plain upper bound covers the
/// whole day.
fn parse_date_bound(raw: Option<&str>, end_of_day: bool) -> Result<Option<DateTime<Utc>>, String> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| format!("`{raw}` is not a valid date"))?;
    let moment = if end_of_day {
        date.and_hms_micro_opt(23, 59, 59, 999_999)
    } else {
        date.and_hms_opt(0, 0, 0)
    };
    Ok(moment.map(|m| m.and_utc()))
}

/// A cache key together with its generation, read before the store is queried.
struct CacheSlot {
    key: CacheKey,
    generation: u64,
}

impl CacheSlot {
    fn take(cache: &dyn ArticleCache, key: CacheKey) -> Self {
        let generation = cache.generation(&key);
        Self { key, generation }
    }
}

fn cached_json<T: Serialize>(cache: &dyn ArticleCache, slot: Option<CacheSlot>, value: &T) -> Response {
    match serde_json::to_value(value) {
        Ok(body) => {
            if let Some(slot) = slot {
                if !cache.put_if_unchanged(slot.key, slot.generation, body.clone()) {
                    debug!("cache entry changed during read; not filling");
                }
            }
            Json(body).into_response()
        }
        Err(err) => server_error(err),
    }
}

fn values_response(result: Result<Vec<String>, StoreError>) -> Response {
    match result {
        Ok(values) => Json(values).into_response(),
        Err(err) => server_error(err),
    }
}

fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn server_error(err: impl Display) -> Response {
    error!(error = %err, "request failed");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, format!("Server error: {err}"))
}
