//! Provider runs: fetch -> map -> dedup -> upsert -> notify, per category.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use nagg_adapters::{map_record, AdapterError, FetchContext, NewsProvider, RawRecord};
use nagg_core::{Provider, UnknownProvider};
use nagg_storage::{fingerprint, ArticleStore, StoreError};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::dedup::TitleSnapshot;
use crate::notify::{ChangeNotifier, NotifyOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ProviderUnavailable,
    TimedOut,
    Storage,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryFailure {
    pub category: String,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub provider: Provider,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub categories_processed: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped_duplicate: usize,
    pub skipped_invalid: usize,
    pub notifications_published: usize,
    pub notifications_dropped: usize,
    pub timed_out: bool,
    pub failures: Vec<CategoryFailure>,
}

impl RunSummary {
    fn start(run_id: Uuid, provider: Provider) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            provider,
            status: RunStatus::Failed,
            started_at: now,
            finished_at: now,
            categories_processed: 0,
            created: 0,
            updated: 0,
            unchanged: 0,
            skipped_duplicate: 0,
            skipped_invalid: 0,
            notifications_published: 0,
            notifications_dropped: 0,
            timed_out: false,
            failures: Vec::new(),
        }
    }

    fn fail(&mut self, category: &str, kind: FailureKind, message: impl Into<String>) {
        self.failures.push(CategoryFailure {
            category: category.to_string(),
            kind,
            message: message.into(),
        });
    }

    fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self.status = if self.categories_processed == 0 {
            RunStatus::Failed
        } else if self.failures.is_empty() && !self.timed_out {
            RunStatus::Success
        } else {
            RunStatus::Partial
        };
        self
    }

    pub fn failed_categories(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.category.as_str()).collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// Wall-clock limit for one provider run.
    pub run_budget: Duration,
    /// Upper bound for a single category fetch, retries included.
    pub fetch_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            run_budget: Duration::from_secs(120),
            fetch_timeout: Duration::from_secs(20),
        }
    }
}

pub struct IngestionOrchestrator {
    store: Arc<dyn ArticleStore>,
    notifier: Arc<ChangeNotifier>,
    config: OrchestratorConfig,
}

impl IngestionOrchestrator {
    pub fn new(
        store: Arc<dyn ArticleStore>,
        notifier: Arc<ChangeNotifier>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    /// Runs every category of one provider in order. Always returns a summary; category
    /// failures are recorded in it rather than raised.
    pub async fn run(&self, client: &dyn NewsProvider, categories: &[String]) -> RunSummary {
        let run_id = Uuid::new_v4();
        let provider = client.provider();
        let span = info_span!("ingestion_run", %run_id, %provider);
        self.run_inner(run_id, client, categories).instrument(span).await
    }

    async fn run_inner(&self, run_id: Uuid, client: &dyn NewsProvider, categories: &[String]) -> RunSummary {
        let provider = client.provider();
        let deadline = Instant::now() + self.config.run_budget;
        let ctx = FetchContext { run_id };
        let mut summary = RunSummary::start(run_id, provider);

        let mut snapshot = match TitleSnapshot::load(self.store.as_ref()).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "could not load title snapshot; relying on keyed upserts");
                TitleSnapshot::default()
            }
        };

        for category in categories.iter().map(String::as_str) {
            let now = Instant::now();
            if summary.timed_out || now >= deadline {
                summary.timed_out = true;
                summary.fail(category, FailureKind::Aborted, "run budget exhausted before category started");
                continue;
            }

            let budget_bound = now + self.config.fetch_timeout >= deadline;
            let fetch_deadline = deadline.min(now + self.config.fetch_timeout);
            let fetched = timeout_at(fetch_deadline, client.fetch(&ctx, category)).await;

            let records = match fetched {
                Ok(Ok(records)) => records,
                Ok(Err(err)) => {
                    let kind = if err.is_timeout() {
                        FailureKind::TimedOut
                    } else {
                        FailureKind::ProviderUnavailable
                    };
                    log_fetch_failure(category, &err);
                    summary.fail(category, kind, err.to_string());
                    continue;
                }
                Err(_elapsed) => {
                    if budget_bound {
                        summary.timed_out = true;
                    }
                    warn!(category, "provider fetch timed out");
                    summary.fail(category, FailureKind::TimedOut, "fetch exceeded its time limit");
                    continue;
                }
            };

            let fetched_count = records.len();
            match self
                .ingest_category(category, records, deadline, &mut snapshot, &mut summary)
                .await
            {
                Ok(CategoryEnd::Completed) => {
                    summary.categories_processed += 1;
                    debug!(category, records = fetched_count, "category ingested");
                }
                Ok(CategoryEnd::OutOfBudget { left }) => {
                    summary.timed_out = true;
                    warn!(category, left, "run budget exhausted mid-category");
                    summary.fail(
                        category,
                        FailureKind::Aborted,
                        format!("run budget exhausted with {left} of {fetched_count} records left"),
                    );
                }
                Err(err) => {
                    error!(category, error = %err, "storage failure; abandoning category");
                    summary.fail(category, FailureKind::Storage, err.to_string());
                }
            }
        }

        let summary = summary.finish();
        info!(
            status = ?summary.status,
            created = summary.created,
            updated = summary.updated,
            skipped_duplicate = summary.skipped_duplicate,
            skipped_invalid = summary.skipped_invalid,
            failures = summary.failures.len(),
            "ingestion run finished"
        );
        summary
    }

    /// Writes already started always finish; the budget is checked before each record.
    async fn ingest_category(
        &self,
        category: &str,
        records: Vec<RawRecord>,
        deadline: Instant,
        snapshot: &mut TitleSnapshot,
        summary: &mut RunSummary,
    ) -> Result<CategoryEnd, StoreError> {
        let total = records.len();
        for (done, raw) in records.into_iter().enumerate() {
            if Instant::now() >= deadline {
                return Ok(CategoryEnd::OutOfBudget { left: total - done });
            }
            let Some(draft) = map_record(&raw, category) else {
                summary.skipped_invalid += 1;
                warn!(
                    category,
                    raw_title = raw.raw_title().unwrap_or("<missing>"),
                    "skipped invalid record"
                );
                continue;
            };

            let fp = fingerprint(&draft);
            if snapshot.is_duplicate(&draft.title, &fp) {
                summary.skipped_duplicate += 1;
                debug!(category, title = %draft.title, "duplicate record");
                continue;
            }

            let outcome = self.store.upsert(&draft).await?;
            snapshot.record(&draft.title, fp);

            if outcome.created {
                summary.created += 1;
            } else if outcome.changed {
                summary.updated += 1;
            } else {
                summary.unchanged += 1;
                continue;
            }

            match self.notifier.publish(&outcome, category).await {
                NotifyOutcome::Published { .. } => summary.notifications_published += 1,
                NotifyOutcome::Dropped { .. } => summary.notifications_dropped += 1,
                NotifyOutcome::Failed | NotifyOutcome::NotNeeded => {}
            }
        }
        Ok(CategoryEnd::Completed)
    }
}

enum CategoryEnd {
    Completed,
    OutOfBudget { left: usize },
}

fn log_fetch_failure(category: &str, err: &AdapterError) {
    match err {
        AdapterError::MissingApiKey { .. } => warn!(category, error = %err, "provider not configured"),
        _ => error!(category, error = %err, "provider fetch failed"),
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    UnknownProvider(#[from] UnknownProvider),
    #[error("provider `{0}` is disabled")]
    ProviderDisabled(Provider),
}

struct ProviderEntry {
    client: Arc<dyn NewsProvider>,
    categories: Vec<String>,
}

/// Named entry point for ingestion runs: resolves a provider name to its client and categories.
pub struct IngestionService {
    orchestrator: Arc<IngestionOrchestrator>,
    providers: BTreeMap<Provider, ProviderEntry>,
}

impl IngestionService {
    pub fn new(orchestrator: Arc<IngestionOrchestrator>) -> Self {
        Self {
            orchestrator,
            providers: BTreeMap::new(),
        }
    }

    pub fn with_provider(mut self, client: Arc<dyn NewsProvider>, categories: Vec<String>) -> Self {
        self.providers
            .insert(client.provider(), ProviderEntry { client, categories });
        self
    }

    pub fn providers(&self) -> Vec<Provider> {
        self.providers.keys().copied().collect()
    }

    pub async fn run_ingestion(&self, provider_name: &str) -> Result<RunSummary, SyncError> {
        let provider: Provider = provider_name.parse()?;
        self.run_provider(provider).await
    }

    pub async fn run_provider(&self, provider: Provider) -> Result<RunSummary, SyncError> {
        let entry = self
            .providers
            .get(&provider)
            .ok_or(SyncError::ProviderDisabled(provider))?;
        Ok(self
            .orchestrator
            .run(entry.client.as_ref(), &entry.categories)
            .await)
    }

    /// Runs every registered provider concurrently.
    pub async fn run_all(&self) -> Vec<RunSummary> {
        let mut tasks = JoinSet::new();
        for entry in self.providers.values() {
            let orchestrator = Arc::clone(&self.orchestrator);
            let client = Arc::clone(&entry.client);
            let categories = entry.categories.clone();
            tasks.spawn(async move { orchestrator.run(client.as_ref(), &categories).await });
        }

        let mut summaries = Vec::with_capacity(self.providers.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(summary) => summaries.push(summary),
                Err(err) => error!(error = %err, "provider run task failed"),
            }
        }
        summaries.sort_by_key(|s| s.provider);
        summaries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use nagg_adapters::{GuardianFields, GuardianResult, NewsApiArticle};
    use nagg_core::{Article, ArticleDraft, ArticleQuery, Page, SearchQuery};
    use nagg_storage::{MemoryArticleStore, UpsertOutcome};

    use crate::notify::{BroadcastMessage, ChannelBroadcaster};

    #[derive(Clone)]
    enum Script {
        Records(Vec<RawRecord>),
        Unavailable,
        Hang,
    }

    struct ScriptedProvider {
        provider: Provider,
        scripts: Mutex<HashMap<String, Script>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(provider: Provider) -> Self {
            Self {
                provider,
                scripts: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn script(&self, category: &str, script: Script) {
            self.scripts.lock().unwrap().insert(category.to_string(), script);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NewsProvider for ScriptedProvider {
        fn provider(&self) -> Provider {
            self.provider
        }

        async fn fetch(&self, _ctx: &FetchContext, category: &str) -> Result<Vec<RawRecord>, AdapterError> {
            self.calls.lock().unwrap().push(category.to_string());
            let script = self.scripts.lock().unwrap().get(category).cloned();
            match script.unwrap_or(Script::Records(Vec::new())) {
                Script::Records(records) => Ok(records),
                Script::Unavailable => Err(AdapterError::ProviderStatus {
                    provider: self.provider,
                    category: category.to_string(),
                    message: "503 upstream".into(),
                }),
                Script::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Vec::new())
                }
            }
        }
    }

    /// Delegates to a memory store. Upserts whose title contains `poison` fail, and every
    /// upsert first waits `upsert_delay`.
    struct FlakyStore {
        inner: MemoryArticleStore,
        poison: Option<&'static str>,
        upsert_delay: Duration,
    }

    #[async_trait]
    impl ArticleStore for FlakyStore {
        async fn find_by_title(&self, title: &str) -> Result<Option<Article>, StoreError> {
            self.inner.find_by_title(title).await
        }
        async fn find_by_id(&self, id: Uuid) -> Result<Option<Article>, StoreError> {
            self.inner.find_by_id(id).await
        }
        async fn upsert(&self, draft: &ArticleDraft) -> Result<UpsertOutcome, StoreError> {
            if self.poison.is_some_and(|p| draft.title.contains(p)) {
                return Err(StoreError::Unavailable("connection reset".into()));
            }
            tokio::time::sleep(self.upsert_delay).await;
            self.inner.upsert(draft).await
        }
        async fn list_titles(&self) -> Result<HashSet<String>, StoreError> {
            self.inner.list_titles().await
        }
        async fn title_fingerprints(&self) -> Result<HashMap<String, String>, StoreError> {
            self.inner.title_fingerprints().await
        }
        fn invalidate_cache(&self, id: Uuid) {
            self.inner.invalidate_cache(id)
        }
        async fn list(&self, query: &ArticleQuery) -> Result<Page<Article>, StoreError> {
            self.inner.list(query).await
        }
        async fn search(&self, query: &SearchQuery) -> Result<Page<Article>, StoreError> {
            self.inner.search(query).await
        }
        async fn distinct_categories(&self) -> Result<Vec<String>, StoreError> {
            self.inner.distinct_categories().await
        }
        async fn distinct_authors(&self) -> Result<Vec<String>, StoreError> {
            self.inner.distinct_authors().await
        }
        async fn list_sources(&self) -> Result<Vec<String>, StoreError> {
            self.inner.list_sources().await
        }
        async fn delete_all(&self) -> Result<u64, StoreError> {
            self.inner.delete_all().await
        }
    }

    fn guardian_record(headline: &str, body: &str) -> RawRecord {
        RawRecord::Guardian(GuardianResult {
            section_name: Some("Technology".into()),
            web_url: Some("https://www.theguardian.com/technology/2026/feb/24/ai".into()),
            web_publication_date: Some("2026-02-24T12:00:00Z".into()),
            fields: GuardianFields {
                headline: Some(headline.into()),
                body: Some(body.into()),
                ..Default::default()
            },
        })
    }

    fn newsapi_record(title: &str, content: Option<&str>) -> RawRecord {
        RawRecord::NewsApi(NewsApiArticle {
            title: Some(title.into()),
            content: content.map(Into::into),
            url: Some("https://edition.cnn.com/x".into()),
            ..Default::default()
        })
    }

    fn categories(names: &[&str]) -> Vec<String> {
        names.iter().map(|c| c.to_string()).collect()
    }

    struct Harness {
        store: Arc<dyn ArticleStore>,
        events: tokio::sync::broadcast::Receiver<BroadcastMessage>,
        orchestrator: IngestionOrchestrator,
    }

    fn harness_with(store: Arc<dyn ArticleStore>, config: OrchestratorConfig) -> Harness {
        let channel = ChannelBroadcaster::default();
        let events = channel.subscribe();
        let notifier = Arc::new(ChangeNotifier::new(Arc::new(channel)));
        Harness {
            orchestrator: IngestionOrchestrator::new(Arc::clone(&store), notifier, config),
            store,
            events,
        }
    }

    fn harness() -> Harness {
        harness_with(Arc::new(MemoryArticleStore::default()), OrchestratorConfig::default())
    }

    #[tokio::test]
    async fn guardian_scenario_creates_then_skips_then_updates() {
        let mut h = harness();
        let provider = ScriptedProvider::new(Provider::Guardian);
        let cats = categories(&["technology"]);

        provider.script("technology", Script::Records(vec![guardian_record("AI Advances", "Details...")]));
        let first = h.orchestrator.run(&provider, &cats).await;
        assert_eq!(first.status, RunStatus::Success);
        assert_eq!((first.created, first.updated), (1, 0));
        assert_eq!(first.notifications_published, 1);
        assert!(h.events.try_recv().is_ok());

        let second = h.orchestrator.run(&provider, &cats).await;
        assert_eq!((second.created, second.updated), (0, 0));
        assert_eq!(second.skipped_duplicate, 1);
        assert_eq!(second.notifications_published, 0);
        assert!(h.events.try_recv().is_err());

        provider.script("technology", Script::Records(vec![guardian_record("AI Advances", "New details")]));
        let third = h.orchestrator.run(&provider, &cats).await;
        assert_eq!((third.created, third.updated), (0, 1));
        let event: serde_json::Value = serde_json::from_slice(&h.events.try_recv().unwrap().payload).unwrap();
        assert_eq!(event["content"], "New details");
        assert_eq!(event["title"], "AI Advances");
        assert_eq!(event["publishedTime"], "2026-02-24T12:00:00Z");

        assert_eq!(h.store.list_titles().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn repeated_runs_are_idempotent_across_providers_records() {
        let h = harness();
        let provider = ScriptedProvider::new(Provider::NewsApi);
        provider.script(
            "business",
            Script::Records(vec![
                newsapi_record("Markets rally", Some("Stocks rose")),
                newsapi_record("Oil steadies", Some("Prices held")),
                newsapi_record("Markets rally", Some("Stocks rose")),
            ]),
        );
        let cats = categories(&["business"]);

        let first = h.orchestrator.run(&provider, &cats).await;
        assert_eq!(first.created, 2);
        assert_eq!(first.skipped_duplicate, 1, "repeat within a run is caught by the snapshot");

        let second = h.orchestrator.run(&provider, &cats).await;
        assert_eq!((second.created, second.updated), (0, 0));
        assert_eq!(h.store.list_titles().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn invalid_records_never_reach_storage() {
        let h = harness();
        let provider = ScriptedProvider::new(Provider::NewsApi);
        provider.script(
            "health",
            Script::Records(vec![
                newsapi_record("No body", None),
                newsapi_record("   ", Some("body")),
                newsapi_record("Valid", Some("body")),
            ]),
        );
        let summary = h.orchestrator.run(&provider, &categories(&["health"])).await;
        assert_eq!(summary.skipped_invalid, 2);
        assert_eq!(summary.created, 1);
        let titles = h.store.list_titles().await.unwrap();
        assert_eq!(titles.into_iter().collect::<Vec<_>>(), vec!["Valid".to_string()]);
    }

    #[tokio::test]
    async fn one_failing_category_does_not_stop_the_others() {
        let h = harness();
        let provider = ScriptedProvider::new(Provider::NewsApi);
        let cats: Vec<String> = Provider::NewsApi
            .default_categories()
            .iter()
            .map(|c| c.to_string())
            .collect();
        for (i, category) in cats.iter().enumerate() {
            let script = if i == 2 {
                Script::Unavailable
            } else {
                Script::Records(vec![newsapi_record(&format!("story {i}"), Some("body"))])
            };
            provider.script(category, script);
        }

        let summary = h.orchestrator.run(&provider, &cats).await;
        assert_eq!(summary.status, RunStatus::Partial);
        assert_eq!(summary.categories_processed, 6);
        assert_eq!(summary.created, 6);
        assert_eq!(summary.failed_categories(), vec![cats[2].as_str()]);
        assert_eq!(summary.failures[0].kind, FailureKind::ProviderUnavailable);
        assert_eq!(provider.calls(), cats);
    }

    #[tokio::test]
    async fn every_category_failing_yields_failed_status() {
        let h = harness();
        let provider = ScriptedProvider::new(Provider::Nyt);
        provider.script("home", Script::Unavailable);
        provider.script("world", Script::Unavailable);
        let summary = h.orchestrator.run(&provider, &categories(&["home", "world"])).await;
        assert_eq!(summary.status, RunStatus::Failed);
        assert_eq!(summary.failures.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_expiry_times_out_fetch_and_aborts_the_rest() {
        let h = harness_with(
            Arc::new(MemoryArticleStore::default()),
            OrchestratorConfig {
                run_budget: Duration::from_secs(30),
                fetch_timeout: Duration::from_secs(60),
            },
        );
        let provider = ScriptedProvider::new(Provider::Guardian);
        provider.script("business", Script::Records(vec![guardian_record("Early", "body")]));
        provider.script("health", Script::Hang);
        let cats = categories(&["business", "health", "science", "sports"]);

        let summary = h.orchestrator.run(&provider, &cats).await;
        assert!(summary.timed_out);
        assert_eq!(summary.status, RunStatus::Partial);
        assert_eq!(summary.created, 1);
        assert_eq!(summary.categories_processed, 1);
        let kinds: Vec<_> = summary.failures.iter().map(|f| (f.category.as_str(), f.kind)).collect();
        assert_eq!(
            kinds,
            vec![
                ("health", FailureKind::TimedOut),
                ("science", FailureKind::Aborted),
                ("sports", FailureKind::Aborted),
            ]
        );
        assert_eq!(provider.calls(), vec!["business".to_string(), "health".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn per_fetch_timeout_does_not_exhaust_the_budget() {
        let h = harness_with(
            Arc::new(MemoryArticleStore::default()),
            OrchestratorConfig {
                run_budget: Duration::from_secs(120),
                fetch_timeout: Duration::from_secs(20),
            },
        );
        let provider = ScriptedProvider::new(Provider::Guardian);
        provider.script("health", Script::Hang);
        provider.script("science", Script::Records(vec![guardian_record("Later", "body")]));

        let summary = h.orchestrator.run(&provider, &categories(&["health", "science"])).await;
        assert!(!summary.timed_out);
        assert_eq!(summary.failures[0].kind, FailureKind::TimedOut);
        assert_eq!(summary.created, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn budget_is_checked_between_records_of_a_slow_category() {
        let store = Arc::new(FlakyStore {
            inner: MemoryArticleStore::default(),
            poison: None,
            upsert_delay: Duration::from_secs(30),
        });
        let h = harness_with(
            store,
            OrchestratorConfig {
                run_budget: Duration::from_secs(60),
                fetch_timeout: Duration::from_secs(20),
            },
        );
        let provider = ScriptedProvider::new(Provider::NewsApi);
        provider.script("business", Script::Records(vec![newsapi_record("opening", Some("body"))]));
        provider.script(
            "science",
            Script::Records(vec![
                newsapi_record("second", Some("body")),
                newsapi_record("third", Some("body")),
                newsapi_record("fourth", Some("body")),
            ]),
        );
        let cats = categories(&["business", "science", "sports"]);

        let summary = h.orchestrator.run(&provider, &cats).await;
        assert!(summary.timed_out);
        assert_eq!(summary.status, RunStatus::Partial);
        assert_eq!(summary.created, 2);
        assert_eq!(summary.categories_processed, 1);
        let kinds: Vec<_> = summary.failures.iter().map(|f| (f.category.as_str(), f.kind)).collect();
        assert_eq!(
            kinds,
            vec![("science", FailureKind::Aborted), ("sports", FailureKind::Aborted)]
        );
        assert!(summary.failures[0].message.contains("2 of 3"));
        assert!(h.store.find_by_title("second").await.unwrap().is_some());
        assert!(h.store.find_by_title("third").await.unwrap().is_none());
        assert_eq!(provider.calls(), vec!["business".to_string(), "science".to_string()]);
    }

    #[tokio::test]
    async fn storage_failure_abandons_only_that_category() {
        let store = Arc::new(FlakyStore {
            inner: MemoryArticleStore::default(),
            poison: Some("poison"),
            upsert_delay: Duration::ZERO,
        });
        let h = harness_with(store, OrchestratorConfig::default());
        let provider = ScriptedProvider::new(Provider::NewsApi);
        provider.script(
            "science",
            Script::Records(vec![
                newsapi_record("first", Some("body")),
                newsapi_record("poison pill", Some("body")),
                newsapi_record("never attempted", Some("body")),
            ]),
        );
        provider.script("sports", Script::Records(vec![newsapi_record("goal", Some("body"))]));

        let summary = h.orchestrator.run(&provider, &categories(&["science", "sports"])).await;
        assert_eq!(summary.status, RunStatus::Partial);
        assert_eq!(summary.created, 2);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].kind, FailureKind::Storage);
        assert!(h.store.find_by_title("never attempted").await.unwrap().is_none());
        assert!(h.store.find_by_title("goal").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn oversized_event_is_dropped_but_article_is_stored() {
        let h = harness();
        let provider = ScriptedProvider::new(Provider::NewsApi);
        let huge = "x".repeat(20_000);
        provider.script("general", Script::Records(vec![newsapi_record("Long read", Some(&huge))]));

        let summary = h.orchestrator.run(&provider, &categories(&["general"])).await;
        assert_eq!(summary.created, 1);
        assert_eq!(summary.notifications_dropped, 1);
        assert_eq!(summary.notifications_published, 0);
        assert!(h.store.find_by_title("Long read").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn service_resolves_names_and_runs_all_providers() {
        let h = harness();
        let guardian = ScriptedProvider::new(Provider::Guardian);
        guardian.script("technology", Script::Records(vec![guardian_record("AI Advances", "Details...")]));
        let newsapi = ScriptedProvider::new(Provider::NewsApi);
        newsapi.script("business", Script::Records(vec![newsapi_record("Markets", Some("up"))]));

        let service = IngestionService::new(Arc::new(h.orchestrator))
            .with_provider(Arc::new(guardian), categories(&["technology"]))
            .with_provider(Arc::new(newsapi), categories(&["business"]));

        assert!(matches!(
            service.run_ingestion("reuters").await,
            Err(SyncError::UnknownProvider(_))
        ));
        assert!(matches!(
            service.run_ingestion("nyt").await,
            Err(SyncError::ProviderDisabled(Provider::Nyt))
        ));

        let summaries = service.run_all().await;
        let providers: Vec<_> = summaries.iter().map(|s| s.provider).collect();
        assert_eq!(providers, vec![Provider::Guardian, Provider::NewsApi]);
        assert!(summaries.iter().all(|s| s.created == 1));

        let again = service.run_ingestion("guardian").await.unwrap();
        assert_eq!(again.created, 0);
    }

    #[test]
    fn summary_serializes_with_snake_case_kinds() {
        let mut summary = RunSummary::start(Uuid::new_v4(), Provider::Nyt);
        summary.fail("world", FailureKind::ProviderUnavailable, "boom");
        let json = serde_json::to_value(summary.finish()).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["provider"], "nyt");
        assert_eq!(json["failures"][0]["kind"], "provider_unavailable");
    }
}
