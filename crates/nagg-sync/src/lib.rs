//! Ingestion orchestration: config, dedup snapshot, change notification, provider runs, scheduling.

use std::sync::Arc;

use anyhow::{Context, Result};
use nagg_adapters::adapter_for_provider;
use nagg_storage::{ArticleStore, HttpFetcher, MemoryArticleCache, MemoryArticleStore, PgArticleStore};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

pub mod config;
pub mod dedup;
pub mod notify;
pub mod pipeline;

pub use config::{ProviderRegistry, ProviderSettings, SyncConfig};
pub use dedup::TitleSnapshot;
pub use notify::{
    encode_event, BroadcastError, BroadcastMessage, Broadcaster, ChangeNotifier, ChannelBroadcaster,
    NotifyOutcome,
};
pub use pipeline::{
    CategoryFailure, FailureKind, IngestionOrchestrator, IngestionService, OrchestratorConfig, RunStatus,
    RunSummary, SyncError,
};

pub const CRATE_NAME: &str = "nagg-sync";

/// Shared collaborators for one process: the CLI and the web server both build on this.
#[derive(Clone)]
pub struct SyncRuntime {
    pub config: SyncConfig,
    pub store: Arc<dyn ArticleStore>,
    pub cache: Arc<MemoryArticleCache>,
    pub broadcaster: Arc<ChannelBroadcaster>,
    pub notifier: Arc<ChangeNotifier>,
    pub service: Arc<IngestionService>,
}

impl SyncRuntime {
    pub async fn from_config(config: SyncConfig) -> Result<Self> {
        let cache = Arc::new(MemoryArticleCache::new());
        let store: Arc<dyn ArticleStore> = match &config.database_url {
            Some(url) => {
                let store = PgArticleStore::connect(url, cache.clone())
                    .await
                    .context("connecting to postgres")?;
                store.migrate().await.context("applying migrations")?;
                Arc::new(store)
            }
            None => {
                warn!("DATABASE_URL not set; articles are kept in memory only");
                Arc::new(MemoryArticleStore::new(cache.clone()))
            }
        };
        Self::with_store(config, store, cache)
    }

    pub fn with_store(
        config: SyncConfig,
        store: Arc<dyn ArticleStore>,
        cache: Arc<MemoryArticleCache>,
    ) -> Result<Self> {
        let registry = ProviderRegistry::load(&config.providers_file)?;
        let http = Arc::new(HttpFetcher::new(config.http_client_config())?);
        let broadcaster = Arc::new(ChannelBroadcaster::default());
        let notifier = Arc::new(ChangeNotifier::new(broadcaster.clone()));
        let orchestrator = Arc::new(IngestionOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&notifier),
            OrchestratorConfig {
                run_budget: config.run_budget(),
                fetch_timeout: config.fetch_window(),
            },
        ));

        let mut service = IngestionService::new(orchestrator);
        for provider in registry.enabled_providers() {
            let client = adapter_for_provider(provider, Arc::clone(&http), config.endpoint_for(provider));
            service = service.with_provider(Arc::from(client), registry.categories_for(provider));
        }
        info!(providers = ?service.providers(), "ingestion service ready");

        Ok(Self {
            config,
            store,
            cache,
            broadcaster,
            notifier,
            service: Arc::new(service),
        })
    }
}

pub async fn run_sync_once_from_env(provider: Option<&str>) -> Result<Vec<RunSummary>> {
    let runtime = SyncRuntime::from_config(SyncConfig::from_env()).await?;
    match provider {
        Some(name) => Ok(vec![runtime.service.run_ingestion(name).await?]),
        None => Ok(runtime.service.run_all().await),
    }
}

pub async fn maybe_build_scheduler(
    config: &SyncConfig,
    service: Arc<IngestionService>,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = config.sync_cron.as_str();
    let job = Job::new_async(cron, move |_uuid, _l| {
        let service = Arc::clone(&service);
        Box::pin(async move {
            for summary in service.run_all().await {
                info!(
                    provider = %summary.provider,
                    status = ?summary.status,
                    created = summary.created,
                    updated = summary.updated,
                    "scheduled ingestion finished"
                );
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(Some(sched))
}
