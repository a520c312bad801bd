use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use nagg_adapters::{ProviderEndpoint, GUARDIAN_BASE_URL, NEWS_API_BASE_URL, NYT_BASE_URL};
use nagg_core::Provider;
use nagg_storage::{HttpClientConfig, RetryPolicy};
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: Option<String>,
    pub guardian_api_key: Option<String>,
    pub nyt_api_key: Option<String>,
    pub news_api_key: Option<String>,
    pub guardian_base_url: String,
    pub nyt_base_url: String,
    pub news_api_base_url: String,
    pub http_timeout_secs: u64,
    pub http_max_retries: usize,
    pub run_budget_secs: u64,
    pub user_agent: String,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
    pub web_port: u16,
    pub providers_file: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            database_url: non_empty("DATABASE_URL"),
            guardian_api_key: non_empty("GUARDIAN_API_KEY"),
            nyt_api_key: non_empty("NYT_API_KEY"),
            news_api_key: non_empty("NEWS_API_KEY"),
            guardian_base_url: non_empty("GUARDIAN_BASE_URL")
                .unwrap_or_else(|| GUARDIAN_BASE_URL.to_string()),
            nyt_base_url: non_empty("NYT_BASE_URL").unwrap_or_else(|| NYT_BASE_URL.to_string()),
            news_api_base_url: non_empty("NEWS_API_BASE_URL")
                .unwrap_or_else(|| NEWS_API_BASE_URL.to_string()),
            http_timeout_secs: parse_var(non_empty("NAGG_HTTP_TIMEOUT_SECS")).unwrap_or(20),
            http_max_retries: parse_var(non_empty("NAGG_HTTP_MAX_RETRIES")).unwrap_or(0),
            run_budget_secs: parse_var(non_empty("NAGG_RUN_BUDGET_SECS")).unwrap_or(120),
            user_agent: non_empty("NAGG_USER_AGENT").unwrap_or_else(|| "nagg-bot/0.1".to_string()),
            scheduler_enabled: lookup("NAGG_SCHEDULER_ENABLED")
                .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            sync_cron: non_empty("NAGG_SYNC_CRON").unwrap_or_else(|| "0 */30 * * * *".to_string()),
            web_port: parse_var(non_empty("NAGG_WEB_PORT")).unwrap_or(8000),
            providers_file: non_empty("NAGG_PROVIDERS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("providers.yaml")),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: self.http_timeout(),
            user_agent: Some(self.user_agent.clone()),
            retry: self.retry_policy(),
            ..Default::default()
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.http_max_retries,
            ..Default::default()
        }
    }

    /// Time one category fetch may take including retries. The run budget still caps it.
    pub fn fetch_window(&self) -> Duration {
        self.retry_policy().worst_case(self.http_timeout())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs.max(1))
    }

    pub fn run_budget(&self) -> Duration {
        Duration::from_secs(self.run_budget_secs.max(1))
    }

    pub fn endpoint_for(&self, provider: Provider) -> ProviderEndpoint {
        match provider {
            Provider::Guardian => {
                ProviderEndpoint::new(self.guardian_base_url.clone(), self.guardian_api_key.clone())
            }
            Provider::Nyt => ProviderEndpoint::new(self.nyt_base_url.clone(), self.nyt_api_key.clone()),
            Provider::NewsApi => {
                ProviderEndpoint::new(self.news_api_base_url.clone(), self.news_api_key.clone())
            }
        }
    }
}

fn parse_var<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderRegistry {
    #[serde(default)]
    pub providers: Vec<ProviderSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSettings {
    pub provider: Provider,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub categories: Option<Vec<String>>,
}

fn enabled_by_default() -> bool {
    true
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self {
            providers: Provider::ALL
                .into_iter()
                .map(|provider| ProviderSettings {
                    provider,
                    enabled: true,
                    categories: None,
                })
                .collect(),
        }
    }
}

impl ProviderRegistry {
    /// Reads the registry file; a missing file means every provider with its default categories.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text =
            std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let registry: Self = serde_yaml::from_str(text)?;
        Ok(registry)
    }

    fn settings(&self) -> HashMap<Provider, &ProviderSettings> {
        self.providers.iter().map(|s| (s.provider, s)).collect()
    }

    /// Providers not listed in the file stay disabled once a file exists.
    pub fn enabled_providers(&self) -> Vec<Provider> {
        let settings = self.settings();
        Provider::ALL
            .into_iter()
            .filter(|p| settings.get(p).is_some_and(|s| s.enabled))
            .collect()
    }

    pub fn categories_for(&self, provider: Provider) -> Vec<String> {
        let configured = self
            .settings()
            .get(&provider)
            .and_then(|s| s.categories.clone())
            .filter(|c| !c.is_empty());
        configured.unwrap_or_else(|| {
            provider
                .default_categories()
                .iter()
                .map(|c| c.to_string())
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let config = SyncConfig::from_lookup(|_| None);
        assert_eq!(config.database_url, None);
        assert_eq!(config.http_timeout(), Duration::from_secs(20));
        assert_eq!(config.run_budget(), Duration::from_secs(120));
        assert_eq!(config.http_max_retries, 0);
        assert_eq!(config.fetch_window(), config.http_timeout());
        assert_eq!(config.web_port, 8000);
        assert!(!config.scheduler_enabled);
        assert_eq!(config.endpoint_for(Provider::Nyt).base_url, NYT_BASE_URL);
        assert_eq!(config.endpoint_for(Provider::Guardian).api_key, None);
    }

    #[test]
    fn overrides_are_read_and_blank_values_ignored() {
        let env: HashMap<&str, &str> = [
            ("DATABASE_URL", ""),
            ("NEWS_API_KEY", "secret"),
            ("NEWS_API_BASE_URL", "http://localhost:9999"),
            ("NAGG_HTTP_TIMEOUT_SECS", "5"),
            ("NAGG_RUN_BUDGET_SECS", "not-a-number"),
            ("NAGG_SCHEDULER_ENABLED", "true"),
        ]
        .into_iter()
        .collect();
        let config = SyncConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.database_url, None);
        assert_eq!(config.http_timeout(), Duration::from_secs(5));
        assert_eq!(config.run_budget(), Duration::from_secs(120));
        assert!(config.scheduler_enabled);
        let endpoint = config.endpoint_for(Provider::NewsApi);
        assert_eq!(endpoint.base_url, "http://localhost:9999");
        assert_eq!(endpoint.api_key.as_deref(), Some("secret"));
    }

    #[test]
    fn retries_widen_the_fetch_window() {
        let env: HashMap<&str, &str> =
            [("NAGG_HTTP_TIMEOUT_SECS", "10"), ("NAGG_HTTP_MAX_RETRIES", "2")].into_iter().collect();
        let config = SyncConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.http_client_config().retry.max_retries, 2);
        assert_eq!(config.http_client_config().timeout, Duration::from_secs(10));
        assert_eq!(config.fetch_window(), Duration::from_millis(30_750));
    }

    #[test]
    fn registry_yaml_controls_enablement_and_categories() {
        let registry = ProviderRegistry::from_yaml_str(
            r#"
providers:
  - provider: guardian
    categories: [technology, science]
  - provider: nyt
    enabled: false
"#,
        )
        .unwrap();

        assert_eq!(registry.enabled_providers(), vec![Provider::Guardian]);
        assert_eq!(registry.categories_for(Provider::Guardian), vec!["technology", "science"]);
        assert_eq!(registry.categories_for(Provider::Nyt).len(), 7);
    }

    #[test]
    fn missing_registry_file_enables_everything() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ProviderRegistry::load(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(registry.enabled_providers(), Provider::ALL.to_vec());
    }

    #[test]
    fn registry_file_is_read_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "providers:\n  - provider: newsapi\n    categories: [sports]").unwrap();
        let registry = ProviderRegistry::load(file.path()).unwrap();
        assert_eq!(registry.enabled_providers(), vec![Provider::NewsApi]);
        assert_eq!(registry.categories_for(Provider::NewsApi), vec!["sports"]);
    }
}
