use crate::catalog::ModelCatalog;
use costwise_protocol::job::unix_now;
use costwise_protocol::{ModelInfo, Provider};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Where each provider's discovery result is cached on disk. Only the
/// providers named here persist across restarts.
#[derive(Debug, Clone, Default)]
pub struct RegistryCachePaths {
    pub lm_studio: Option<PathBuf>,
    pub openrouter: Option<PathBuf>,
}

impl RegistryCachePaths {
    fn for_provider(&self, provider: Provider) -> Option<&PathBuf> {
        match provider {
            Provider::LocalStudio => self.lm_studio.as_ref(),
            Provider::RemoteAggregator => self.openrouter.as_ref(),
            _ => None,
        }
    }
}

/// Read-only view of one provider's refresh state, for observability.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub provider: Provider,
    pub models: usize,
    pub fetched_at: Option<u64>,
    pub last_error: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DiskCache {
    fetched_at: u64,
    models: Vec<ModelInfo>,
}

#[derive(Debug, Default)]
struct ProviderEntry {
    models: Vec<ModelInfo>,
    /// Unix seconds of the last successful refresh. None means never.
    fetched_at: Option<u64>,
    last_error: Option<String>,
}

struct RegistryState {
    providers: BTreeMap<Provider, ProviderEntry>,
}

/// The registry proper. Owns all `ModelInfo` objects; callers get clones
/// of immutable snapshots and never mutate models.
pub struct ModelRegistry {
    catalogs: Vec<Arc<dyn ModelCatalog>>,
    state: Mutex<RegistryState>,
    ttl: Duration,
    remote_cache_ttl: Duration,
    cache_paths: RegistryCachePaths,
}

impl ModelRegistry {
    pub fn new(
        catalogs: Vec<Arc<dyn ModelCatalog>>,
        ttl: Duration,
        remote_cache_ttl: Duration,
        cache_paths: RegistryCachePaths,
    ) -> Self {
        let mut providers = BTreeMap::new();
        for catalog in &catalogs {
            let provider = catalog.provider();
            let mut entry = ProviderEntry::default();
            if let Some(path) = cache_paths.for_provider(provider) {
                if let Some(cache) = load_disk_cache(path) {
                    log::info!(
                        "Loaded {} cached models for {provider} from {}",
                        cache.models.len(),
                        path.display()
                    );
                    entry.models = cache.models;
                    entry.fetched_at = Some(cache.fetched_at);
                }
            }
            providers.insert(provider, entry);
        }

        Self {
            catalogs,
            state: Mutex::new(RegistryState { providers }),
            ttl,
            remote_cache_ttl,
            cache_paths,
        }
    }

    /// Every known model across all providers, refreshing any provider
    /// whose TTL has lapsed.
    pub async fn available_models(&self) -> Vec<ModelInfo> {
        let mut state = self.state.lock().await;
        self.refresh_lapsed(&mut state, false).await;
        state
            .providers
            .values()
            .flat_map(|entry| entry.models.iter().cloned())
            .collect()
    }

    /// Models whose input and output token costs are both zero.
    ///
    /// `force_refresh` bypasses the TTL, but the shared five-minute remote
    /// cache still coalesces back-to-back refreshes into one upstream call.
    pub async fn free_models(&self, force_refresh: bool) -> Vec<ModelInfo> {
        let mut state = self.state.lock().await;
        self.refresh_lapsed(&mut state, force_refresh).await;
        state
            .providers
            .values()
            .flat_map(|entry| entry.models.iter())
            .filter(|m| m.is_free())
            .cloned()
            .collect()
    }

    /// Borrow-equivalent lookup: the caller receives a clone and must not
    /// treat it as mutable registry state.
    pub async fn get(&self, provider: Provider, id: &str) -> Option<ModelInfo> {
        let mut state = self.state.lock().await;
        self.refresh_lapsed(&mut state, false).await;
        state
            .providers
            .get(&provider)?
            .models
            .iter()
            .find(|m| m.id.id == id)
            .cloned()
    }

    /// Per-provider refresh state for the observability surface.
    pub async fn provider_status(&self) -> Vec<ProviderStatus> {
        let state = self.state.lock().await;
        state
            .providers
            .iter()
            .map(|(provider, entry)| ProviderStatus {
                provider: *provider,
                models: entry.models.len(),
                fetched_at: entry.fetched_at,
                last_error: entry.last_error.clone(),
            })
            .collect()
    }

    /// Refresh every provider that is due. Failures keep prior data.
    ///
    /// Runs under the state mutex, which is what serializes refreshes:
    /// concurrent callers queue here and find the entry already fresh.
    async fn refresh_lapsed(&self, state: &mut RegistryState, force: bool) {
        let now = unix_now();
        for catalog in &self.catalogs {
            let provider = catalog.provider();
            let entry = state.providers.entry(provider).or_default();

            if !refresh_due(entry.fetched_at, now, self.ttl, self.remote_cache_ttl, force) {
                continue;
            }

            match catalog.list_models().await {
                Ok(models) => {
                    log::debug!("Discovered {} models for {provider}", models.len());
                    entry.models = models;
                    entry.fetched_at = Some(now);
                    entry.last_error = None;
                    if let Some(path) = self.cache_paths.for_provider(provider) {
                        write_disk_cache(path, now, &entry.models);
                    }
                }
                Err(e) => {
                    log::warn!("Refresh failed for {provider}, serving prior data: {e}");
                    entry.last_error = Some(e.to_string());
                    // Mark the attempt so a flapping provider is not hammered
                    // more often than the remote cache window allows.
                    if entry.fetched_at.is_none() {
                        entry.fetched_at = Some(now.saturating_sub(self.ttl.as_secs()));
                    }
                }
            }
        }
    }
}

/// A refresh is due when the TTL lapsed, or when forced and the shared
/// remote-cache window has passed. Never-fetched entries are always due.
fn refresh_due(
    fetched_at: Option<u64>,
    now: u64,
    ttl: Duration,
    remote_cache_ttl: Duration,
    force: bool,
) -> bool {
    let Some(fetched) = fetched_at else {
        return true;
    };
    let age = now.saturating_sub(fetched);
    if age >= ttl.as_secs() {
        return true;
    }
    force && age >= remote_cache_ttl.as_secs()
}

fn load_disk_cache(path: &PathBuf) -> Option<DiskCache> {
    if !path.exists() {
        return None;
    }
    match std::fs::read_to_string(path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(cache) => Some(cache),
            Err(e) => {
                log::warn!("Discarding corrupted registry cache {}: {e}", path.display());
                None
            }
        },
        Err(e) => {
            log::warn!("Failed to read registry cache {}: {e}", path.display());
            None
        }
    }
}

fn write_disk_cache(path: &PathBuf, fetched_at: u64, models: &[ModelInfo]) {
    let cache = DiskCache {
        fetched_at,
        models: models.to_vec(),
    };
    let write = || -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&cache).unwrap_or_default();
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)
    };
    if let Err(e) = write() {
        log::warn!("Failed to write registry cache {}: {e}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RegistryError;
    use async_trait::async_trait;
    use costwise_protocol::{ModelCapabilities, ModelId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn model(provider: Provider, id: &str, input_cost: f64) -> ModelInfo {
        ModelInfo {
            id: ModelId::new(provider, id),
            display_name: id.to_string(),
            context_window: 8192,
            cost_per_input_token: input_cost,
            cost_per_output_token: input_cost,
            capabilities: ModelCapabilities::default(),
        }
    }

    struct CountingCatalog {
        provider: Provider,
        calls: AtomicUsize,
        fail_after: Option<usize>,
        models: Vec<ModelInfo>,
    }

    impl CountingCatalog {
        fn new(provider: Provider, models: Vec<ModelInfo>) -> Self {
            Self {
                provider,
                calls: AtomicUsize::new(0),
                fail_after: None,
                models,
            }
        }
    }

    #[async_trait]
    impl ModelCatalog for CountingCatalog {
        fn provider(&self) -> Provider {
            self.provider
        }

        async fn list_models(&self) -> crate::Result<Vec<ModelInfo>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(limit) = self.fail_after {
                if call >= limit {
                    return Err(RegistryError::Fetch("backend down".into()));
                }
            }
            Ok(self.models.clone())
        }
    }

    fn registry_with(catalog: Arc<CountingCatalog>, ttl: Duration) -> ModelRegistry {
        ModelRegistry::new(
            vec![catalog],
            ttl,
            Duration::from_secs(300),
            RegistryCachePaths::default(),
        )
    }

    #[tokio::test]
    async fn forced_refreshes_coalesce_within_remote_cache_window() {
        let catalog = Arc::new(CountingCatalog::new(
            Provider::RemoteAggregator,
            vec![model(Provider::RemoteAggregator, "free-7b", 0.0)],
        ));
        let registry = registry_with(catalog.clone(), Duration::from_secs(86_400));

        let first = registry.free_models(true).await;
        let second = registry.free_models(true).await;

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        // Two forced refreshes in quick succession, one upstream call.
        assert_eq!(catalog.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_preserves_prior_models() {
        let mut catalog = CountingCatalog::new(
            Provider::LocalStudio,
            vec![model(Provider::LocalStudio, "phi3-mini", 0.0)],
        );
        catalog.fail_after = Some(1);
        let catalog = Arc::new(catalog);
        // Zero TTL forces a refresh attempt on every lookup.
        let registry = registry_with(catalog.clone(), Duration::from_secs(0));

        assert_eq!(registry.available_models().await.len(), 1);
        let after_failure = registry.available_models().await;
        assert_eq!(after_failure.len(), 1, "stale data must survive a failed refresh");
        assert!(catalog.calls.load(Ordering::SeqCst) >= 2);

        let status = registry.provider_status().await;
        assert!(status[0].last_error.is_some());
    }

    #[tokio::test]
    async fn free_models_filters_priced_entries() {
        let catalog = Arc::new(CountingCatalog::new(
            Provider::RemoteAggregator,
            vec![
                model(Provider::RemoteAggregator, "free-7b", 0.0),
                model(Provider::RemoteAggregator, "paid-70b", 0.00001),
            ],
        ));
        let registry = registry_with(catalog, Duration::from_secs(86_400));

        let free = registry.free_models(false).await;
        assert_eq!(free.len(), 1);
        assert_eq!(free[0].id.id, "free-7b");
    }

    #[tokio::test]
    async fn get_finds_by_provider_and_id() {
        let catalog = Arc::new(CountingCatalog::new(
            Provider::LocalOllama,
            vec![model(Provider::LocalOllama, "llama3", 0.0)],
        ));
        let registry = registry_with(catalog, Duration::from_secs(86_400));

        assert!(registry.get(Provider::LocalOllama, "llama3").await.is_some());
        assert!(registry.get(Provider::LocalOllama, "absent").await.is_none());
        assert!(registry.get(Provider::LocalStudio, "llama3").await.is_none());
    }

    #[tokio::test]
    async fn disk_cache_round_trips_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let paths = RegistryCachePaths {
            lm_studio: Some(dir.path().join("lm-studio-models.json")),
            openrouter: None,
        };

        let catalog = Arc::new(CountingCatalog::new(
            Provider::LocalStudio,
            vec![model(Provider::LocalStudio, "phi3-mini", 0.0)],
        ));
        {
            let registry = ModelRegistry::new(
                vec![catalog],
                Duration::from_secs(86_400),
                Duration::from_secs(300),
                paths.clone(),
            );
            registry.available_models().await;
        }

        // A new instance with a catalog that always fails still serves the
        // disk cache.
        let mut failing = CountingCatalog::new(Provider::LocalStudio, Vec::new());
        failing.fail_after = Some(0);
        let registry = ModelRegistry::new(
            vec![Arc::new(failing)],
            Duration::from_secs(86_400),
            Duration::from_secs(300),
            paths,
        );
        let models = registry.available_models().await;
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id.id, "phi3-mini");
    }
}
