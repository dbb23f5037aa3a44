//! Service wiring: every component is constructed once at startup and
//! injected by reference. There is no global state and no lazy
//! initialization; the dependency graph is explicit in `from_parts`.

use costwise_backends::{
    build_http_client, ChatBackend, LmStudioBackend, LmStudioCatalog, OllamaBackend,
    OllamaCatalog, OpenRouterBackend, OpenRouterCatalog,
};
use costwise_code_index::CodeIndex;
use costwise_perf::PerfStore;
use costwise_planner::TaskDecomposer;
use costwise_protocol::{ModelId, Provider, RouterConfig};
use costwise_registry::{ModelCatalog, ModelRegistry, RegistryCachePaths};
use costwise_router::{EventBus, Executor, JobTracker, LoadBalancer, LoadTracker};
use costwise_scoring::ScoringEngine;
use rmcp::handler::server::tool::ToolRouter;
use std::collections::HashMap;
use std::sync::Arc;

pub struct ServiceState {
    pub config: RouterConfig,
    pub registry: Arc<ModelRegistry>,
    pub perf: Arc<PerfStore>,
    pub tracker: Arc<JobTracker>,
    pub balancer: LoadBalancer,
    pub executor: Executor,
    pub code_index: Arc<CodeIndex>,
    pub decomposer: TaskDecomposer,
    pub backends: HashMap<Provider, Arc<dyn ChatBackend>>,
}

/// Costwise MCP service.
#[derive(Clone)]
pub struct CostwiseService {
    pub(crate) state: Arc<ServiceState>,
    pub(crate) tool_router: ToolRouter<Self>,
}

impl CostwiseService {
    /// Production wiring: real HTTP backends per the configured endpoints.
    /// The aggregator is always wired; without an API key its discovery
    /// refuses with the missing-key precondition instead of silently
    /// vanishing from the provider set.
    pub fn new(config: RouterConfig) -> anyhow::Result<Self> {
        let client = build_http_client()?;

        let lm_studio = Arc::new(LmStudioBackend::new(
            client.clone(),
            config.lm_studio_endpoint.clone(),
        ));
        let ollama = Arc::new(OllamaBackend::new(
            client.clone(),
            config.ollama_endpoint.clone(),
        ));

        let mut backends: HashMap<Provider, Arc<dyn ChatBackend>> = HashMap::new();
        backends.insert(Provider::LocalStudio, lm_studio.clone());
        backends.insert(Provider::LocalOllama, ollama.clone());

        let mut catalogs: Vec<Arc<dyn ModelCatalog>> = vec![
            Arc::new(LmStudioCatalog::new(client.clone(), lm_studio)),
            Arc::new(OllamaCatalog::new(client.clone(), ollama)),
        ];

        if config.openrouter_api_key.is_none() {
            log::warn!("No aggregator API key configured; remote operations will be refused");
        }
        let openrouter = Arc::new(OpenRouterBackend::new(
            client.clone(),
            config.openrouter_endpoint.clone(),
            config.openrouter_api_key.clone().unwrap_or_default(),
        ));
        backends.insert(Provider::RemoteAggregator, openrouter.clone());
        catalogs.push(Arc::new(OpenRouterCatalog::new(client, openrouter)));

        Ok(Self::from_parts(config, catalogs, backends, None))
    }

    /// Explicit wiring, used by `new` and by tests with scripted backends.
    /// `scoring_seed` pins the jitter for reproducible selection.
    pub fn from_parts(
        config: RouterConfig,
        catalogs: Vec<Arc<dyn ModelCatalog>>,
        backends: HashMap<Provider, Arc<dyn ChatBackend>>,
        scoring_seed: Option<u64>,
    ) -> Self {
        let registry = Arc::new(ModelRegistry::new(
            catalogs,
            config.registry_ttl,
            config.remote_cache_ttl,
            RegistryCachePaths {
                lm_studio: Some(config.lm_studio_cache_path()),
                openrouter: Some(config.openrouter_cache_path()),
            },
        ));

        let perf = Arc::new(PerfStore::open(config.models_db_path()));
        perf.seed_from_benchmarks(&config.benchmark_results_dir());

        let code_index = Arc::new(CodeIndex::open(
            &config.state_dir,
            &config.index_exclude_patterns,
            config.index_chunk_lines,
            config.bm25_k1,
            config.bm25_b,
        ));
        if let Some(root) = config.index_root.clone() {
            warm_index(code_index.clone(), root);
        }

        let tracker = Arc::new(JobTracker::new(EventBus::default(), config.job_ttl));
        let load = Arc::new(LoadTracker::new());
        let scoring = Arc::new(match scoring_seed {
            Some(seed) => ScoringEngine::with_seed(seed),
            None => ScoringEngine::new(),
        });
        let balancer = LoadBalancer::new(scoring, load.clone(), config.load_alternative_threshold);

        let default_model = ModelId::parse(&config.default_model_id)
            .unwrap_or_else(|_| ModelId::new(Provider::LocalOllama, "llama3"));
        let executor = Executor::new(
            backends.clone(),
            Some(code_index.clone()),
            tracker.clone(),
            perf.clone(),
            load,
            config.max_workers,
            config.load_hard_cap as usize,
            config.job_deadline,
            default_model,
        );

        let decomposer = TaskDecomposer::new(config.granularity);

        Self {
            state: Arc::new(ServiceState {
                config,
                registry,
                perf,
                tracker,
                balancer,
                executor,
                code_index,
                decomposer,
                backends,
            }),
            tool_router: Self::tool_router(),
        }
    }

    pub fn state(&self) -> &ServiceState {
        &self.state
    }
}

/// Index the configured workspace in the background; requests served
/// before it finishes simply miss the cache.
fn warm_index(index: Arc<CodeIndex>, root: std::path::PathBuf) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        log::debug!("No runtime yet; skipping index warmup");
        return;
    };
    handle.spawn(async move {
        match index.index_directory(&root, false).await {
            Ok(stats) => log::info!(
                "Workspace index warm: {} files, {} chunks",
                stats.files_indexed,
                stats.chunks
            ),
            Err(e) => log::warn!("Index warmup failed for {}: {e}", root.display()),
        }
    });
}
