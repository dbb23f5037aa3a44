use crate::task::Granularity;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Process-wide configuration, assembled once at startup from environment
/// variables and defaults, then passed explicitly to the components that
/// need it. There is no global config state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// OpenAI-compatible local endpoint (LM Studio class).
    pub lm_studio_endpoint: String,
    /// Plain local chat endpoint (Ollama class).
    pub ollama_endpoint: String,
    /// Hosted aggregator endpoint.
    pub openrouter_endpoint: String,
    /// API key for the remote aggregator. Remote operations without it
    /// fail with PreconditionFailed.
    pub openrouter_api_key: Option<String>,
    /// USD threshold above which paid routing requires explicit priority.
    pub cost_threshold: f64,
    /// Fallback model for synthesis, as `provider:id`.
    pub default_model_id: String,
    /// Root directory for persistent state files.
    pub state_dir: PathBuf,
    /// Workspace tree indexed for retrieval at startup, when set.
    pub index_root: Option<PathBuf>,
    /// Glob patterns excluded from directory indexing.
    pub index_exclude_patterns: Vec<String>,
    /// Per-provider registry refresh TTL.
    pub registry_ttl: Duration,
    /// Shared in-memory cache window for remote lookups.
    pub remote_cache_ttl: Duration,
    /// Terminal jobs older than this are swept.
    pub job_ttl: Duration,
    /// Effective load above which the balancer searches for alternatives.
    pub load_alternative_threshold: f64,
    /// Hard effective-load cap; excess subtasks wait in FIFO order.
    pub load_hard_cap: f64,
    /// Upper bound on concurrent subtask workers per job.
    pub max_workers: usize,
    /// Wall-clock budget for one job.
    pub job_deadline: Duration,
    pub granularity: Granularity,
    /// BM25 parameters for the code index.
    pub bm25_k1: f64,
    pub bm25_b: f64,
    /// BM25 score above which a cache hit short-circuits routing.
    pub cache_hit_threshold: f64,
    /// Line count above which indexed files are split into chunks.
    pub index_chunk_lines: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            lm_studio_endpoint: "http://127.0.0.1:1234/v1".to_string(),
            ollama_endpoint: "http://127.0.0.1:11434".to_string(),
            openrouter_endpoint: "https://openrouter.ai/api/v1".to_string(),
            openrouter_api_key: None,
            cost_threshold: 0.02,
            default_model_id: "ollama:llama3".to_string(),
            state_dir: PathBuf::from(".costwise"),
            index_root: None,
            index_exclude_patterns: vec![
                "**/node_modules/**".to_string(),
                "**/target/**".to_string(),
                "**/.git/**".to_string(),
            ],
            registry_ttl: Duration::from_secs(24 * 60 * 60),
            remote_cache_ttl: Duration::from_secs(5 * 60),
            job_ttl: Duration::from_secs(60 * 60),
            load_alternative_threshold: 3.0,
            load_hard_cap: 5.0,
            max_workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            job_deadline: Duration::from_secs(10 * 60),
            granularity: Granularity::Medium,
            bm25_k1: 1.5,
            bm25_b: 0.75,
            cache_hit_threshold: 0.8,
            index_chunk_lines: 400,
        }
    }
}

impl RouterConfig {
    /// Build the config from the process environment. Unset variables fall
    /// back to defaults; malformed numeric values are ignored with the
    /// default kept.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("LM_STUDIO_ENDPOINT") {
            cfg.lm_studio_endpoint = v;
        }
        if let Ok(v) = std::env::var("OLLAMA_ENDPOINT") {
            cfg.ollama_endpoint = v;
        }
        if let Ok(v) = std::env::var("OPENROUTER_ENDPOINT") {
            cfg.openrouter_endpoint = v;
        }
        if let Ok(v) = std::env::var("OPENROUTER_API_KEY") {
            if !v.trim().is_empty() {
                cfg.openrouter_api_key = Some(v);
            }
        }
        if let Some(v) = env_parse::<f64>("COST_THRESHOLD") {
            cfg.cost_threshold = v;
        }
        if let Ok(v) = std::env::var("DEFAULT_MODEL_ID") {
            cfg.default_model_id = v;
        }
        if let Ok(v) = std::env::var("DB_DIR") {
            cfg.state_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("INDEX_ROOT") {
            if !v.trim().is_empty() {
                cfg.index_root = Some(PathBuf::from(v));
            }
        }
        if let Ok(v) = std::env::var("INDEX_EXCLUDE_PATTERNS") {
            cfg.index_exclude_patterns = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = env_parse::<u64>("REGISTRY_TTL_SECS") {
            cfg.registry_ttl = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<u64>("JOB_TTL_SECS") {
            cfg.job_ttl = Duration::from_secs(v);
        }
        if let Some(v) = env_parse::<f64>("LOAD_ALTERNATIVE_THRESHOLD") {
            cfg.load_alternative_threshold = v;
        }
        if let Some(v) = env_parse::<usize>("MAX_WORKERS") {
            cfg.max_workers = v.max(1);
        }
        if let Ok(v) = std::env::var("DECOMPOSITION_GRANULARITY") {
            if let Some(g) = Granularity::parse(v.trim()) {
                cfg.granularity = g;
            }
        }

        cfg
    }

    /// Path of the performance store database.
    pub fn models_db_path(&self) -> PathBuf {
        self.state_dir.join("models-db.json")
    }

    /// Path of the local-backend registry cache.
    pub fn lm_studio_cache_path(&self) -> PathBuf {
        self.state_dir.join("lm-studio-models.json")
    }

    /// Path of the per-model prompting-strategy overrides.
    pub fn lm_studio_strategies_path(&self) -> PathBuf {
        self.state_dir.join("lm-studio-strategies.json")
    }

    /// Path of the remote registry cache.
    pub fn openrouter_cache_path(&self) -> PathBuf {
        self.state_dir.join("openrouter-models.json")
    }

    /// Path of the single-instance lock file.
    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join("costwise.lock")
    }

    /// Directory holding benchmark result history.
    pub fn benchmark_results_dir(&self) -> PathBuf {
        self.state_dir.join("benchmark-results")
    }

    /// Path of the persisted code index.
    pub fn code_index_path(&self) -> PathBuf {
        self.state_dir.join("code-index.json")
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = RouterConfig::default();
        assert_eq!(cfg.registry_ttl, Duration::from_secs(86_400));
        assert_eq!(cfg.remote_cache_ttl, Duration::from_secs(300));
        assert_eq!(cfg.cache_hit_threshold, 0.8);
        assert!(cfg.max_workers >= 1);
        assert_eq!(cfg.models_db_path(), PathBuf::from(".costwise/models-db.json"));
    }
}
