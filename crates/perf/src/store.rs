use crate::error::{PerfError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Smoothing factor for every rolling average in the store.
pub const EMA_ALPHA: f64 = 0.3;

/// Quality floor below which an observation does not inform complexity fit.
const FIT_QUALITY_FLOOR: f64 = 0.6;

/// Rolling statistics for one model id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStats {
    /// EMA of success (1.0) / failure (0.0) outcomes.
    pub success_rate: f64,
    /// EMA of observed output quality in [0, 1].
    pub quality_score: f64,
    /// EMA of response time in milliseconds.
    pub avg_response_ms: f64,
    /// EMA of completion tokens over total tokens, in [0, 1].
    pub token_efficiency: f64,
    /// Running mean of task complexity over observations whose quality met
    /// the floor. Absent until the model produces a good-quality result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complexity_fit: Option<f64>,
    /// Observations contributing to `complexity_fit`.
    #[serde(default)]
    pub fit_samples: u64,
    pub samples: u64,
}

impl ModelStats {
    fn from_observation(obs: &ExecutionObservation) -> Self {
        let mut stats = Self {
            success_rate: if obs.success { 1.0 } else { 0.0 },
            quality_score: obs.quality,
            avg_response_ms: obs.response_time_ms as f64,
            token_efficiency: obs.token_efficiency(),
            complexity_fit: None,
            fit_samples: 0,
            samples: 1,
        };
        stats.update_fit(obs);
        stats
    }

    fn absorb(&mut self, obs: &ExecutionObservation) {
        let outcome = if obs.success { 1.0 } else { 0.0 };
        self.success_rate = ema(self.success_rate, outcome);
        self.quality_score = ema(self.quality_score, obs.quality);
        self.avg_response_ms = ema(self.avg_response_ms, obs.response_time_ms as f64);
        self.token_efficiency = ema(self.token_efficiency, obs.token_efficiency());
        self.samples += 1;
        self.update_fit(obs);
    }

    fn update_fit(&mut self, obs: &ExecutionObservation) {
        if obs.quality < FIT_QUALITY_FLOOR {
            return;
        }
        let n = self.fit_samples as f64;
        let prior = self.complexity_fit.unwrap_or(0.0);
        self.complexity_fit = Some((prior * n + obs.complexity) / (n + 1.0));
        self.fit_samples += 1;
    }
}

fn ema(prior: f64, observation: f64) -> f64 {
    EMA_ALPHA * observation + (1.0 - EMA_ALPHA) * prior
}

/// One observed model execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionObservation {
    /// `provider:id` form.
    pub model_id: String,
    pub success: bool,
    /// Output quality estimate in [0, 1].
    pub quality: f64,
    pub response_time_ms: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Complexity of the task that produced this observation.
    pub complexity: f64,
}

impl ExecutionObservation {
    /// Completion share of total tokens, in [0, 1].
    fn token_efficiency(&self) -> f64 {
        let total = self.prompt_tokens + self.completion_tokens;
        if total == 0 {
            return 0.0;
        }
        self.completion_tokens as f64 / total as f64
    }
}

/// Aggregate view over a complexity window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComplexityAnalysis {
    pub avg_success_rate: f64,
    pub avg_quality: f64,
    /// Top-quartile model ids by quality within the window.
    pub top_performers: Vec<String>,
    pub models_in_window: usize,
}

/// The store proper. Single writer behind a mutex; every read hands out a
/// cloned snapshot so callers never hold the lock across awaits.
pub struct PerfStore {
    inner: Mutex<BTreeMap<String, ModelStats>>,
    path: Option<PathBuf>,
}

impl PerfStore {
    /// Open the store backed by `models-db.json` under the state root.
    /// Corrupted entries are dropped on read; a corrupted file starts empty.
    pub fn open(path: PathBuf) -> Self {
        let entries = match load_entries(&path) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Starting with empty performance store: {e}");
                BTreeMap::new()
            }
        };
        Self {
            inner: Mutex::new(entries),
            path: Some(path),
        }
    }

    /// In-memory store for tests.
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(BTreeMap::new()),
            path: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().expect("perf store lock").is_empty()
    }

    /// Record one observed execution and persist best-effort.
    pub fn record(&self, obs: &ExecutionObservation) {
        {
            let mut inner = self.inner.lock().expect("perf store lock");
            match inner.get_mut(&obs.model_id) {
                Some(stats) => stats.absorb(obs),
                None => {
                    inner.insert(obs.model_id.clone(), ModelStats::from_observation(obs));
                }
            }
        }
        if let Err(e) = self.save() {
            log::warn!("Failed to persist performance store: {e}");
        }
    }

    /// Current statistics snapshot for one model.
    pub fn stats(&self, model_id: &str) -> Option<ModelStats> {
        self.inner
            .lock()
            .expect("perf store lock")
            .get(model_id)
            .cloned()
    }

    /// Snapshot of the whole store.
    pub fn all(&self) -> BTreeMap<String, ModelStats> {
        self.inner.lock().expect("perf store lock").clone()
    }

    /// Aggregate models whose complexity fit falls in `[min, max]`.
    pub fn analyze_by_complexity(&self, min: f64, max: f64) -> ComplexityAnalysis {
        let inner = self.inner.lock().expect("perf store lock");
        let mut window: Vec<(&String, &ModelStats)> = inner
            .iter()
            .filter(|(_, stats)| {
                stats
                    .complexity_fit
                    .is_some_and(|fit| fit >= min && fit <= max)
            })
            .collect();

        if window.is_empty() {
            return ComplexityAnalysis::default();
        }

        let n = window.len() as f64;
        let avg_success_rate = window.iter().map(|(_, s)| s.success_rate).sum::<f64>() / n;
        let avg_quality = window.iter().map(|(_, s)| s.quality_score).sum::<f64>() / n;

        // Quality descending, id ascending for determinism.
        window.sort_by(|a, b| {
            b.1.quality_score
                .partial_cmp(&a.1.quality_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        let quartile = (window.len() + 3) / 4;
        let top_performers = window
            .iter()
            .take(quartile)
            .map(|(id, _)| (*id).clone())
            .collect();

        ComplexityAnalysis {
            avg_success_rate,
            avg_quality,
            top_performers,
            models_in_window: window.len(),
        }
    }

    /// Seed from benchmark history when the store has no data yet.
    /// `dir` holds `comprehensive-results-*.json` files, each an array of
    /// per-model summaries.
    pub fn seed_from_benchmarks(&self, dir: &Path) -> usize {
        if !self.is_empty() || !dir.is_dir() {
            return 0;
        }

        let mut seeded = 0;
        let Ok(entries) = std::fs::read_dir(dir) else {
            return 0;
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if !name.starts_with("comprehensive-results-") || !name.ends_with(".json") {
                continue;
            }
            match std::fs::read_to_string(entry.path()) {
                Ok(raw) => seeded += self.seed_records(&raw),
                Err(e) => log::warn!("Skipping benchmark file {name}: {e}"),
            }
        }
        if seeded > 0 {
            log::info!("Seeded performance store from {seeded} benchmark records");
            if let Err(e) = self.save() {
                log::warn!("Failed to persist seeded store: {e}");
            }
        }
        seeded
    }

    fn seed_records(&self, raw: &str) -> usize {
        let Ok(records) = serde_json::from_str::<Vec<BenchmarkRecord>>(raw) else {
            log::warn!("Dropping unparseable benchmark results file");
            return 0;
        };
        let mut count = 0;
        for record in records {
            let runs = record.runs.unwrap_or(1).max(1);
            let obs = ExecutionObservation {
                model_id: record.model_id,
                success: record.success_rate.unwrap_or(1.0) >= 0.5,
                quality: record.quality.unwrap_or(0.5),
                response_time_ms: record.response_time_ms.unwrap_or(1_000),
                prompt_tokens: 0,
                completion_tokens: 0,
                complexity: record.complexity.unwrap_or(0.5),
            };
            let mut inner = self.inner.lock().expect("perf store lock");
            for _ in 0..runs.min(10) {
                match inner.get_mut(&obs.model_id) {
                    Some(stats) => stats.absorb(&obs),
                    None => {
                        inner.insert(obs.model_id.clone(), ModelStats::from_observation(&obs));
                    }
                }
            }
            count += 1;
        }
        count
    }

    /// Rewrite the backing file atomically.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let snapshot = self.inner.lock().expect("perf store lock").clone();
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| PerfError::Persist(format!("serialize store: {e}")))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct BenchmarkRecord {
    model_id: String,
    #[serde(default)]
    success_rate: Option<f64>,
    #[serde(default)]
    quality: Option<f64>,
    #[serde(default)]
    response_time_ms: Option<u64>,
    #[serde(default)]
    complexity: Option<f64>,
    #[serde(default)]
    runs: Option<u64>,
}

/// Parse the DB file entry by entry so one corrupted record drops alone.
fn load_entries(path: &Path) -> Result<BTreeMap<String, ModelStats>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let raw = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| PerfError::Persist(format!("parse {}: {e}", path.display())))?;
    let Some(map) = value.as_object() else {
        return Err(PerfError::Persist(format!(
            "{} is not a JSON object",
            path.display()
        )));
    };

    let mut entries = BTreeMap::new();
    for (id, raw_stats) in map {
        match serde_json::from_value::<ModelStats>(raw_stats.clone()) {
            Ok(stats) => {
                entries.insert(id.clone(), stats);
            }
            Err(e) => log::warn!("Dropping corrupted stats entry for {id}: {e}"),
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn obs(model_id: &str, success: bool, quality: f64, complexity: f64) -> ExecutionObservation {
        ExecutionObservation {
            model_id: model_id.to_string(),
            success,
            quality,
            response_time_ms: 800,
            prompt_tokens: 100,
            completion_tokens: 50,
            complexity,
        }
    }

    #[test]
    fn first_observation_bootstraps_emas() {
        let store = PerfStore::in_memory();
        store.record(&obs("remote:gpt", true, 0.9, 0.6));

        let stats = store.stats("remote:gpt").unwrap();
        assert_eq!(stats.success_rate, 1.0);
        assert_eq!(stats.quality_score, 0.9);
        assert_eq!(stats.samples, 1);
        assert_eq!(stats.complexity_fit, Some(0.6));
    }

    #[test]
    fn ema_moves_toward_new_observations() {
        let store = PerfStore::in_memory();
        store.record(&obs("m", true, 1.0, 0.5));
        store.record(&obs("m", false, 0.0, 0.5));

        let stats = store.stats("m").unwrap();
        // 0.3 * 0.0 + 0.7 * 1.0
        assert!((stats.success_rate - 0.7).abs() < 1e-9);
        assert!((stats.quality_score - 0.7).abs() < 1e-9);
        assert_eq!(stats.samples, 2);
    }

    #[test]
    fn low_quality_does_not_update_fit() {
        let store = PerfStore::in_memory();
        store.record(&obs("m", true, 0.5, 0.9));
        assert_eq!(store.stats("m").unwrap().complexity_fit, None);

        store.record(&obs("m", true, 0.8, 0.3));
        assert_eq!(store.stats("m").unwrap().complexity_fit, Some(0.3));
    }

    #[test]
    fn fit_is_running_mean() {
        let store = PerfStore::in_memory();
        store.record(&obs("m", true, 0.9, 0.4));
        store.record(&obs("m", true, 0.9, 0.8));
        let fit = store.stats("m").unwrap().complexity_fit.unwrap();
        assert!((fit - 0.6).abs() < 1e-9);
    }

    #[test]
    fn analyze_filters_by_fit_window() {
        let store = PerfStore::in_memory();
        store.record(&obs("in-window", true, 0.9, 0.6));
        store.record(&obs("outside", true, 0.9, 0.1));

        let analysis = store.analyze_by_complexity(0.5, 0.7);
        assert_eq!(analysis.top_performers, vec!["in-window".to_string()]);
        assert!((analysis.avg_quality - 0.9).abs() < 1e-9);
    }

    #[test]
    fn analyze_top_quartile_is_deterministic() {
        let store = PerfStore::in_memory();
        for id in ["a", "b", "c", "d"] {
            store.record(&obs(id, true, 0.9, 0.5));
        }
        let analysis = store.analyze_by_complexity(0.0, 1.0);
        // Four models with equal quality: quartile of one, id tie-break.
        assert_eq!(analysis.top_performers, vec!["a".to_string()]);
    }

    #[test]
    fn persistence_round_trip_drops_corrupted_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models-db.json");

        {
            let store = PerfStore::open(path.clone());
            store.record(&obs("keep", true, 0.9, 0.5));
        }

        // Corrupt one entry by hand; the other must survive the reload.
        let mut value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        value["broken"] = serde_json::json!({"success_rate": "not-a-number"});
        std::fs::write(&path, serde_json::to_string(&value).unwrap()).unwrap();

        let reloaded = PerfStore::open(path);
        assert!(reloaded.stats("keep").is_some());
        assert!(reloaded.stats("broken").is_none());
    }

    #[test]
    fn seeds_from_benchmark_files_only_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("comprehensive-results-2024.json"),
            r#"[{"model_id": "openrouter:free-7b", "quality": 0.8, "runs": 3}]"#,
        )
        .unwrap();

        let store = PerfStore::in_memory();
        assert_eq!(store.seed_from_benchmarks(dir.path()), 1);
        assert!(store.stats("openrouter:free-7b").is_some());

        // A populated store refuses to seed again.
        assert_eq!(store.seed_from_benchmarks(dir.path()), 0);
    }
}
