//! Per-model live load: active assignment counts, estimated completion
//! timestamps, and a processing-power EMA derived from response times.
//! Effective load (active / power) drives alternative search and
//! backpressure.

use costwise_protocol::job::unix_now;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

const POWER_ALPHA: f64 = 0.3;

#[derive(Debug, Clone, Serialize)]
pub struct ModelLoad {
    pub active: usize,
    /// Unix seconds at which outstanding assignments should finish.
    pub completions: Vec<u64>,
    /// Throughput estimate; 1.0 is the neutral baseline.
    pub processing_power: f64,
}

impl Default for ModelLoad {
    fn default() -> Self {
        Self {
            active: 0,
            completions: Vec::new(),
            processing_power: 1.0,
        }
    }
}

impl ModelLoad {
    fn effective_load(&self) -> f64 {
        self.active as f64 / self.processing_power.max(0.1)
    }

    /// Retire completion estimates now in the past, releasing their
    /// active slots.
    fn retire(&mut self, now: u64) {
        let before = self.completions.len();
        self.completions.retain(|&t| t > now);
        let retired = before - self.completions.len();
        self.active = self.active.saturating_sub(retired);
    }
}

#[derive(Default)]
pub struct LoadTracker {
    inner: Mutex<HashMap<String, ModelLoad>>,
}

impl LoadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an assignment expected to finish in `estimated_secs`.
    pub fn assign(&self, model_id: &str, estimated_secs: u64) {
        let now = unix_now();
        let mut inner = self.inner.lock().expect("load tracker lock");
        let load = inner.entry(model_id.to_string()).or_default();
        load.retire(now);
        load.active += 1;
        load.completions.push(now + estimated_secs.max(1));
    }

    /// Record a finished call and fold its response time into the power
    /// estimate.
    pub fn complete(&self, model_id: &str, response_time_ms: u64) {
        let now = unix_now();
        let mut inner = self.inner.lock().expect("load tracker lock");
        let load = inner.entry(model_id.to_string()).or_default();
        load.active = load.active.saturating_sub(1);
        if !load.completions.is_empty() {
            load.completions.remove(0);
        }
        load.retire(now);

        // Seconds-per-response inverted: fast responses mean more power.
        let observed = (1_000.0 / response_time_ms.max(1) as f64).clamp(0.1, 10.0);
        load.processing_power =
            POWER_ALPHA * observed + (1.0 - POWER_ALPHA) * load.processing_power;
    }

    /// Current effective load; unknown models are idle.
    pub fn effective_load(&self, model_id: &str) -> f64 {
        let now = unix_now();
        let mut inner = self.inner.lock().expect("load tracker lock");
        match inner.get_mut(model_id) {
            Some(load) => {
                load.retire(now);
                load.effective_load()
            }
            None => 0.0,
        }
    }

    pub fn snapshot(&self) -> HashMap<String, ModelLoad> {
        let now = unix_now();
        let mut inner = self.inner.lock().expect("load tracker lock");
        for load in inner.values_mut() {
            load.retire(now);
        }
        inner.clone()
    }
}
