//! Tool input/output schemas for the MCP surface.

use rmcp::schemars;
use serde::{Deserialize, Serialize};

// ============================================================================
// route_task / preemptive_route_task
// ============================================================================

#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
pub struct RouteTaskRequest {
    /// The coding task to route
    pub task: String,

    /// Prompt context length in tokens
    pub context_length: u64,

    /// Expected output length in tokens
    pub expected_output_length: Option<u64>,

    /// Task complexity override in [0, 1]
    pub complexity: Option<f64>,

    /// Routing priority: speed, cost, quality or efficiency
    pub priority: Option<String>,

    /// Decide only; do not create a job or execute
    pub preemptive: Option<bool>,
}

#[derive(Debug, Serialize, schemars::JsonSchema)]
pub struct RouteTaskResult {
    /// Tracker id; absent for preemptive decisions and cache hits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub model: String,
    pub provider: String,
    pub reason: String,
    pub estimated_cost: f64,
    /// Synthesized output; absent for preemptive decisions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_code: Option<String>,
}

// ============================================================================
// get_cost_estimate
// ============================================================================

#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
pub struct CostEstimateRequest {
    /// Prompt context length in tokens
    pub context_length: u64,

    /// Expected output length in tokens
    pub expected_output_length: Option<u64>,

    /// Restrict the estimate to one model id
    pub model: Option<String>,
}

#[derive(Debug, Serialize, schemars::JsonSchema)]
pub struct CostEstimateResult {
    pub context_length: u64,
    pub expected_output_length: u64,
    pub estimates: Vec<serde_json::Value>,
}

// ============================================================================
// cancel_job
// ============================================================================

#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
pub struct CancelJobRequest {
    /// Job id returned by route_task
    pub job_id: String,
}

#[derive(Debug, Serialize, schemars::JsonSchema)]
pub struct CancelJobResult {
    pub success: bool,
    pub status: String,
    pub message: String,
}

// ============================================================================
// get_free_models
// ============================================================================

#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
pub struct FreeModelsRequest {
    /// Force a registry refresh before answering
    pub preemptive: Option<bool>,
}

#[derive(Debug, Serialize, schemars::JsonSchema)]
pub struct FreeModelsResult {
    pub count: usize,
    pub models: Vec<FreeModelEntry>,
}

#[derive(Debug, Serialize, schemars::JsonSchema)]
pub struct FreeModelEntry {
    pub id: String,
    pub provider: String,
    pub display_name: String,
    pub context_window: u32,
    pub chat: bool,
    pub completion: bool,
}

// ============================================================================
// benchmark_free_models
// ============================================================================

#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
pub struct BenchmarkRequest {
    /// Tasks to benchmark across every free model
    pub tasks: Vec<BenchmarkTaskSpec>,

    /// Chat calls per (model, task) pair; default 1
    pub runs_per_task: Option<u32>,

    /// Run (model, task) pairs concurrently
    pub parallel: Option<bool>,

    /// Concurrency bound when parallel; default 2
    pub max_parallel_tasks: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
pub struct BenchmarkTaskSpec {
    pub task_id: String,
    pub task: String,
    pub context_length: Option<u64>,
}

#[derive(Debug, Serialize, schemars::JsonSchema)]
pub struct BenchmarkResult {
    pub models_tested: usize,
    pub summaries: Vec<BenchmarkSummary>,
    /// File the raw records were written to, when persistence succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct BenchmarkSummary {
    pub model: String,
    pub runs: u32,
    pub successes: u32,
    pub avg_response_ms: u64,
}
