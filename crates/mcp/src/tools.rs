//! MCP tools: route_task, preemptive_route_task, get_cost_estimate,
//! cancel_job, get_free_models, benchmark_free_models.
//!
//! Every tool returns either a JSON result payload or a structured
//! `ErrorEnvelope`; no stack traces cross the surface.

use crate::schemas::*;
use crate::service::CostwiseService;
use costwise_backends::{estimate_costs, ChatMessage, ChatRequest};
use costwise_perf::ExecutionObservation;
use costwise_planner::plan;
use costwise_protocol::job::unix_now;
use costwise_protocol::task::COMPLEXITY_CEILING;
use costwise_protocol::{
    DecomposedTask, ErrorEnvelope, ErrorKind, ModelId, ModelInfo, Provider, SizeCategory,
};
use costwise_router::RoutePriority;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content};
use rmcp::{tool, tool_router, ErrorData as McpError};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

fn ok_json<T: Serialize>(value: &T) -> CallToolResult {
    CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(value).unwrap_or_default(),
    )])
}

fn err_json(envelope: &ErrorEnvelope) -> CallToolResult {
    CallToolResult::error(vec![Content::text(
        serde_json::to_string_pretty(envelope).unwrap_or_default(),
    )])
}

struct ValidatedRoute {
    task: String,
    context_length: u64,
    expected_output: u64,
    complexity: Option<f64>,
    priority: RoutePriority,
    preemptive: bool,
}

fn validate_route(request: &RouteTaskRequest) -> Result<ValidatedRoute, ErrorEnvelope> {
    let task = request.task.trim().to_string();
    if task.is_empty() {
        return Err(ErrorEnvelope::input_invalid(
            "task",
            "task must be a non-empty string",
        ));
    }
    if request.context_length == 0 {
        return Err(ErrorEnvelope::input_invalid(
            "context_length",
            "context_length must be a positive token count",
        ));
    }
    if let Some(c) = request.complexity {
        if !(0.0..=1.0).contains(&c) {
            return Err(ErrorEnvelope::input_invalid(
                "complexity",
                "complexity must lie in [0, 1]",
            ));
        }
    }
    let priority = match request.priority.as_deref() {
        None => RoutePriority::Cost,
        Some(raw) => RoutePriority::parse(raw).ok_or_else(|| {
            ErrorEnvelope::input_invalid(
                "priority",
                format!("unknown priority {raw:?}, expected speed, cost, quality or efficiency"),
            )
        })?,
    };

    Ok(ValidatedRoute {
        task,
        context_length: request.context_length,
        expected_output: request.expected_output_length.unwrap_or(1_000),
        complexity: request.complexity,
        priority,
        preemptive: request.preemptive.unwrap_or(false),
    })
}

impl CostwiseService {
    /// Remote operations without a configured aggregator key fail the
    /// precondition; they are never retried.
    fn require_aggregator_key(&self) -> Result<(), ErrorEnvelope> {
        if self.state().config.openrouter_api_key.is_none() {
            return Err(ErrorEnvelope::new(
                ErrorKind::PreconditionFailed,
                "remote operation requires a configured aggregator API key",
            )
            .with_hint("set OPENROUTER_API_KEY"));
        }
        Ok(())
    }

    /// The shared routing pipeline: cache lookup, decomposition, planning,
    /// scoring, assignment, then (unless preemptive) execution.
    async fn route(&self, route: ValidatedRoute) -> Result<RouteTaskResult, ErrorEnvelope> {
        let state = self.state();

        // Registry refresh comes first, even when the cache ends up
        // answering: provider data must not go stale behind a streak of
        // index hits.
        let models = state.registry.available_models().await;

        // A high-confidence index hit short-circuits the rest.
        if let Some((hit, confidence)) = state.code_index.cache_hit(&route.task).await {
            if confidence > state.config.cache_hit_threshold {
                log::info!(
                    "Cache hit for task ({}, confidence {confidence:.2})",
                    hit.path
                );
                return Ok(RouteTaskResult {
                    job_id: None,
                    model: "retriv".to_string(),
                    provider: "local-cache".to_string(),
                    reason: format!(
                        "code index hit on {} with confidence {confidence:.2}",
                        hit.path
                    ),
                    estimated_cost: 0.0,
                    result_code: Some(hit.content),
                });
            }
        }

        // Candidates must cover the caller's declared context.
        let viable: Vec<ModelInfo> = models
            .into_iter()
            .filter(|m| m.context_window as u64 >= route.context_length)
            .collect();
        if viable.is_empty() {
            return Err(ErrorEnvelope::new(
                ErrorKind::NoSuitableModel,
                format!(
                    "no model has a context window covering {} tokens",
                    route.context_length
                ),
            ));
        }

        let mut decomposed = state.decomposer.decompose(&route.task);
        if decomposed.subtasks.is_empty() {
            return Err(ErrorEnvelope::input_invalid(
                "task",
                "task decomposed into no subtasks",
            ));
        }
        if let Some(complexity) = route.complexity {
            apply_complexity_override(&mut decomposed, complexity);
        }
        plan(&mut decomposed).map_err(|e| ErrorEnvelope::internal(e.to_string()))?;

        let assignments = state
            .balancer
            .assign(
                &decomposed,
                &viable,
                &state.perf,
                route.priority,
                route.priority == RoutePriority::Efficiency,
            )
            .map_err(|e| e.to_envelope())?;

        let primary_id = decomposed
            .execution_order
            .first()
            .cloned()
            .ok_or_else(|| ErrorEnvelope::internal("planner produced an empty order"))?;
        let primary = assignments[&primary_id].clone();

        let estimated_cost = estimate_route_cost(
            &decomposed,
            &assignments,
            route.context_length,
            route.expected_output,
        );

        if route.preemptive {
            return Ok(RouteTaskResult {
                job_id: None,
                model: primary.model.id.id.clone(),
                provider: primary.model.id.provider.as_str().to_string(),
                reason: primary.reason,
                estimated_cost,
                result_code: None,
            });
        }

        let job = state
            .tracker
            .create(&route.task, Some(primary.model.id.to_string()));
        let outcome = state
            .executor
            .execute(&job.id, &decomposed, &assignments, &viable)
            .await
            .map_err(|e| e.to_envelope())?;

        Ok(RouteTaskResult {
            job_id: Some(job.id),
            model: primary.model.id.id.clone(),
            provider: primary.model.id.provider.as_str().to_string(),
            reason: primary.reason,
            estimated_cost,
            result_code: Some(outcome.synthesized),
        })
    }
}

/// The caller's complexity hint overrides the heuristic, still subject to
/// the routing ceiling.
fn apply_complexity_override(task: &mut DecomposedTask, complexity: f64) {
    for subtask in &mut task.subtasks {
        subtask.recommended_size = SizeCategory::for_complexity(complexity);
        subtask.complexity = complexity.min(COMPLEXITY_CEILING);
    }
}

fn estimate_route_cost(
    task: &DecomposedTask,
    assignments: &std::collections::BTreeMap<String, costwise_router::Assignment>,
    context_length: u64,
    expected_output: u64,
) -> f64 {
    let n = task.subtasks.len().max(1) as u64;
    task.subtasks
        .iter()
        .filter_map(|s| assignments.get(&s.id).map(|a| (s, a)))
        .map(|(s, a)| {
            a.model
                .estimate_cost(s.estimated_tokens + context_length / n, expected_output / n)
        })
        .sum()
}

#[tool_router(vis = "pub")]
impl CostwiseService {
    /// Route and execute a coding task
    #[tool(
        description = "Route a coding task to the best model backend (local, free remote or paid remote), execute it, and return the synthesized code. Consults the code index first; a high-confidence hit returns cached content at zero cost."
    )]
    pub async fn route_task(
        &self,
        Parameters(request): Parameters<RouteTaskRequest>,
    ) -> Result<CallToolResult, McpError> {
        let route = match validate_route(&request) {
            Ok(route) => route,
            Err(envelope) => return Ok(err_json(&envelope)),
        };
        match self.route(route).await {
            Ok(result) => Ok(ok_json(&result)),
            Err(envelope) => Ok(err_json(&envelope)),
        }
    }

    /// Decide routing without executing
    #[tool(
        description = "Decide which model would execute a task without creating a job or calling any backend. Returns the chosen model, provider and reasoning."
    )]
    pub async fn preemptive_route_task(
        &self,
        Parameters(request): Parameters<RouteTaskRequest>,
    ) -> Result<CallToolResult, McpError> {
        let route = match validate_route(&request) {
            Ok(mut route) => {
                route.preemptive = true;
                route
            }
            Err(envelope) => return Ok(err_json(&envelope)),
        };
        match self.route(route).await {
            Ok(result) => Ok(ok_json(&result)),
            Err(envelope) => Ok(err_json(&envelope)),
        }
    }

    /// Per-provider cost breakdown
    #[tool(
        description = "Estimate what each known model would charge for a prompt of the given context length and expected output length. Sorted cheapest first."
    )]
    pub async fn get_cost_estimate(
        &self,
        Parameters(request): Parameters<CostEstimateRequest>,
    ) -> Result<CallToolResult, McpError> {
        if request.context_length == 0 {
            return Ok(err_json(&ErrorEnvelope::input_invalid(
                "context_length",
                "context_length must be a positive token count",
            )));
        }
        let expected_output = request.expected_output_length.unwrap_or(1_000);

        let mut models = self.state().registry.available_models().await;
        if let Some(filter) = request.model.as_deref() {
            // An estimate scoped to an aggregator model is a remote
            // operation.
            if let Ok(id) = ModelId::parse(filter) {
                if id.provider == Provider::RemoteAggregator {
                    if let Err(envelope) = self.require_aggregator_key() {
                        return Ok(err_json(&envelope));
                    }
                }
            }
            models.retain(|m| m.id.id == filter || m.id.to_string() == filter);
            if models.is_empty() {
                return Ok(err_json(&ErrorEnvelope::not_found(format!(
                    "model {filter} is not known to the registry"
                ))));
            }
        }

        let estimates = estimate_costs(&models, request.context_length, expected_output)
            .into_iter()
            .map(|e| serde_json::to_value(e).unwrap_or_default())
            .collect();
        Ok(ok_json(&CostEstimateResult {
            context_length: request.context_length,
            expected_output_length: expected_output,
            estimates,
        }))
    }

    /// Cancel a tracked job
    #[tool(
        description = "Cancel a running or queued job. Cancelling a finished job fails the precondition; cancellation is cooperative and stops execution at the next subtask boundary."
    )]
    pub async fn cancel_job(
        &self,
        Parameters(request): Parameters<CancelJobRequest>,
    ) -> Result<CallToolResult, McpError> {
        if request.job_id.trim().is_empty() {
            return Ok(err_json(&ErrorEnvelope::input_invalid(
                "job_id",
                "job_id must be a non-empty string",
            )));
        }

        match self.state().tracker.cancel(&request.job_id) {
            Ok(job) => Ok(ok_json(&CancelJobResult {
                success: true,
                status: job.status.as_str().to_string(),
                message: format!("job {} cancelled", job.id),
            })),
            Err(e) => Ok(err_json(&e.to_envelope())),
        }
    }

    /// List zero-cost models
    #[tool(
        description = "List every model whose input and output token costs are both zero, with capability flags. Pass preemptive=true to force a registry refresh."
    )]
    pub async fn get_free_models(
        &self,
        Parameters(request): Parameters<FreeModelsRequest>,
    ) -> Result<CallToolResult, McpError> {
        let force = request.preemptive.unwrap_or(false);
        // Forcing a refresh reaches out to the aggregator.
        if force {
            if let Err(envelope) = self.require_aggregator_key() {
                return Ok(err_json(&envelope));
            }
        }
        let models = self.state().registry.free_models(force).await;

        let entries: Vec<FreeModelEntry> = models
            .iter()
            .map(|m| FreeModelEntry {
                id: m.id.id.clone(),
                provider: m.id.provider.as_str().to_string(),
                display_name: m.display_name.clone(),
                context_window: m.context_window,
                chat: m.capabilities.chat,
                completion: m.capabilities.completion,
            })
            .collect();
        Ok(ok_json(&FreeModelsResult {
            count: entries.len(),
            models: entries,
        }))
    }

    /// Benchmark free models against supplied tasks
    #[tool(
        description = "Run the supplied tasks against every free model, record the observations in the performance store, and persist a benchmark summary for future boots."
    )]
    pub async fn benchmark_free_models(
        &self,
        Parameters(request): Parameters<BenchmarkRequest>,
    ) -> Result<CallToolResult, McpError> {
        if request.tasks.is_empty() {
            return Ok(err_json(&ErrorEnvelope::input_invalid(
                "tasks",
                "tasks must contain at least one entry",
            )));
        }

        let result = self.run_benchmark(&request).await;
        Ok(ok_json(&result))
    }
}

impl CostwiseService {
    async fn run_benchmark(&self, request: &BenchmarkRequest) -> BenchmarkResult {
        let state = self.state();
        let free = state.registry.free_models(false).await;
        let runs_per_task = request.runs_per_task.unwrap_or(1).max(1);
        let concurrency = if request.parallel.unwrap_or(false) {
            request.max_parallel_tasks.unwrap_or(2).max(1)
        } else {
            1
        };

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut join_set: JoinSet<(String, bool, u64)> = JoinSet::new();

        for model in &free {
            let Some(backend) = state.backends.get(&model.id.provider) else {
                log::debug!("Skipping {}: no backend wired", model.id);
                continue;
            };
            for spec in &request.tasks {
                for _ in 0..runs_per_task {
                    let backend = backend.clone();
                    let semaphore = semaphore.clone();
                    let model_key = model.id.to_string();
                    let model_name = model.id.id.clone();
                    let task_text = spec.task.clone();

                    join_set.spawn(async move {
                        let _permit = semaphore.acquire_owned().await;
                        let request = ChatRequest {
                            model: model_name,
                            messages: vec![ChatMessage::user(task_text)],
                            temperature: Some(0.2),
                            max_tokens: Some(1_024),
                        };
                        match backend.chat(request).await {
                            Ok(outcome) => (model_key, true, outcome.response_time_ms.max(1)),
                            Err(e) => {
                                log::debug!("Benchmark call failed: {e}");
                                (model_key, false, 0)
                            }
                        }
                    });
                }
            }
        }

        let mut per_model: std::collections::BTreeMap<String, (u32, u32, u64)> =
            std::collections::BTreeMap::new();
        while let Some(joined) = join_set.join_next().await {
            let Ok((model, success, elapsed_ms)) = joined else {
                continue;
            };
            let entry = per_model.entry(model.clone()).or_insert((0, 0, 0));
            entry.0 += 1;
            if success {
                entry.1 += 1;
                entry.2 += elapsed_ms;
            }
            state.perf.record(&ExecutionObservation {
                model_id: model,
                success,
                quality: if success { 0.7 } else { 0.0 },
                response_time_ms: elapsed_ms.max(1),
                prompt_tokens: 0,
                completion_tokens: 0,
                complexity: 0.5,
            });
        }

        let summaries: Vec<BenchmarkSummary> = per_model
            .iter()
            .map(|(model, (runs, successes, total_ms))| BenchmarkSummary {
                model: model.clone(),
                runs: *runs,
                successes: *successes,
                avg_response_ms: if *successes > 0 {
                    total_ms / *successes as u64
                } else {
                    0
                },
            })
            .collect();

        let results_file = self.persist_benchmark(&summaries);
        BenchmarkResult {
            models_tested: per_model.len(),
            summaries,
            results_file,
        }
    }

    /// Write records in the shape the performance store seeds from.
    fn persist_benchmark(&self, summaries: &[BenchmarkSummary]) -> Option<String> {
        if summaries.is_empty() {
            return None;
        }
        let dir = self.state().config.benchmark_results_dir();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            log::warn!("Cannot create {}: {e}", dir.display());
            return None;
        }
        let path = dir.join(format!("comprehensive-results-{}.json", unix_now()));

        let records: Vec<serde_json::Value> = summaries
            .iter()
            .map(|s| {
                serde_json::json!({
                    "model_id": s.model,
                    "success_rate": if s.runs > 0 { s.successes as f64 / s.runs as f64 } else { 0.0 },
                    "quality": 0.7,
                    "response_time_ms": s.avg_response_ms,
                    "complexity": 0.5,
                    "runs": s.runs,
                })
            })
            .collect();

        match serde_json::to_string_pretty(&records) {
            Ok(json) => match std::fs::write(&path, json) {
                Ok(()) => Some(path.display().to_string()),
                Err(e) => {
                    log::warn!("Cannot write {}: {e}", path.display());
                    None
                }
            },
            Err(_) => None,
        }
    }
}
