//! Drives subtasks through their assigned backends and synthesizes the
//! final document.
//!
//! Scheduling is wave-based: every subtask whose dependencies have all
//! succeeded runs in the current wave, bounded by the worker limit.
//! Dependency context flows to consumers in planner order. Cancellation is
//! cooperative at wave boundaries; the per-job deadline bounds every
//! backend call.

use crate::balance::Assignment;
use crate::error::{Result, RouterError};
use crate::jobs::JobTracker;
use crate::load::LoadTracker;
use costwise_backends::{ChatBackend, ChatMessage, ChatRequest};
use costwise_code_index::{CodeDocument, CodeIndex};
use costwise_perf::{ExecutionObservation, PerfStore};
use costwise_protocol::{DecomposedTask, JobStatus, ModelId, ModelInfo, Provider, Subtask};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Snippets pulled from the code index per subtask.
const MAX_SNIPPETS: usize = 3;

#[derive(Debug, Clone, Serialize)]
pub struct SubtaskOutcome {
    pub subtask_id: String,
    pub model_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub response_time_ms: u64,
}

impl SubtaskOutcome {
    fn succeeded(&self) -> bool {
        self.output.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub results: BTreeMap<String, SubtaskOutcome>,
    pub synthesized: String,
    /// Model used for synthesis; absent when degraded to the framed
    /// document.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthesis_model: Option<String>,
}

pub struct Executor {
    backends: HashMap<Provider, Arc<dyn ChatBackend>>,
    code_index: Option<Arc<CodeIndex>>,
    tracker: Arc<JobTracker>,
    perf: Arc<PerfStore>,
    load: Arc<LoadTracker>,
    max_workers: usize,
    /// Backpressure: concurrent calls per model; excess waits FIFO.
    per_model_cap: usize,
    job_deadline: Duration,
    default_model: ModelId,
}

impl Executor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backends: HashMap<Provider, Arc<dyn ChatBackend>>,
        code_index: Option<Arc<CodeIndex>>,
        tracker: Arc<JobTracker>,
        perf: Arc<PerfStore>,
        load: Arc<LoadTracker>,
        max_workers: usize,
        per_model_cap: usize,
        job_deadline: Duration,
        default_model: ModelId,
    ) -> Self {
        Self {
            backends,
            code_index,
            tracker,
            perf,
            load,
            max_workers: max_workers.max(1),
            per_model_cap: per_model_cap.max(1),
            job_deadline,
            default_model,
        }
    }

    /// Execute a planned task under the given assignment and synthesize.
    /// Terminal tracker state is written before returning.
    pub async fn execute(
        &self,
        job_id: &str,
        task: &DecomposedTask,
        assignments: &BTreeMap<String, Assignment>,
        synthesis_candidates: &[ModelInfo],
    ) -> Result<ExecutionOutcome> {
        let deadline = Instant::now() + self.job_deadline;
        let total = task.execution_order.len().max(1);

        // Worker bound: configured limit, capped by assigned-model spread.
        let distinct_models: HashSet<&str> = assignments
            .values()
            .map(|a| a.model.id.id.as_str())
            .collect();
        let workers = self
            .max_workers
            .min(distinct_models.len().max(1) * 3)
            .max(1);
        let semaphore = Arc::new(Semaphore::new(workers));

        // Per-model FIFO queues: a saturated model parks excess subtasks
        // without blocking other models' workers.
        let mut model_gates: HashMap<String, Arc<Semaphore>> = HashMap::new();
        for assignment in assignments.values() {
            model_gates
                .entry(assignment.model.id.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.per_model_cap)));
        }

        let mut completed: BTreeMap<String, SubtaskOutcome> = BTreeMap::new();
        let mut pending: Vec<String> = task.execution_order.clone();

        self.tracker.update_progress(job_id, 5, None).ok();

        while !pending.is_empty() {
            if let Err(e) = self.check_job_live(job_id, deadline) {
                if matches!(e, RouterError::Internal(_)) {
                    self.tracker.fail(job_id, "job deadline exceeded").ok();
                }
                return Err(e);
            }

            // A wave is every pending subtask whose dependencies are all
            // terminal; a failed dependency fails the job.
            let mut wave = Vec::new();
            for id in &pending {
                let subtask = task
                    .subtask(id)
                    .ok_or_else(|| RouterError::Internal(format!("unknown subtask {id}")))?;
                let mut ready = true;
                for dep in &subtask.dependencies {
                    match completed.get(dep) {
                        Some(outcome) if outcome.succeeded() => {}
                        Some(outcome) => {
                            let reason = format!(
                                "subtask {id} depends on failed subtask {dep}: {}",
                                outcome.error.as_deref().unwrap_or("unknown error")
                            );
                            self.tracker.fail(job_id, &reason).ok();
                            return Err(RouterError::JobFailed(reason));
                        }
                        None => {
                            ready = false;
                            break;
                        }
                    }
                }
                if ready {
                    wave.push(subtask.clone());
                }
            }

            if wave.is_empty() {
                let reason = "execution order made no progress".to_string();
                self.tracker.fail(job_id, &reason).ok();
                return Err(RouterError::Internal(reason));
            }

            let outcomes = self
                .run_wave(
                    task,
                    &wave,
                    assignments,
                    &completed,
                    deadline,
                    &semaphore,
                    &model_gates,
                )
                .await?;

            for outcome in outcomes {
                self.observe(task, &outcome);
                pending.retain(|id| *id != outcome.subtask_id);
                completed.insert(outcome.subtask_id.clone(), outcome);
            }

            let progress = 5 + ((completed.len() * 85) / total) as u8;
            let eta = estimate_eta(&completed, pending.len());
            self.tracker.update_progress(job_id, progress, eta).ok();
        }

        // Any failure with no dependents still fails softly: the job
        // completes with the error recorded in that subtask's slot.
        let synthesized = self
            .synthesize(task, &completed, synthesis_candidates, deadline)
            .await;

        // Feed successful outputs back into the retrieval cache so a
        // repeat of this task can short-circuit dispatch entirely.
        self.cache_outputs(job_id, task, &completed, &synthesized)
            .await;

        let mut results_map = BTreeMap::new();
        for (id, outcome) in &completed {
            let text = outcome
                .output
                .clone()
                .unwrap_or_else(|| format!("[failed: {}]", outcome.error.as_deref().unwrap_or("?")));
            results_map.insert(id.clone(), text);
        }
        results_map.insert("__synthesis__".to_string(), synthesized.text.clone());
        self.tracker.complete(job_id, results_map)?;

        Ok(ExecutionOutcome {
            results: completed,
            synthesized: synthesized.text,
            synthesis_model: synthesized.model,
        })
    }

    /// Store the task text plus its outputs under a per-job path. The
    /// description rides along so future queries match on intent, not just
    /// on the generated code.
    async fn cache_outputs(
        &self,
        job_id: &str,
        task: &DecomposedTask,
        completed: &BTreeMap<String, SubtaskOutcome>,
        synthesized: &Synthesis,
    ) {
        let Some(index) = &self.code_index else {
            return;
        };
        if completed.values().any(|o| !o.succeeded()) {
            return;
        }

        let document = CodeDocument::new(
            format!("results/{job_id}"),
            format!("{}\n\n{}", task.task, synthesized.text),
        );
        if let Err(e) = index.index(vec![document]).await {
            log::debug!("Skipping result caching: {e}");
        }
    }

    fn check_job_live(&self, job_id: &str, deadline: Instant) -> Result<()> {
        if let Some(job) = self.tracker.get(job_id) {
            if job.status == JobStatus::Cancelled {
                return Err(RouterError::Cancelled);
            }
        }
        if Instant::now() >= deadline {
            return Err(RouterError::Internal("job deadline exceeded".to_string()));
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_wave(
        &self,
        task: &DecomposedTask,
        wave: &[Subtask],
        assignments: &BTreeMap<String, Assignment>,
        completed: &BTreeMap<String, SubtaskOutcome>,
        deadline: Instant,
        semaphore: &Arc<Semaphore>,
        model_gates: &HashMap<String, Arc<Semaphore>>,
    ) -> Result<Vec<SubtaskOutcome>> {
        let mut join_set: JoinSet<SubtaskOutcome> = JoinSet::new();

        for subtask in wave {
            let assignment = assignments.get(&subtask.id).cloned().ok_or_else(|| {
                RouterError::Internal(format!("subtask {} has no assignment", subtask.id))
            })?;
            let backend = self.backends.get(&assignment.model.id.provider).cloned();
            let prompt = self
                .build_prompt(task, subtask, completed, &assignment.model)
                .await;
            let subtask = subtask.clone();
            let semaphore = semaphore.clone();
            let gate = model_gates.get(&assignment.model.id.to_string()).cloned();

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let _gate_permit = match gate {
                    Some(gate) => Some(gate.acquire_owned().await),
                    None => None,
                };
                run_subtask(subtask, assignment, backend, prompt, deadline).await
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => return Err(RouterError::Internal(format!("worker panicked: {e}"))),
            }
        }
        Ok(outcomes)
    }

    /// Structured prompt naming the task, listing dependency context in
    /// planner order, and embedding up to three indexed snippets.
    async fn build_prompt(
        &self,
        task: &DecomposedTask,
        subtask: &Subtask,
        completed: &BTreeMap<String, SubtaskOutcome>,
        model: &ModelInfo,
    ) -> Vec<ChatMessage> {
        let mut user = format!(
            "Overall task: {}\n\nYour subtask: {}\n",
            task.task, subtask.description
        );

        // Producers in planner order.
        let mut deps: Vec<&str> = subtask.dependencies.iter().map(String::as_str).collect();
        deps.sort_by_key(|d| {
            task.execution_order
                .iter()
                .position(|id| id == d)
                .unwrap_or(usize::MAX)
        });
        if !deps.is_empty() {
            user.push_str("\nContext from completed dependencies:\n");
            for dep in deps {
                if let Some(outcome) = completed.get(dep) {
                    if let Some(output) = &outcome.output {
                        user.push_str(&format!("--- output of {dep} ---\n{output}\n"));
                    }
                }
            }
        }

        if subtask.code_type.wants_snippets() {
            if let Some(index) = &self.code_index {
                let snippets = index.search(&subtask.description, MAX_SNIPPETS).await;
                if !snippets.is_empty() {
                    user.push_str("\nRelated code from the workspace:\n");
                    for snippet in snippets {
                        user.push_str(&format!(
                            "--- {} ---\n{}\n",
                            snippet.path,
                            clip_lines(&snippet.content, 40)
                        ));
                    }
                }
            }
        }

        user.push_str("\nRespond with the implementation only.");

        let max_user = (model.context_window as usize).saturating_mul(3);
        if user.len() > max_user {
            user.truncate(max_user);
        }

        vec![
            ChatMessage::system(
                "You are a coding assistant executing one subtask of a decomposed task. \
                 Produce only the requested artifact.",
            ),
            ChatMessage::user(user),
        ]
    }

    /// Fold one finished subtask into the perf store and the load tracker.
    fn observe(&self, task: &DecomposedTask, outcome: &SubtaskOutcome) {
        self.load
            .complete(&outcome.model_id, outcome.response_time_ms.max(1));

        let complexity = task
            .subtask(&outcome.subtask_id)
            .map(|s| s.complexity)
            .unwrap_or(0.5);
        let output_len = outcome.output.as_deref().map(str::len).unwrap_or(0);
        self.perf.record(&ExecutionObservation {
            model_id: outcome.model_id.clone(),
            success: outcome.succeeded(),
            quality: estimate_quality(outcome),
            response_time_ms: outcome.response_time_ms.max(1),
            prompt_tokens: 0,
            completion_tokens: (output_len / 4) as u64,
            complexity,
        });
    }

    /// Concatenate per-subtask outputs in planner order and ask the best
    /// covering remote model to synthesize. Degrades to the framed
    /// document with an annotation.
    async fn synthesize(
        &self,
        task: &DecomposedTask,
        completed: &BTreeMap<String, SubtaskOutcome>,
        candidates: &[ModelInfo],
        deadline: Instant,
    ) -> Synthesis {
        let framed = frame_document(task, completed);

        if completed.len() == 1 {
            // One subtask needs no synthesis pass; its output answers the
            // task directly.
            if let Some(outcome) = completed.values().next() {
                if let Some(output) = &outcome.output {
                    return Synthesis {
                        text: output.clone(),
                        model: None,
                    };
                }
            }
        }

        let framed_tokens = (framed.len() / 4) as u64;
        let Some(model) = self.pick_synthesis_model(candidates, framed_tokens) else {
            return Synthesis {
                text: format!("{framed}\n\n[synthesis skipped: no covering model]"),
                model: None,
            };
        };
        let Some(backend) = self.backends.get(&model.id.provider) else {
            return Synthesis {
                text: format!("{framed}\n\n[synthesis skipped: no backend for {}]", model.id),
                model: None,
            };
        };

        let request = ChatRequest {
            model: model.id.id.clone(),
            messages: vec![
                ChatMessage::system(
                    "Combine the subtask outputs below into one coherent final answer \
                     to the original task. Preserve all code.",
                ),
                ChatMessage::user(framed.clone()),
            ],
            temperature: Some(0.2),
            max_tokens: None,
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, backend.chat(request)).await {
            Ok(Ok(outcome)) => Synthesis {
                text: outcome.content,
                model: Some(model.id.to_string()),
            },
            Ok(Err(e)) => {
                log::warn!("Synthesis via {} failed: {e}", model.id);
                Synthesis {
                    text: format!("{framed}\n\n[synthesis unavailable: {e}]"),
                    model: None,
                }
            }
            Err(_) => Synthesis {
                text: format!("{framed}\n\n[synthesis unavailable: deadline exceeded]"),
                model: None,
            },
        }
    }

    /// Best remote model covering the framed document: free first, then
    /// the widest context window, then (provider, id). Falls back to the
    /// configured default model.
    fn pick_synthesis_model(
        &self,
        candidates: &[ModelInfo],
        framed_tokens: u64,
    ) -> Option<ModelInfo> {
        let mut remote: Vec<&ModelInfo> = candidates
            .iter()
            .filter(|m| !m.is_local() && m.context_window as u64 >= framed_tokens)
            .collect();
        remote.sort_by(|a, b| {
            b.is_free()
                .cmp(&a.is_free())
                .then_with(|| b.context_window.cmp(&a.context_window))
                .then_with(|| a.id.cmp(&b.id))
        });
        if let Some(model) = remote.first() {
            return Some((*model).clone());
        }

        candidates
            .iter()
            .find(|m| m.id == self.default_model && m.context_window as u64 >= framed_tokens)
            .cloned()
    }
}

struct Synthesis {
    text: String,
    model: Option<String>,
}

async fn run_subtask(
    subtask: Subtask,
    assignment: Assignment,
    backend: Option<Arc<dyn ChatBackend>>,
    messages: Vec<ChatMessage>,
    deadline: Instant,
) -> SubtaskOutcome {
    let model_key = assignment.model.id.to_string();
    let Some(backend) = backend else {
        return SubtaskOutcome {
            subtask_id: subtask.id,
            model_id: model_key,
            output: None,
            error: Some(format!(
                "no backend configured for provider {}",
                assignment.model.id.provider
            )),
            response_time_ms: 0,
        };
    };

    let request = ChatRequest {
        model: assignment.model.id.id.clone(),
        messages,
        temperature: Some(0.2),
        max_tokens: Some(assignment.model.context_window.min(4_096)),
    };

    let started = Instant::now();
    let remaining = deadline.saturating_duration_since(started);
    let result = tokio::time::timeout(remaining, backend.chat(request)).await;
    let elapsed = started.elapsed().as_millis() as u64;

    match result {
        Ok(Ok(outcome)) => SubtaskOutcome {
            subtask_id: subtask.id,
            model_id: model_key,
            output: Some(outcome.content),
            error: None,
            response_time_ms: outcome.response_time_ms.max(1),
        },
        Ok(Err(e)) => SubtaskOutcome {
            subtask_id: subtask.id,
            model_id: model_key,
            output: None,
            error: Some(e.to_string()),
            response_time_ms: elapsed,
        },
        Err(_) => SubtaskOutcome {
            subtask_id: subtask.id,
            model_id: model_key,
            output: None,
            error: Some("backend call exceeded the job deadline".to_string()),
            response_time_ms: elapsed,
        },
    }
}

/// Framed document: per-subtask outputs in planner order under one header.
fn frame_document(task: &DecomposedTask, completed: &BTreeMap<String, SubtaskOutcome>) -> String {
    let mut out = format!("# Task\n{}\n", task.task);
    for id in &task.execution_order {
        let Some(outcome) = completed.get(id) else {
            continue;
        };
        let description = task
            .subtask(id)
            .map(|s| s.description.as_str())
            .unwrap_or("");
        out.push_str(&format!("\n## {id}: {description}\n"));
        match (&outcome.output, &outcome.error) {
            (Some(output), _) => out.push_str(output),
            (None, Some(error)) => out.push_str(&format!("[failed: {error}]")),
            (None, None) => out.push_str("[no output]"),
        }
        out.push('\n');
    }
    out
}

/// Rough output quality: structured code rates higher than prose, absent
/// output rates zero.
fn estimate_quality(outcome: &SubtaskOutcome) -> f64 {
    let Some(output) = &outcome.output else {
        return 0.0;
    };
    if output.trim().is_empty() {
        return 0.1;
    }
    let looks_like_code = output.contains("```")
        || output.contains("fn ")
        || output.contains("def ")
        || output.contains("class ");
    if looks_like_code {
        0.8
    } else {
        0.6
    }
}

fn estimate_eta(completed: &BTreeMap<String, SubtaskOutcome>, remaining: usize) -> Option<u64> {
    if completed.is_empty() || remaining == 0 {
        return None;
    }
    let avg_ms = completed
        .values()
        .map(|o| o.response_time_ms)
        .sum::<u64>()
        / completed.len() as u64;
    Some((avg_ms * remaining as u64) / 1_000)
}

fn clip_lines(content: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = content.lines().take(max_lines).collect();
    lines.join("\n")
}
