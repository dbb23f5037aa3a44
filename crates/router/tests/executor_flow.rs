//! End-to-end executor flows over a scripted in-process backend.

use async_trait::async_trait;
use costwise_backends::{BackendError, ChatBackend, ChatOutcome, ChatRequest};
use costwise_perf::PerfStore;
use costwise_planner::{plan, TaskDecomposer};
use costwise_protocol::{
    Granularity, JobStatus, ModelCapabilities, ModelId, ModelInfo, Provider,
};
use costwise_router::{
    EventBus, Executor, JobTracker, LoadBalancer, LoadTracker, RoutePriority, RouterError,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

struct ScriptedBackend {
    provider: Provider,
    fail_marker: Option<String>,
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome, BackendError> {
        let prompt = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        if let Some(marker) = &self.fail_marker {
            if prompt.contains(marker.as_str()) {
                return Err(BackendError::permanent(Some(400), "scripted failure"));
            }
        }

        Ok(ChatOutcome {
            content: format!("```\n// generated by {}\n```", request.model),
            prompt_tokens: 100,
            completion_tokens: 40,
            response_time_ms: 5,
        })
    }
}

fn local_model(id: &str) -> ModelInfo {
    ModelInfo {
        id: ModelId::new(Provider::LocalStudio, id),
        display_name: id.to_string(),
        context_window: 8_192,
        cost_per_input_token: 0.0,
        cost_per_output_token: 0.0,
        capabilities: ModelCapabilities::default(),
    }
}

struct Harness {
    tracker: Arc<JobTracker>,
    perf: Arc<PerfStore>,
    executor: Executor,
    balancer: LoadBalancer,
    models: Vec<ModelInfo>,
}

fn harness(fail_marker: Option<&str>) -> Harness {
    let tracker = Arc::new(JobTracker::new(EventBus::new(64), Duration::from_secs(3600)));
    let perf = Arc::new(PerfStore::in_memory());
    let load = Arc::new(LoadTracker::new());
    let scoring = Arc::new(costwise_scoring::ScoringEngine::with_seed(9));
    let models = vec![local_model("phi3-mini")];

    let mut backends: HashMap<Provider, Arc<dyn ChatBackend>> = HashMap::new();
    backends.insert(
        Provider::LocalStudio,
        Arc::new(ScriptedBackend {
            provider: Provider::LocalStudio,
            fail_marker: fail_marker.map(str::to_string),
        }),
    );

    let executor = Executor::new(
        backends,
        None,
        tracker.clone(),
        perf.clone(),
        load.clone(),
        4,
        5,
        Duration::from_secs(30),
        ModelId::new(Provider::LocalStudio, "phi3-mini"),
    );
    let balancer = LoadBalancer::new(scoring, load, 3.0);

    Harness {
        tracker,
        perf,
        executor,
        balancer,
        models,
    }
}

fn planned_task(text: &str) -> costwise_protocol::DecomposedTask {
    let mut task = TaskDecomposer::new(Granularity::Medium).decompose(text);
    plan(&mut task).unwrap();
    task
}

#[tokio::test]
async fn completes_job_and_records_stats() {
    let h = harness(None);
    let task = planned_task("write the parser. then wire the parser into the module");
    let assignments = h
        .balancer
        .assign(&task, &h.models, &h.perf, RoutePriority::Cost, false)
        .unwrap();

    let job = h.tracker.create(&task.task, None);
    let outcome = h
        .executor
        .execute(&job.id, &task, &assignments, &h.models)
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), task.subtasks.len());
    assert!(!outcome.synthesized.is_empty());

    let tracked = h.tracker.get(&job.id).unwrap();
    assert_eq!(tracked.status, JobStatus::Completed);
    assert_eq!(tracked.progress, 100);
    assert!(tracked.results.is_some());

    // The perf store saw every execution.
    let stats = h.perf.stats("lm-studio:phi3-mini").unwrap();
    assert_eq!(stats.samples as usize, task.subtasks.len());
    assert!(stats.success_rate > 0.9);
}

#[tokio::test]
async fn failed_dependency_fails_the_job() {
    let h = harness(Some("Your subtask: wire the parser"));
    // subtask-2 depends on subtask-1 through the sequence marker; fail the
    // producer and the dependent must take the job down.
    let task = planned_task("wire the parser. then test the result of step 1");
    assert!(task.subtask("subtask-2").unwrap().dependencies.contains("subtask-1"));

    let assignments = h
        .balancer
        .assign(&task, &h.models, &h.perf, RoutePriority::Cost, false)
        .unwrap();
    let job = h.tracker.create(&task.task, None);

    let err = h
        .executor
        .execute(&job.id, &task, &assignments, &h.models)
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::JobFailed(_)));
    assert_eq!(h.tracker.get(&job.id).unwrap().status, JobStatus::Failed);
}

#[tokio::test]
async fn independent_failure_completes_with_error_recorded() {
    let h = harness(Some("Your subtask: emit the report"));
    let task = planned_task("build the widget. emit the report");
    // No dependency between the two subtasks.
    assert!(task.subtasks.iter().all(|s| s.dependencies.is_empty()));

    let assignments = h
        .balancer
        .assign(&task, &h.models, &h.perf, RoutePriority::Cost, false)
        .unwrap();
    let job = h.tracker.create(&task.task, None);

    // No synthesis candidates: the framed document comes back as-is, with
    // the failure annotated inline.
    let outcome = h
        .executor
        .execute(&job.id, &task, &assignments, &[])
        .await
        .unwrap();

    assert_eq!(h.tracker.get(&job.id).unwrap().status, JobStatus::Completed);
    let failed: Vec<_> = outcome
        .results
        .values()
        .filter(|o| o.error.is_some())
        .collect();
    assert_eq!(failed.len(), 1);
    assert!(outcome.synthesized.contains("[failed:"));
}

#[tokio::test]
async fn cancelled_job_stops_at_the_next_boundary() {
    let h = harness(None);
    let task = planned_task("write the codec");
    let assignments = h
        .balancer
        .assign(&task, &h.models, &h.perf, RoutePriority::Cost, false)
        .unwrap();

    let job = h.tracker.create(&task.task, None);
    h.tracker.cancel(&job.id).unwrap();

    let err = h
        .executor
        .execute(&job.id, &task, &assignments, &h.models)
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::Cancelled));
    assert_eq!(h.tracker.get(&job.id).unwrap().status, JobStatus::Cancelled);

    // No further events for a cancelled job.
    let mut rx = h.tracker.bus().subscribe();
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn load_cap_spreads_six_subtasks_over_two_models() {
    use costwise_protocol::{CodeType, DecomposedTask, SizeCategory, Subtask};
    use std::collections::BTreeSet;

    let load = Arc::new(LoadTracker::new());
    let balancer = LoadBalancer::new(
        Arc::new(costwise_scoring::ScoringEngine::with_seed(21)),
        load,
        3.0,
    );

    let subtasks: Vec<Subtask> = (1..=6)
        .map(|i| Subtask {
            id: format!("subtask-{i}"),
            description: format!("independent work item {i}"),
            estimated_tokens: 200,
            complexity: 0.5,
            recommended_size: SizeCategory::Medium,
            code_type: CodeType::Function,
            dependencies: BTreeSet::new(),
            notes: Vec::new(),
        })
        .collect();
    let task = DecomposedTask::new("six independent items", subtasks);

    let models = vec![
        ModelInfo {
            id: ModelId::new(Provider::RemoteAggregator, "aaa-7b"),
            display_name: "aaa-7b".into(),
            context_window: 8_192,
            cost_per_input_token: 0.0,
            cost_per_output_token: 0.0,
            capabilities: ModelCapabilities::default(),
        },
        ModelInfo {
            id: ModelId::new(Provider::RemoteAggregator, "bbb-7b"),
            display_name: "bbb-7b".into(),
            context_window: 8_192,
            cost_per_input_token: 0.0,
            cost_per_output_token: 0.0,
            capabilities: ModelCapabilities::default(),
        },
    ];
    let perf = PerfStore::in_memory();

    let assignments = balancer
        .assign(&task, &models, &perf, RoutePriority::Cost, false)
        .unwrap();
    assert_eq!(assignments.len(), 6);

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for assignment in assignments.values() {
        *counts.entry(assignment.model.id.id.as_str()).or_insert(0) += 1;
    }
    // The effective-load threshold of 3 forces a spill to the alternative
    // once the favorite saturates; neither model takes more than four.
    assert_eq!(counts.len(), 2, "both models must receive work: {counts:?}");
    assert!(counts.values().all(|&n| n <= 4), "cap exceeded: {counts:?}");
}

#[tokio::test]
async fn successful_job_outputs_are_cached_for_retrieval() {
    use costwise_code_index::CodeIndex;

    let tracker = Arc::new(JobTracker::new(EventBus::new(64), Duration::from_secs(3600)));
    let perf = Arc::new(PerfStore::in_memory());
    let load = Arc::new(LoadTracker::new());
    let index = Arc::new(CodeIndex::in_memory(1.5, 0.75, 400));
    let models = vec![local_model("phi3-mini")];

    let mut backends: HashMap<Provider, Arc<dyn ChatBackend>> = HashMap::new();
    backends.insert(
        Provider::LocalStudio,
        Arc::new(ScriptedBackend {
            provider: Provider::LocalStudio,
            fail_marker: None,
        }),
    );
    let executor = Executor::new(
        backends,
        Some(index.clone()),
        tracker.clone(),
        perf.clone(),
        load.clone(),
        4,
        5,
        Duration::from_secs(30),
        ModelId::new(Provider::LocalStudio, "phi3-mini"),
    );
    let balancer = LoadBalancer::new(
        Arc::new(costwise_scoring::ScoringEngine::with_seed(9)),
        load,
        3.0,
    );

    let task = planned_task("write a quicksort helper");
    let assignments = balancer
        .assign(&task, &models, &perf, RoutePriority::Cost, false)
        .unwrap();
    let job = tracker.create(&task.task, None);
    executor
        .execute(&job.id, &task, &assignments, &models)
        .await
        .unwrap();

    // The job's output landed in the retrieval cache under the job path.
    assert_eq!(index.document_count().await, 1);
    let (hit, confidence) = index.cache_hit("quicksort helper").await.unwrap();
    assert_eq!(hit.path, format!("results/{}", job.id));
    assert!(confidence > 0.8);
}

#[tokio::test]
async fn single_subtask_answer_is_passed_through() {
    let h = harness(None);
    let task = planned_task("write factorial in python");
    assert_eq!(task.subtasks.len(), 1);

    let assignments = h
        .balancer
        .assign(&task, &h.models, &h.perf, RoutePriority::Cost, false)
        .unwrap();
    let job = h.tracker.create(&task.task, None);
    let outcome = h
        .executor
        .execute(&job.id, &task, &assignments, &h.models)
        .await
        .unwrap();

    // One subtask: its output is the answer, no synthesis call needed.
    assert!(outcome.synthesized.contains("generated by phi3-mini"));
    assert!(outcome.synthesis_model.is_none());
}
