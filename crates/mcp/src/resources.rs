//! Read-only observability resources and the MCP server handler.

use crate::service::CostwiseService;
use costwise_protocol::Provider;
use rmcp::model::{
    AnnotateAble, Implementation, ListResourcesResult, PaginatedRequestParam, RawResource,
    ReadResourceRequestParam, ReadResourceResult, Resource, ResourceContents,
    ServerCapabilities, ServerInfo,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{tool_handler, ErrorData as McpError, ServerHandler};
use serde_json::json;

const RESOURCES: &[(&str, &str)] = &[
    ("costwise://status", "Router status"),
    ("costwise://models", "Every known model"),
    ("costwise://jobs/active", "Jobs not yet terminal"),
    ("costwise://jobs/progress/{id}", "Progress of one job"),
    ("costwise://openrouter/models", "Aggregator model list"),
    ("costwise://openrouter/free-models", "Free aggregator models"),
    ("costwise://openrouter/status", "Aggregator refresh state"),
    ("costwise://openrouter/model/{id}", "One aggregator model"),
    (
        "costwise://openrouter/prompting-strategy/{id}",
        "Prompting strategy for one model",
    ),
    ("costwise://usage/{api}", "Usage statistics per backend api"),
];

#[tool_handler]
impl ServerHandler for CostwiseService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Costwise routes coding tasks to the cheapest capable model backend. \
                 Use route_task to execute, preemptive_route_task to only decide, \
                 get_cost_estimate for pricing, get_free_models for the zero-cost pool, \
                 cancel_job to stop a job, and benchmark_free_models to refresh \
                 performance data."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation::from_build_env(),
            ..Default::default()
        }
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        let resources: Vec<Resource> = RESOURCES
            .iter()
            .map(|(uri, name)| RawResource::new(*uri, name.to_string()).no_annotation())
            .collect();
        Ok(ListResourcesResult {
            resources,
            next_cursor: None,
        })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        let payload = self.resource_payload(&request.uri).await?;
        let text =
            serde_json::to_string_pretty(&payload).unwrap_or_else(|_| "{}".to_string());
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(text, request.uri)],
        })
    }
}

impl CostwiseService {
    async fn resource_payload(&self, uri: &str) -> Result<serde_json::Value, McpError> {
        let state = self.state();

        match uri {
            "costwise://status" => {
                let providers = state.registry.provider_status().await;
                Ok(json!({
                    "name": "costwise",
                    "version": env!("CARGO_PKG_VERSION"),
                    "active_jobs": state.tracker.active_jobs().len(),
                    "index_documents": state.code_index.document_count().await,
                    "index_enabled": state.code_index.is_enabled(),
                    "providers": providers,
                }))
            }
            "costwise://models" => {
                let models = state.registry.available_models().await;
                Ok(serde_json::to_value(models).unwrap_or_default())
            }
            "costwise://jobs/active" => {
                Ok(serde_json::to_value(state.tracker.active_jobs()).unwrap_or_default())
            }
            "costwise://openrouter/models" => {
                let models = self.aggregator_models().await;
                Ok(serde_json::to_value(models).unwrap_or_default())
            }
            "costwise://openrouter/free-models" => {
                let models: Vec<_> = self
                    .aggregator_models()
                    .await
                    .into_iter()
                    .filter(|m| m.is_free())
                    .collect();
                Ok(serde_json::to_value(models).unwrap_or_default())
            }
            "costwise://openrouter/status" => {
                let status = state
                    .registry
                    .provider_status()
                    .await
                    .into_iter()
                    .find(|s| s.provider == Provider::RemoteAggregator);
                match status {
                    Some(status) => Ok(serde_json::to_value(status).unwrap_or_default()),
                    None => Ok(json!({"configured": false})),
                }
            }
            _ => self.templated_resource(uri).await,
        }
    }

    async fn templated_resource(&self, uri: &str) -> Result<serde_json::Value, McpError> {
        let state = self.state();

        if let Some(id) = uri.strip_prefix("costwise://jobs/progress/") {
            return match state.tracker.get(id) {
                Some(job) => Ok(serde_json::to_value(job).unwrap_or_default()),
                None => Err(McpError::resource_not_found(
                    format!("job {id} does not exist"),
                    None,
                )),
            };
        }

        if let Some(id) = uri.strip_prefix("costwise://openrouter/model/") {
            return match state.registry.get(Provider::RemoteAggregator, id).await {
                Some(model) => Ok(serde_json::to_value(model).unwrap_or_default()),
                None => Err(McpError::resource_not_found(
                    format!("aggregator model {id} is not known"),
                    None,
                )),
            };
        }

        if let Some(id) = uri.strip_prefix("costwise://openrouter/prompting-strategy/") {
            return Ok(self.prompting_strategy(id));
        }

        if let Some(api) = uri.strip_prefix("costwise://usage/") {
            return Ok(self.usage_for(api));
        }

        Err(McpError::resource_not_found(
            format!("unknown resource uri {uri}"),
            None,
        ))
    }

    async fn aggregator_models(&self) -> Vec<costwise_protocol::ModelInfo> {
        self.state()
            .registry
            .available_models()
            .await
            .into_iter()
            .filter(|m| m.id.provider == Provider::RemoteAggregator)
            .collect()
    }

    /// Per-model strategy override from `lm-studio-strategies.json`, with
    /// a conservative default when no override exists.
    fn prompting_strategy(&self, model_id: &str) -> serde_json::Value {
        let path = self.state().config.lm_studio_strategies_path();
        if let Ok(raw) = std::fs::read_to_string(&path) {
            if let Ok(overrides) = serde_json::from_str::<serde_json::Value>(&raw) {
                if let Some(strategy) = overrides.get(model_id) {
                    return json!({ "model": model_id, "strategy": strategy });
                }
            } else {
                log::warn!("Ignoring unparseable strategies file {}", path.display());
            }
        }
        json!({
            "model": model_id,
            "strategy": {
                "temperature": 0.2,
                "max_tokens": 4096,
                "style": "code-first",
                "system_prompt": "Produce only the requested artifact.",
            },
        })
    }

    /// Usage rollup per backend api, derived from the performance store.
    fn usage_for(&self, api: &str) -> serde_json::Value {
        let prefix = format!("{api}:");
        let all = self.state().perf.all();
        let entries: Vec<_> = all
            .iter()
            .filter(|(id, _)| id.starts_with(&prefix))
            .collect();

        let samples: u64 = entries.iter().map(|(_, s)| s.samples).sum();
        let avg_response_ms = if entries.is_empty() {
            0.0
        } else {
            entries.iter().map(|(_, s)| s.avg_response_ms).sum::<f64>() / entries.len() as f64
        };
        json!({
            "api": api,
            "models_observed": entries.len(),
            "total_samples": samples,
            "avg_response_ms": avg_response_ms,
        })
    }
}
