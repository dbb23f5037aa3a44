//! `ModelCatalog` implementations backing the registry.

use crate::chat::{LmStudioBackend, OllamaBackend, OpenRouterBackend};
use crate::wire::{AggregatorModelList, LocalModelList, OllamaTagList};
use async_trait::async_trait;
use costwise_registry::{ModelCatalog, RegistryError};
use costwise_protocol::{ModelCapabilities, ModelId, ModelInfo, Provider};
use std::sync::Arc;

/// Context window assumed for local models that do not declare one.
const LOCAL_CONTEXT_WINDOW: u32 = 8_192;

fn local_model(provider: Provider, id: String) -> ModelInfo {
    ModelInfo {
        display_name: id.clone(),
        id: ModelId::new(provider, id),
        context_window: LOCAL_CONTEXT_WINDOW,
        cost_per_input_token: 0.0,
        cost_per_output_token: 0.0,
        capabilities: ModelCapabilities {
            chat: true,
            completion: true,
        },
    }
}

async fn fetch_json<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    api_key: Option<&str>,
) -> Result<T, RegistryError> {
    let mut builder = client.get(url);
    if let Some(key) = api_key {
        builder = builder.header("Authorization", format!("Bearer {key}"));
    }
    let response = builder
        .send()
        .await
        .map_err(|e| RegistryError::Fetch(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(RegistryError::Fetch(format!("{url} returned {status}")));
    }
    response
        .json()
        .await
        .map_err(|e| RegistryError::Fetch(format!("{url}: {e}")))
}

pub struct LmStudioCatalog {
    client: reqwest::Client,
    backend: Arc<LmStudioBackend>,
}

impl LmStudioCatalog {
    pub fn new(client: reqwest::Client, backend: Arc<LmStudioBackend>) -> Self {
        Self { client, backend }
    }
}

#[async_trait]
impl ModelCatalog for LmStudioCatalog {
    fn provider(&self) -> Provider {
        Provider::LocalStudio
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, RegistryError> {
        let list: LocalModelList =
            fetch_json(&self.client, &self.backend.models_url(), None).await?;
        Ok(list
            .data
            .into_iter()
            .map(|m| local_model(Provider::LocalStudio, m.id))
            .collect())
    }
}

pub struct OllamaCatalog {
    client: reqwest::Client,
    backend: Arc<OllamaBackend>,
}

impl OllamaCatalog {
    pub fn new(client: reqwest::Client, backend: Arc<OllamaBackend>) -> Self {
        Self { client, backend }
    }
}

#[async_trait]
impl ModelCatalog for OllamaCatalog {
    fn provider(&self) -> Provider {
        Provider::LocalOllama
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, RegistryError> {
        let list: OllamaTagList = fetch_json(&self.client, &self.backend.tags_url(), None).await?;
        Ok(list
            .models
            .into_iter()
            .map(|m| local_model(Provider::LocalOllama, m.name))
            .collect())
    }
}

pub struct OpenRouterCatalog {
    client: reqwest::Client,
    backend: Arc<OpenRouterBackend>,
}

impl OpenRouterCatalog {
    pub fn new(client: reqwest::Client, backend: Arc<OpenRouterBackend>) -> Self {
        Self { client, backend }
    }
}

#[async_trait]
impl ModelCatalog for OpenRouterCatalog {
    fn provider(&self) -> Provider {
        Provider::RemoteAggregator
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, RegistryError> {
        if self.backend.api_key().is_empty() {
            return Err(RegistryError::MissingApiKey);
        }
        let list: AggregatorModelList = fetch_json(
            &self.client,
            &self.backend.models_url(),
            Some(self.backend.api_key()),
        )
        .await?;

        Ok(list
            .data
            .into_iter()
            .map(|m| {
                let pricing = m.pricing.as_ref();
                ModelInfo {
                    display_name: m.name.clone().unwrap_or_else(|| m.id.clone()),
                    id: ModelId::new(Provider::RemoteAggregator, m.id),
                    context_window: m.context_length.unwrap_or(LOCAL_CONTEXT_WINDOW),
                    cost_per_input_token: pricing.map(|p| p.prompt_cost()).unwrap_or(0.0),
                    cost_per_output_token: pricing.map(|p| p.completion_cost()).unwrap_or(0.0),
                    capabilities: ModelCapabilities {
                        chat: true,
                        completion: false,
                    },
                }
            })
            .collect())
    }
}
