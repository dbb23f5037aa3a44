//! # Costwise Backends
//!
//! HTTP clients for the model backends. Every provider speaks the same
//! OpenAI-compatible chat-completions contract; this crate owns the wire
//! types, the transient-retry policy (two extra attempts, exponential
//! backoff from 500 ms capped at 5 s), the `ChatBackend` capability the
//! executor drives, the `ModelCatalog` implementations the registry
//! consumes, and cost estimation.

mod catalogs;
mod chat;
mod client;
mod cost;
mod error;
mod wire;

pub use catalogs::{LmStudioCatalog, OllamaCatalog, OpenRouterCatalog};
pub use chat::{ChatBackend, ChatOutcome, LmStudioBackend, OllamaBackend, OpenRouterBackend};
pub use client::{backoff_delay, build_http_client, with_retries};
pub use cost::{estimate_costs, CostEstimate};
pub use error::{BackendError, Result};
pub use wire::{
    AggregatorModel, AggregatorModelList, AggregatorPricing, ChatMessage, ChatRequest,
    ChatResponse, ChatUsage, LocalModelList, OllamaTagList,
};
