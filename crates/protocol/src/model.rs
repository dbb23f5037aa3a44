use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Model backend class. Parsed once from the `provider:model` string form;
/// everything downstream dispatches on the variant, never on the prefix.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "kebab-case")]
pub enum Provider {
    /// OpenAI-compatible chat endpoint served on loopback.
    LocalStudio,
    /// Plain chat endpoint served on loopback.
    LocalOllama,
    /// Hosted aggregator returning a model list, some free, some priced.
    RemoteAggregator,
    /// Any other remote OpenAI-compatible endpoint.
    RemoteGeneric,
}

impl Provider {
    pub fn is_local(&self) -> bool {
        matches!(self, Self::LocalStudio | Self::LocalOllama)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalStudio => "lm-studio",
            Self::LocalOllama => "ollama",
            Self::RemoteAggregator => "openrouter",
            Self::RemoteGeneric => "remote",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lm-studio" => Ok(Self::LocalStudio),
            "ollama" => Ok(Self::LocalOllama),
            "openrouter" => Ok(Self::RemoteAggregator),
            "remote" => Ok(Self::RemoteGeneric),
            other => Err(format!("unknown provider: {other}")),
        }
    }
}

/// Fully qualified model identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
pub struct ModelId {
    pub provider: Provider,
    pub id: String,
}

impl ModelId {
    pub fn new(provider: Provider, id: impl Into<String>) -> Self {
        Self {
            provider,
            id: id.into(),
        }
    }

    /// Parse the `provider:model` wire form. The colon split happens here
    /// and nowhere else.
    pub fn parse(s: &str) -> Result<Self, String> {
        let (prefix, id) = s
            .split_once(':')
            .ok_or_else(|| format!("model id missing provider prefix: {s}"))?;
        if id.is_empty() {
            return Err(format!("model id missing model name: {s}"));
        }
        Ok(Self {
            provider: prefix.parse()?,
            id: id.to_string(),
        })
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ModelCapabilities {
    pub chat: bool,
    pub completion: bool,
}

impl Default for ModelCapabilities {
    fn default() -> Self {
        Self {
            chat: true,
            completion: false,
        }
    }
}

/// A discovered model. Immutable after discovery; the registry re-discovers
/// on TTL expiry rather than mutating in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ModelInfo {
    pub id: ModelId,
    pub display_name: String,
    /// Declared context window in tokens.
    pub context_window: u32,
    /// Cost per input token in USD. Zero for local and free models.
    pub cost_per_input_token: f64,
    /// Cost per output token in USD. Zero for local and free models.
    pub cost_per_output_token: f64,
    pub capabilities: ModelCapabilities,
}

impl ModelInfo {
    /// Free means both per-token costs are exactly zero.
    pub fn is_free(&self) -> bool {
        self.cost_per_input_token == 0.0 && self.cost_per_output_token == 0.0
    }

    pub fn is_local(&self) -> bool {
        self.id.provider.is_local()
    }

    /// Estimated cost in USD for a prompt/completion token pair.
    pub fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        input_tokens as f64 * self.cost_per_input_token
            + output_tokens as f64 * self.cost_per_output_token
    }
}
