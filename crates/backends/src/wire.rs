//! OpenAI-compatible wire types shared by every backend, plus the remote
//! aggregator's model-enumeration payload.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Request body accepted by every backend at `/chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatChoice {
    pub message: ChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChoiceMessage {
    pub content: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

/// Aggregator model-enumeration envelope: top-level `data` array.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorModelList {
    pub data: Vec<AggregatorModel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorModel {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub context_length: Option<u32>,
    #[serde(default)]
    pub pricing: Option<AggregatorPricing>,
}

/// Aggregator pricing comes over the wire as decimal strings.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorPricing {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub completion: Option<String>,
}

impl AggregatorPricing {
    pub fn prompt_cost(&self) -> f64 {
        parse_price(self.prompt.as_deref())
    }

    pub fn completion_cost(&self) -> f64 {
        parse_price(self.completion.as_deref())
    }
}

fn parse_price(raw: Option<&str>) -> f64 {
    raw.and_then(|s| s.trim().parse::<f64>().ok())
        .unwrap_or(0.0)
        .max(0.0)
}

/// Local OpenAI-compatible `/models` envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalModelList {
    pub data: Vec<LocalModel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalModel {
    pub id: String,
}

/// Ollama `/api/tags` envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaTagList {
    pub models: Vec<OllamaTag>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaTag {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn chat_request_omits_unset_options() {
        let req = ChatRequest {
            model: "phi3-mini".into(),
            messages: vec![ChatMessage::user("hi")],
            temperature: None,
            max_tokens: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("temperature").is_none());
        assert!(json.get("max_tokens").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn parses_aggregator_listing() {
        let raw = r#"{"data": [
            {"id": "org/free-7b", "context_length": 32768,
             "pricing": {"prompt": "0", "completion": "0"}},
            {"id": "org/paid-70b", "context_length": 131072,
             "pricing": {"prompt": "0.0000005", "completion": "0.0000015"}}
        ]}"#;
        let list: AggregatorModelList = serde_json::from_str(raw).unwrap();
        assert_eq!(list.data.len(), 2);
        assert_eq!(list.data[0].pricing.as_ref().unwrap().prompt_cost(), 0.0);
        assert!(list.data[1].pricing.as_ref().unwrap().completion_cost() > 0.0);
    }

    #[test]
    fn parses_response_without_usage() {
        let raw = r#"{"choices": [{"message": {"content": "done"}}]}"#;
        let resp: ChatResponse = serde_json::from_str(raw).unwrap();
        assert!(resp.usage.is_none());
        assert_eq!(resp.choices[0].message.content.as_deref(), Some("done"));
    }
}
