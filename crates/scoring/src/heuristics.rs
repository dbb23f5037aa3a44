//! Model-id heuristics: size classes, specialization patterns, and
//! source-language hints. These are deliberately string-level; they feed
//! the scoring factors but never drive dispatch.

use costwise_protocol::{ModelInfo, SizeCategory};
use once_cell::sync::Lazy;
use regex::Regex;

static PARAM_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*[bB]\b").expect("param count regex"));

/// Rough size class of a model, from its id when possible.
pub fn model_size(model: &ModelInfo) -> SizeCategory {
    let id = model.id.id.to_lowercase();

    if let Some(caps) = PARAM_COUNT.captures(&id) {
        if let Ok(params) = caps[1].parse::<f64>() {
            return if params <= 4.0 {
                SizeCategory::Small
            } else if params <= 15.0 {
                SizeCategory::Medium
            } else if params <= 40.0 {
                SizeCategory::Large
            } else {
                SizeCategory::Remote
            };
        }
    }

    if ["mini", "tiny", "small", "phi"].iter().any(|p| id.contains(p)) {
        return SizeCategory::Small;
    }
    if id.contains("large") || id.contains("-xl") {
        return SizeCategory::Large;
    }
    if model.id.provider.is_local() {
        SizeCategory::Medium
    } else {
        SizeCategory::Large
    }
}

/// Models advertised as code specialists.
pub fn is_code_specialist(model: &ModelInfo) -> bool {
    let id = model.id.id.to_lowercase();
    ["code", "coder", "starcoder", "codestral", "codellama"]
        .iter()
        .any(|p| id.contains(p))
}

/// Quantized builds run cheap on local hardware; the resource-optimized
/// assignment path prefers them for simple work.
pub fn is_quantized(model: &ModelInfo) -> bool {
    let id = model.id.id.to_lowercase();
    ["q4", "q5", "q8", "gguf", "quant", "awq", "gptq"]
        .iter()
        .any(|p| id.contains(p))
}

const LANGUAGES: &[(&str, &[&str])] = &[
    ("python", &["python", "py"]),
    ("rust", &["rust", "rs"]),
    ("javascript", &["javascript", "js"]),
    ("typescript", &["typescript", "ts"]),
    ("java", &["java"]),
    ("go", &["golang", "go"]),
    ("c++", &["cpp", "c++"]),
];

fn words_of(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '+')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Source language named in the task, if any. Short names ("go") match
/// whole words only so they cannot fire inside unrelated tokens.
pub fn detect_language(task: &str) -> Option<&'static str> {
    let words = words_of(task);
    LANGUAGES
        .iter()
        .find(|(name, _)| words.iter().any(|w| w == name))
        .map(|(name, _)| *name)
}

/// Whether the model id hints at the given language. Two-letter hints
/// match as id-segment prefixes; longer hints match as substrings.
pub fn model_matches_language(model: &ModelInfo, language: &str) -> bool {
    let id = model.id.id.to_lowercase();
    let segments = words_of(&id);
    LANGUAGES
        .iter()
        .find(|(name, _)| *name == language)
        .map(|(_, hints)| {
            hints.iter().any(|h| {
                if h.len() <= 2 {
                    segments.iter().any(|s| s.starts_with(h))
                } else {
                    id.contains(h)
                }
            })
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use costwise_protocol::{ModelCapabilities, ModelId, Provider};

    use super::*;

    fn model(provider: Provider, id: &str) -> ModelInfo {
        ModelInfo {
            id: ModelId::new(provider, id),
            display_name: id.to_string(),
            context_window: 8192,
            cost_per_input_token: 0.0,
            cost_per_output_token: 0.0,
            capabilities: ModelCapabilities::default(),
        }
    }

    #[test]
    fn size_from_parameter_count() {
        assert_eq!(
            model_size(&model(Provider::LocalOllama, "llama3-3b")),
            SizeCategory::Small
        );
        assert_eq!(
            model_size(&model(Provider::LocalOllama, "llama3-8b")),
            SizeCategory::Medium
        );
        assert_eq!(
            model_size(&model(Provider::RemoteAggregator, "org/model-34b")),
            SizeCategory::Large
        );
        assert_eq!(
            model_size(&model(Provider::RemoteAggregator, "org/giant-70b")),
            SizeCategory::Remote
        );
    }

    #[test]
    fn size_from_name_hints_and_defaults() {
        assert_eq!(
            model_size(&model(Provider::LocalStudio, "phi3-mini")),
            SizeCategory::Small
        );
        assert_eq!(
            model_size(&model(Provider::LocalStudio, "mystery-model")),
            SizeCategory::Medium
        );
        assert_eq!(
            model_size(&model(Provider::RemoteAggregator, "org/mystery")),
            SizeCategory::Large
        );
    }

    #[test]
    fn code_specialist_patterns() {
        assert!(is_code_specialist(&model(Provider::LocalOllama, "codellama-7b")));
        assert!(is_code_specialist(&model(Provider::RemoteAggregator, "org/deepseek-coder")));
        assert!(!is_code_specialist(&model(Provider::LocalOllama, "llama3-8b")));
    }

    #[test]
    fn language_detection_and_matching() {
        assert_eq!(detect_language("write factorial in Python"), Some("python"));
        assert_eq!(detect_language("sort an array"), None);
        assert!(model_matches_language(
            &model(Provider::RemoteAggregator, "org/pycoder-7b"),
            "python"
        ));
        assert!(!model_matches_language(
            &model(Provider::LocalOllama, "llama3-8b"),
            "python"
        ));
    }
}
