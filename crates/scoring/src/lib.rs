//! # Costwise Scoring
//!
//! Ranks every candidate model for every subtask over a weighted
//! multi-factor score:
//!
//! ```text
//! score = 0.30 * complexity match
//!       + 0.30 * historical performance
//!       + 0.20 * resource efficiency
//!       + 0.20 * cost effectiveness
//!       + boosts (code specialist, task type, language, aggregator)
//!       + U(0, 0.05) jitter
//! ```
//!
//! Selection applies adaptive thresholds by complexity band: models under
//! the floor are rejected, a local model above the prefer-local bar wins
//! outright, ties break lexicographically on (provider, id). With no
//! performance history the factors fall back to size- and provider-derived
//! heuristics that stay monotonic in the same inputs.

mod engine;
mod heuristics;

pub use engine::{
    thresholds_for, AdaptiveThresholds, ScoredModel, ScoringEngine, Selection, JITTER_MAX,
};
pub use heuristics::{
    detect_language, is_code_specialist, is_quantized, model_matches_language, model_size,
};
