//! Per-provider cost estimation for the `get_cost_estimate` operation.

use costwise_protocol::ModelInfo;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct CostEstimate {
    pub model: String,
    pub provider: String,
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
    pub is_free: bool,
}

/// Estimate what each candidate model would charge for the given token
/// counts. Sorted cheapest first, ties by (provider, id) for determinism.
pub fn estimate_costs(
    models: &[ModelInfo],
    input_tokens: u64,
    output_tokens: u64,
) -> Vec<CostEstimate> {
    let mut estimates: Vec<CostEstimate> = models
        .iter()
        .map(|m| {
            let input_cost = input_tokens as f64 * m.cost_per_input_token;
            let output_cost = output_tokens as f64 * m.cost_per_output_token;
            CostEstimate {
                model: m.id.id.clone(),
                provider: m.id.provider.as_str().to_string(),
                input_cost,
                output_cost,
                total_cost: input_cost + output_cost,
                is_free: m.is_free(),
            }
        })
        .collect();

    estimates.sort_by(|a, b| {
        a.total_cost
            .partial_cmp(&b.total_cost)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.provider.cmp(&b.provider))
            .then_with(|| a.model.cmp(&b.model))
    });
    estimates
}
