//! Assignment of scored models to subtasks under live-load constraints.
//!
//! Policy: the scoring engine names the ideal model per subtask; when the
//! ideal's effective load exceeds the alternative threshold the balancer
//! falls back to the least-loaded alternative scoring at least 85% of the
//! ideal. Subtasks are processed in descending complexity so the largest
//! jobs claim capacity first. Optional batching scores one representative
//! per similarity group; the efficiency priority adds coarser buckets,
//! quantized-model preference, and per-model caps.

use crate::error::{Result, RouterError};
use crate::load::LoadTracker;
use costwise_perf::PerfStore;
use costwise_protocol::{CodeType, DecomposedTask, ModelInfo, SizeCategory, Subtask};
use costwise_scoring::{is_quantized, model_size, ScoredModel, ScoringEngine, Selection};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Minimum score ratio an alternative must retain against the ideal.
const ALTERNATIVE_SCORE_RATIO: f64 = 0.85;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutePriority {
    Speed,
    Cost,
    Quality,
    /// Resource-optimized path: coarser batching, quantized preference,
    /// per-model caps.
    Efficiency,
}

impl RoutePriority {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "speed" => Some(Self::Speed),
            "cost" => Some(Self::Cost),
            "quality" => Some(Self::Quality),
            "efficiency" => Some(Self::Efficiency),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Assignment {
    pub model: ModelInfo,
    pub score: f64,
    pub reason: String,
}

pub struct LoadBalancer {
    scoring: Arc<ScoringEngine>,
    load: Arc<LoadTracker>,
    /// Effective load above which alternatives are considered.
    alternative_threshold: f64,
}

impl LoadBalancer {
    pub fn new(
        scoring: Arc<ScoringEngine>,
        load: Arc<LoadTracker>,
        alternative_threshold: f64,
    ) -> Self {
        Self {
            scoring,
            load,
            alternative_threshold,
        }
    }

    pub fn load_tracker(&self) -> &Arc<LoadTracker> {
        &self.load
    }

    /// Assign a model to every subtask. Fails with `NoSuitableModel` when
    /// any subtask fits no candidate's context window.
    pub fn assign(
        &self,
        task: &DecomposedTask,
        candidates: &[ModelInfo],
        perf: &PerfStore,
        priority: RoutePriority,
        batching: bool,
    ) -> Result<BTreeMap<String, Assignment>> {
        if candidates.is_empty() {
            return Err(RouterError::NoSuitableModel(
                "no candidate models are available".to_string(),
            ));
        }

        let groups = group_subtasks(task, priority, batching);
        let mut assignments = BTreeMap::new();
        let mut per_model_counts: HashMap<String, usize> = HashMap::new();
        let per_model_cap = per_model_cap(task.subtasks.len(), candidates.len());

        for group in groups {
            let representative = group.representative(task);
            let selection = self
                .scoring
                .select(
                    representative,
                    candidates,
                    |m| perf.stats(&m.id.to_string()),
                    &perf.analyze_by_complexity(
                        (representative.complexity - 0.2).max(0.0),
                        (representative.complexity + 0.2).min(1.0),
                    ),
                    Some(&task.task),
                )
                .ok_or_else(|| {
                    RouterError::NoSuitableModel(format!(
                        "no model accepts subtask {} (estimated {} tokens)",
                        representative.id, representative.estimated_tokens
                    ))
                })?;

            let chosen = self.pick_under_load(
                &selection,
                representative,
                priority,
                &per_model_counts,
                per_model_cap,
            );

            for member_id in &group.members {
                let member = task
                    .subtask(member_id)
                    .ok_or_else(|| RouterError::Internal(format!("lost subtask {member_id}")))?;
                let model_key = chosen.model.id.to_string();
                *per_model_counts.entry(model_key.clone()).or_insert(0) += 1;
                self.load
                    .assign(&model_key, estimated_secs(member));
                assignments.insert(member_id.clone(), chosen.clone());
            }
        }

        Ok(assignments)
    }

    /// Apply the live-load policy to a selection.
    fn pick_under_load(
        &self,
        selection: &Selection,
        subtask: &Subtask,
        priority: RoutePriority,
        per_model_counts: &HashMap<String, usize>,
        per_model_cap: usize,
    ) -> Assignment {
        let ideal_key = selection.model.id.to_string();
        let ideal_load = self.load.effective_load(&ideal_key);

        let mut pick = ScoredModel {
            model: selection.model.clone(),
            score: selection.score,
        };
        let mut reason = selection.reason.clone();

        if ideal_load > self.alternative_threshold {
            if let Some(alternative) = self.best_alternative(selection, subtask) {
                reason = format!(
                    "ideal {} at effective load {ideal_load:.1}, rerouted to {} (score {:.2} within {:.0}% of ideal)",
                    ideal_key,
                    alternative.model.id,
                    alternative.score,
                    ALTERNATIVE_SCORE_RATIO * 100.0
                );
                pick = alternative;
            }
        }

        if priority == RoutePriority::Efficiency {
            if let Some(efficient) =
                self.efficiency_override(selection, subtask, &pick, per_model_counts, per_model_cap)
            {
                reason = format!(
                    "resource-optimized: {} preferred for {} subtask",
                    efficient.model.id,
                    if subtask.complexity < 0.4 { "simple" } else { "bucketed" }
                );
                pick = efficient;
            }
        }

        Assignment {
            model: pick.model,
            score: pick.score,
            reason,
        }
    }

    /// Lowest-effective-load accepted model retaining 85% of the ideal
    /// score and fitting the context window; ties break by descending
    /// score.
    fn best_alternative(&self, selection: &Selection, subtask: &Subtask) -> Option<ScoredModel> {
        let floor = selection.score * ALTERNATIVE_SCORE_RATIO;
        let mut viable: Vec<(f64, &ScoredModel)> = selection
            .accepted
            .iter()
            .filter(|sm| sm.score >= floor)
            .filter(|sm| sm.model.context_window as u64 >= subtask.estimated_tokens)
            .map(|sm| (self.load.effective_load(&sm.model.id.to_string()), sm))
            .collect();

        viable.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.1.score
                        .partial_cmp(&a.1.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
        });
        viable.first().map(|(_, sm)| (*sm).clone())
    }

    /// Efficiency-priority adjustments: prefer quantized models for simple
    /// work, steer oversized models away from it, and respect per-model
    /// caps so one model does not starve the pool.
    fn efficiency_override(
        &self,
        selection: &Selection,
        subtask: &Subtask,
        current: &ScoredModel,
        per_model_counts: &HashMap<String, usize>,
        per_model_cap: usize,
    ) -> Option<ScoredModel> {
        let under_cap = |sm: &ScoredModel| {
            per_model_counts
                .get(&sm.model.id.to_string())
                .copied()
                .unwrap_or(0)
                < per_model_cap
        };

        let simple = subtask.complexity < 0.4;
        if simple {
            // Quantized first; otherwise anything not oversized.
            if let Some(quantized) = selection
                .accepted
                .iter()
                .find(|sm| is_quantized(&sm.model) && under_cap(sm))
            {
                if quantized.model.id != current.model.id {
                    return Some(quantized.clone());
                }
                return None;
            }
            let oversized = matches!(
                model_size(&current.model),
                SizeCategory::Large | SizeCategory::Remote
            );
            if oversized {
                if let Some(smaller) = selection.accepted.iter().find(|sm| {
                    !matches!(
                        model_size(&sm.model),
                        SizeCategory::Large | SizeCategory::Remote
                    ) && under_cap(sm)
                }) {
                    return Some(smaller.clone());
                }
            }
        }

        // Cap enforcement applies to every bucket.
        if !under_cap(current) {
            return selection
                .accepted
                .iter()
                .find(|sm| under_cap(sm) && sm.model.id != current.model.id)
                .cloned();
        }
        None
    }
}

/// Expected wall time of one subtask, for completion-timestamp tracking.
fn estimated_secs(subtask: &Subtask) -> u64 {
    ((subtask.estimated_time_weight() / 50.0) as u64).clamp(1, 600)
}

/// Starvation guard for the efficiency path.
fn per_model_cap(subtasks: usize, models: usize) -> usize {
    (subtasks.div_ceil(models.max(1))).max(1) + 1
}

struct SubtaskGroup {
    members: Vec<String>,
    representative_id: String,
}

impl SubtaskGroup {
    fn representative<'a>(&self, task: &'a DecomposedTask) -> &'a Subtask {
        task.subtask(&self.representative_id)
            .expect("group representative exists")
    }
}

/// Partition subtasks for assignment, ordered by descending representative
/// complexity. Without batching every subtask forms its own group.
fn group_subtasks(
    task: &DecomposedTask,
    priority: RoutePriority,
    batching: bool,
) -> Vec<SubtaskGroup> {
    // Descending complexity, ties by ascending id: largest jobs first.
    let mut ordered: Vec<&Subtask> = task.subtasks.iter().collect();
    ordered.sort_by(|a, b| {
        b.complexity
            .partial_cmp(&a.complexity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });

    if priority != RoutePriority::Efficiency && !batching {
        return ordered
            .into_iter()
            .map(|s| SubtaskGroup {
                members: vec![s.id.clone()],
                representative_id: s.id.clone(),
            })
            .collect();
    }

    type GroupKey = (SizeCategory, u32, CodeType);
    let key_of = |s: &Subtask| -> GroupKey {
        if priority == RoutePriority::Efficiency {
            // Coarse 0.25-wide complexity buckets.
            (s.recommended_size, (s.complexity / 0.25) as u32, s.code_type)
        } else {
            // Batching buckets complexity at 0.1 resolution.
            (s.recommended_size, (s.complexity * 10.0) as u32, s.code_type)
        }
    };

    let mut groups: Vec<(GroupKey, SubtaskGroup)> = Vec::new();
    for subtask in ordered {
        let key = key_of(subtask);
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, group)) => group.members.push(subtask.id.clone()),
            None => groups.push((
                key,
                SubtaskGroup {
                    members: vec![subtask.id.clone()],
                    // First member is the most complex by the sort above.
                    representative_id: subtask.id.clone(),
                },
            )),
        }
    }
    groups.into_iter().map(|(_, g)| g).collect()
}
