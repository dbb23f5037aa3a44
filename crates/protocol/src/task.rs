use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Decomposition granularity, chosen by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Fine,
    #[default]
    Medium,
    Coarse,
}

impl Granularity {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fine" => Some(Self::Fine),
            "medium" => Some(Self::Medium),
            "coarse" => Some(Self::Coarse),
            _ => None,
        }
    }
}

/// What kind of code artifact a subtask produces.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum CodeType {
    Function,
    Class,
    Method,
    Module,
    Interface,
    Test,
    Other,
}

impl CodeType {
    /// Subtask kinds worth enriching with indexed code snippets.
    pub fn wants_snippets(&self) -> bool {
        matches!(
            self,
            Self::Function | Self::Class | Self::Method | Self::Module
        )
    }
}

impl fmt::Display for CodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Method => "method",
            Self::Module => "module",
            Self::Interface => "interface",
            Self::Test => "test",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// Recommended model size category for a subtask.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum SizeCategory {
    Small,
    Medium,
    Large,
    Remote,
}

impl SizeCategory {
    /// Size banding over the complexity estimate: small (<0.4),
    /// medium (<0.7), large (<0.9), remote otherwise.
    pub fn for_complexity(complexity: f64) -> Self {
        if complexity < 0.4 {
            Self::Small
        } else if complexity < 0.7 {
            Self::Medium
        } else if complexity < 0.9 {
            Self::Large
        } else {
            Self::Remote
        }
    }
}

/// Complexity above this ceiling is clamped so routing stays feasible.
pub const COMPLEXITY_CEILING: f64 = 0.8;

/// An atomic unit of work derived from a task, executable by one model call.
///
/// Dependencies reference other subtasks by id only; the owning
/// [`DecomposedTask`] is the sole holder of the subtask collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Subtask {
    pub id: String,
    pub description: String,
    pub estimated_tokens: u64,
    /// Complexity in [0, 1], clamped at [`COMPLEXITY_CEILING`].
    pub complexity: f64,
    pub recommended_size: SizeCategory,
    pub code_type: CodeType,
    /// Ids of subtasks whose output this one consumes. Mutated only by the
    /// planner during cycle resolution.
    pub dependencies: BTreeSet<String>,
    /// Planner and decomposer annotations (clamps, broken edges).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl Subtask {
    /// Estimated execution weight used for critical-path and load math.
    pub fn estimated_time_weight(&self) -> f64 {
        self.complexity * self.estimated_tokens as f64
    }
}

/// A task broken into subtasks, with the planner's computed execution order
/// and critical path. Owns its subtasks exclusively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DecomposedTask {
    pub task: String,
    pub subtasks: Vec<Subtask>,
    /// Topological execution order over subtask ids. Empty until planned.
    #[serde(default)]
    pub execution_order: Vec<String>,
    /// Longest-duration chain through the DAG, as subtask ids.
    #[serde(default)]
    pub critical_path: Vec<String>,
}

impl DecomposedTask {
    pub fn new(task: impl Into<String>, subtasks: Vec<Subtask>) -> Self {
        Self {
            task: task.into(),
            subtasks,
            execution_order: Vec::new(),
            critical_path: Vec::new(),
        }
    }

    pub fn subtask(&self, id: &str) -> Option<&Subtask> {
        self.subtasks.iter().find(|s| s.id == id)
    }

    pub fn subtask_mut(&mut self, id: &str) -> Option<&mut Subtask> {
        self.subtasks.iter_mut().find(|s| s.id == id)
    }

    /// Total estimated tokens across all subtasks.
    pub fn total_estimated_tokens(&self) -> u64 {
        self.subtasks.iter().map(|s| s.estimated_tokens).sum()
    }

    /// Every dependency id must refer to a subtask in this task.
    pub fn validate_dependencies(&self) -> Result<(), String> {
        let ids: BTreeSet<&str> = self.subtasks.iter().map(|s| s.id.as_str()).collect();
        for subtask in &self.subtasks {
            for dep in &subtask.dependencies {
                if !ids.contains(dep.as_str()) {
                    return Err(format!(
                        "subtask {} depends on unknown id {dep}",
                        subtask.id
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn size_category_bands() {
        assert_eq!(SizeCategory::for_complexity(0.0), SizeCategory::Small);
        assert_eq!(SizeCategory::for_complexity(0.39), SizeCategory::Small);
        assert_eq!(SizeCategory::for_complexity(0.4), SizeCategory::Medium);
        assert_eq!(SizeCategory::for_complexity(0.69), SizeCategory::Medium);
        assert_eq!(SizeCategory::for_complexity(0.7), SizeCategory::Large);
        assert_eq!(SizeCategory::for_complexity(0.9), SizeCategory::Remote);
    }

    #[test]
    fn validate_flags_dangling_dependency() {
        let task = DecomposedTask::new(
            "t",
            vec![Subtask {
                id: "subtask-1".into(),
                description: "x".into(),
                estimated_tokens: 10,
                complexity: 0.2,
                recommended_size: SizeCategory::Small,
                code_type: CodeType::Function,
                dependencies: ["subtask-9".to_string()].into_iter().collect(),
                notes: Vec::new(),
            }],
        );
        assert!(task.validate_dependencies().is_err());
    }

    #[test]
    fn snippet_eligibility_excludes_tests_and_interfaces() {
        assert!(CodeType::Function.wants_snippets());
        assert!(CodeType::Module.wants_snippets());
        assert!(!CodeType::Test.wants_snippets());
        assert!(!CodeType::Interface.wants_snippets());
        assert!(!CodeType::Other.wants_snippets());
    }
}
