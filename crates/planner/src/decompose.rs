//! Task decomposition: from one task string to a list of subtasks with
//! complexity estimates, size categories, code types, and inferred
//! dependencies.

use costwise_protocol::task::COMPLEXITY_CEILING;
use costwise_protocol::{CodeType, DecomposedTask, Granularity, SizeCategory, Subtask};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

/// Keywords that signal algorithmic or architectural weight.
const COMPLEX_KEYWORDS: &[&str] = &[
    "algorithm",
    "architecture",
    "async",
    "cache",
    "compiler",
    "concurrent",
    "distributed",
    "encryption",
    "graph",
    "optimize",
    "parallel",
    "parser",
    "performance",
    "protocol",
    "recursive",
    "refactor",
    "scheduler",
    "transaction",
];

/// Words too common to count as a textual cross-reference.
const REFERENCE_NOISE: &[&str] = &[
    "about", "after", "before", "between", "could", "every", "first", "other", "should", "their",
    "there", "these", "those", "using", "where", "which", "while", "would", "write", "implement",
    "create", "function", "method", "class", "module", "interface", "test", "tests", "code",
];

static NUMBERED_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(?:\d+[.)]|[-*])\s+").expect("numbered item regex"));

static STEP_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:subtask|step|task)\s+(\d+)\b").expect("step ref regex"));

/// Back-reference phrases that chain a segment to its predecessor.
const SEQUENCE_MARKERS: &[&str] = &[
    "then ",
    "after that",
    "using the result",
    "based on the previous",
    "building on",
    "with the output",
];

pub struct TaskDecomposer {
    granularity: Granularity,
}

impl TaskDecomposer {
    pub fn new(granularity: Granularity) -> Self {
        Self { granularity }
    }

    /// Decompose a task string. Execution order and critical path stay
    /// empty until the planner runs.
    pub fn decompose(&self, task: &str) -> DecomposedTask {
        let segments = self.segment(task);
        let mut subtasks: Vec<Subtask> = segments
            .iter()
            .enumerate()
            .map(|(i, segment)| self.build_subtask(i, segment))
            .collect();

        infer_dependencies(&mut subtasks, &segments);
        DecomposedTask::new(task, subtasks)
    }

    /// Split the task into subtask descriptions according to granularity.
    /// Numbered list items always split; an empty split falls back to the
    /// whole task as a single subtask.
    fn segment(&self, task: &str) -> Vec<String> {
        let trimmed = task.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }

        let mut segments: Vec<String> = if NUMBERED_ITEM.is_match(trimmed) {
            NUMBERED_ITEM
                .split(trimmed)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        } else {
            match self.granularity {
                Granularity::Coarse => split_on(trimmed, &["\n\n"]),
                Granularity::Medium => split_on(trimmed, &[". ", "; ", "\n", " then "]),
                Granularity::Fine => split_on(
                    trimmed,
                    &[". ", "; ", "\n", " then ", " and then ", ", and "],
                ),
            }
        };

        if segments.is_empty() {
            segments.push(trimmed.to_string());
        }
        segments
    }

    fn build_subtask(&self, index: usize, description: &str) -> Subtask {
        let raw_complexity = estimate_complexity(description);
        let mut notes = Vec::new();

        // Routing stays feasible only below the ceiling; the raw estimate
        // still decides the recommended size so oversized work can be
        // steered to remote models.
        let complexity = if raw_complexity > COMPLEXITY_CEILING {
            notes.push(format!(
                "complexity clamped to {COMPLEXITY_CEILING} (estimated {raw_complexity:.2})"
            ));
            COMPLEXITY_CEILING
        } else {
            raw_complexity
        };

        Subtask {
            id: format!("subtask-{}", index + 1),
            description: description.to_string(),
            estimated_tokens: description.len() as u64 * 4,
            complexity,
            recommended_size: SizeCategory::for_complexity(raw_complexity),
            code_type: classify_code_type(description),
            dependencies: BTreeSet::new(),
            notes,
        }
    }
}

fn split_on(text: &str, separators: &[&str]) -> Vec<String> {
    let mut segments = vec![text.to_string()];
    for sep in separators {
        segments = segments
            .iter()
            .flat_map(|s| s.split(sep))
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
    segments
}

/// Heuristic combining length, keyword density, and structural indicators.
/// Values land in [0, 1]; the caller applies the routing ceiling.
fn estimate_complexity(description: &str) -> f64 {
    let lowered = description.to_lowercase();

    let length_factor = (description.len() as f64 / 400.0).min(1.0) * 0.4;

    let keyword_hits = COMPLEX_KEYWORDS
        .iter()
        .filter(|kw| lowered.contains(*kw))
        .count();
    let keyword_factor = (keyword_hits as f64 * 0.15).min(0.45);

    let clause_count = description.matches(',').count() + description.matches(" with ").count();
    let structure_factor = (clause_count as f64 * 0.05).min(0.15);

    (0.1 + length_factor + keyword_factor + structure_factor).min(1.0)
}

fn classify_code_type(description: &str) -> CodeType {
    let lowered = description.to_lowercase();
    if lowered.contains("test") {
        CodeType::Test
    } else if lowered.contains("interface") || lowered.contains("trait") || lowered.contains("api")
    {
        CodeType::Interface
    } else if lowered.contains("class") || lowered.contains("struct") {
        CodeType::Class
    } else if lowered.contains("method") {
        CodeType::Method
    } else if lowered.contains("module") || lowered.contains("package") {
        CodeType::Module
    } else if lowered.contains("function") || lowered.contains("implement") {
        CodeType::Function
    } else {
        CodeType::Other
    }
}

/// Dependencies come from textual references between subtasks: explicit
/// step numbers, back-reference phrases, and shared distinctive terms.
fn infer_dependencies(subtasks: &mut [Subtask], segments: &[String]) {
    let term_sets: Vec<BTreeSet<String>> = segments.iter().map(|s| distinctive_terms(s)).collect();

    for i in 0..subtasks.len() {
        let lowered = segments[i].to_lowercase();
        let mut deps = BTreeSet::new();

        // "step 2" / "subtask 1" style references.
        for capture in STEP_REFERENCE.captures_iter(&segments[i]) {
            if let Ok(n) = capture[1].parse::<usize>() {
                if n >= 1 && n <= subtasks.len() && n - 1 != i {
                    deps.insert(subtasks[n - 1].id.clone());
                }
            }
        }

        // Sequencing phrases chain to the immediate predecessor.
        if i > 0 && SEQUENCE_MARKERS.iter().any(|m| lowered.contains(m)) {
            deps.insert(subtasks[i - 1].id.clone());
        }

        // Shared distinctive vocabulary with an earlier subtask.
        for j in 0..i {
            let shared = term_sets[i].intersection(&term_sets[j]).count();
            if shared >= 2 {
                deps.insert(subtasks[j].id.clone());
            }
        }

        subtasks[i].dependencies = deps;
    }
}

/// Lowercased terms long and rare enough to act as cross-references.
fn distinctive_terms(segment: &str) -> BTreeSet<String> {
    segment
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|t| t.len() >= 5 && !REFERENCE_NOISE.contains(&t.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn decomposer() -> TaskDecomposer {
        TaskDecomposer::new(Granularity::Medium)
    }

    #[test]
    fn single_sentence_yields_single_subtask() {
        let task = decomposer().decompose("write factorial in python");
        assert_eq!(task.subtasks.len(), 1);
        assert_eq!(task.subtasks[0].id, "subtask-1");
        assert!(task.execution_order.is_empty());
    }

    #[test]
    fn token_estimate_is_length_times_four() {
        let task = decomposer().decompose("write factorial in python");
        let subtask = &task.subtasks[0];
        assert_eq!(subtask.estimated_tokens, subtask.description.len() as u64 * 4);
    }

    #[test]
    fn numbered_lists_always_split() {
        let task = decomposer().decompose("1. parse the config\n2. validate entries\n3. write tests");
        assert_eq!(task.subtasks.len(), 3);
        assert_eq!(task.subtasks[2].code_type, CodeType::Test);
    }

    #[test]
    fn granularity_controls_segmentation() {
        let text = "parse the input. build the tree. emit the output";
        assert_eq!(
            TaskDecomposer::new(Granularity::Coarse).decompose(text).subtasks.len(),
            1
        );
        assert_eq!(
            TaskDecomposer::new(Granularity::Medium).decompose(text).subtasks.len(),
            3
        );
    }

    #[test]
    fn high_complexity_is_clamped_and_annotated() {
        // Pile on keywords and length until the raw estimate clears 0.8.
        let heavy = "design a distributed concurrent scheduler with a recursive \
                     graph algorithm, an async cache layer, a parser, encryption, \
                     and aggressive performance optimization across the architecture, \
                     with transaction support, with protocol negotiation, with \
                     parallel compaction and careful cache invalidation everywhere";
        let task = TaskDecomposer::new(Granularity::Coarse).decompose(heavy);
        let subtask = &task.subtasks[0];

        assert_eq!(subtask.complexity, COMPLEXITY_CEILING);
        assert!(
            subtask.notes.iter().any(|n| n.contains("clamped")),
            "clamp must be annotated: {:?}",
            subtask.notes
        );
        // The raw estimate still drives the size recommendation.
        assert_eq!(subtask.recommended_size, SizeCategory::Remote);
    }

    #[test]
    fn complexity_095_clamps_to_08() {
        // Direct check of the clamp boundary through the public surface: a
        // description engineered above the ceiling lands exactly on it.
        let heavy = "optimize the distributed graph compiler cache, with async \
                     parallel encryption protocol, with recursive scheduler \
                     transactions, with performance architecture refactor";
        let task = TaskDecomposer::new(Granularity::Coarse).decompose(heavy);
        assert!(estimate_complexity(heavy) > COMPLEXITY_CEILING);
        assert_eq!(task.subtasks[0].complexity, COMPLEXITY_CEILING);
    }

    #[test]
    fn explicit_step_reference_becomes_dependency() {
        let task = decomposer()
            .decompose("1. define the schema\n2. generate code from the schema in step 1");
        let second = &task.subtasks[1];
        assert!(second.dependencies.contains("subtask-1"));
    }

    #[test]
    fn sequence_marker_chains_to_predecessor() {
        let task = decomposer().decompose("build the lexer. then wire it into the parser");
        assert!(task.subtasks[1].dependencies.contains("subtask-1"));
    }

    #[test]
    fn decomposition_is_deterministic() {
        let text = "implement a parser. then add caching, and write tests for step 1";
        let a = decomposer().decompose(text);
        let b = decomposer().decompose(text);
        assert_eq!(a, b);
    }

    #[test]
    fn empty_task_yields_no_subtasks() {
        let task = decomposer().decompose("   ");
        assert!(task.subtasks.is_empty());
    }
}
