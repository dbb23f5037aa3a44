//! # Costwise Planner
//!
//! Turns a natural-language task into a subtask graph and schedules it:
//!
//! ```text
//! Task string
//!   |-> Decomposer  - segments, complexity, size, code type, dependencies
//!   |-> Planner     - cycle resolution (Tarjan), execution order (Kahn),
//!   |                 critical path (longest weighted chain)
//!   `-> DecomposedTask with execution_order + critical_path filled in
//! ```
//!
//! Both stages are fully deterministic: identical task strings produce
//! structurally identical graphs, orders, and paths.

mod decompose;
mod error;
mod plan;

pub use decompose::TaskDecomposer;
pub use error::{PlannerError, Result};
pub use plan::{plan, visualize, BrokenEdge, PlanReport};
