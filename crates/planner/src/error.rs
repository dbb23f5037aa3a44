use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlannerError>;

/// Planner failures are invariant violations: they fail the current job
/// and surface as `Internal`.
#[derive(Error, Debug)]
pub enum PlannerError {
    #[error("dependency graph invariant violated: {0}")]
    InvalidGraph(String),

    #[error("cycle resolution did not converge")]
    CycleResolution,
}
