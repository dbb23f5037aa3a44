use costwise_protocol::{ErrorEnvelope, ErrorKind};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RouterError>;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("no suitable model: {0}")]
    NoSuitableModel(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("planner error: {0}")]
    Planner(#[from] costwise_planner::PlannerError),

    #[error("job cancelled")]
    Cancelled,

    #[error("job failed: {0}")]
    JobFailed(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl RouterError {
    /// Flatten into the wire envelope. Planner failures are always
    /// internal invariant violations.
    pub fn to_envelope(&self) -> ErrorEnvelope {
        match self {
            Self::NoSuitableModel(msg) => ErrorEnvelope::new(ErrorKind::NoSuitableModel, msg),
            Self::NotFound(msg) => ErrorEnvelope::new(ErrorKind::NotFound, msg),
            Self::PreconditionFailed(msg) => {
                ErrorEnvelope::new(ErrorKind::PreconditionFailed, msg)
            }
            Self::Planner(e) => ErrorEnvelope::internal(e.to_string()),
            Self::Cancelled => {
                ErrorEnvelope::new(ErrorKind::PreconditionFailed, "job was cancelled")
            }
            Self::JobFailed(msg) => ErrorEnvelope::new(ErrorKind::BackendPermanent, msg),
            Self::Internal(msg) => ErrorEnvelope::internal(msg),
        }
    }
}
