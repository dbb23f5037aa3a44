use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error taxonomy shared by every operation on the outer surface.
///
/// Kinds, not exception classes: each variant fixes retry and propagation
/// behavior regardless of which component raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum ErrorKind {
    /// Missing or ill-typed operation argument.
    InputInvalid,
    /// Referenced entity (job, model) does not exist.
    NotFound,
    /// Operation not valid in the current state; never retried.
    PreconditionFailed,
    /// No candidate model satisfies the context-window requirement.
    NoSuitableModel,
    /// Network error, 5xx or timeout; retried with backoff.
    BackendTransient,
    /// Auth, invalid request, context-length exceeded, model-not-found.
    BackendPermanent,
    /// Runtime prerequisite for an optional subsystem is missing.
    DependencyUnavailable,
    /// Invariant violation in a core component. Fails the job, not the process.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InputInvalid => "InputInvalid",
            Self::NotFound => "NotFound",
            Self::PreconditionFailed => "PreconditionFailed",
            Self::NoSuitableModel => "NoSuitableModel",
            Self::BackendTransient => "BackendTransient",
            Self::BackendPermanent => "BackendPermanent",
            Self::DependencyUnavailable => "DependencyUnavailable",
            Self::Internal => "Internal",
        }
    }
}

/// Structured error crossing the tool surface. No stack traces leave the
/// process; callers see the kind, a message, and optionally the offending
/// field and a hint.
#[derive(Debug, Clone, Error, Serialize, Deserialize, JsonSchema)]
#[error("{kind:?}: {message}")]
pub struct ErrorEnvelope {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorEnvelope {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            field: None,
            hint: None,
        }
    }

    /// Invalid input referencing the offending argument.
    pub fn input_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::InputInvalid,
            message: message.into(),
            field: Some(field.into()),
            hint: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PreconditionFailed, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn envelope_serializes_kind_as_pascal_case() {
        let err = ErrorEnvelope::new(ErrorKind::NoSuitableModel, "no model fits");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "NoSuitableModel");
        assert_eq!(json["message"], "no model fits");
        assert!(json.get("field").is_none());
    }

    #[test]
    fn input_invalid_carries_field() {
        let err = ErrorEnvelope::input_invalid("task", "task must be a non-empty string");
        assert_eq!(err.kind, ErrorKind::InputInvalid);
        assert_eq!(err.field.as_deref(), Some("task"));
    }
}
