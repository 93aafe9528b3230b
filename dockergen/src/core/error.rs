//! Typed failures raised at the collaborator seams and by the engine.
//!
//! The discriminant kind of a collaborator failure is set where the failure
//! originates (HTTP status, process exit) so that downstream classification
//! never depends on message wording.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Discriminant of a generation-service failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationErrorKind {
    AuthFailure,
    RateLimit,
    BadRequest,
    BudgetExceeded,
    MalformedResponse,
    Transport,
    /// No discriminant available; classification falls back to the message.
    Unknown,
}

impl GenerationErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            GenerationErrorKind::AuthFailure => "auth_failure",
            GenerationErrorKind::RateLimit => "rate_limit",
            GenerationErrorKind::BadRequest => "bad_request",
            GenerationErrorKind::BudgetExceeded => "budget_exceeded",
            GenerationErrorKind::MalformedResponse => "malformed_response",
            GenerationErrorKind::Transport => "transport",
            GenerationErrorKind::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct GenerationError {
    pub kind: GenerationErrorKind,
    pub message: String,
}

impl GenerationError {
    pub fn new(kind: GenerationErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::AuthFailure, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::RateLimit, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(GenerationErrorKind::MalformedResponse, message)
    }
}

/// Discriminant of a sandbox failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxErrorKind {
    /// The container engine is not reachable.
    Unavailable,
    /// The instance could not be created or started.
    Launch,
    /// The instance was torn down concurrently (dead or marked for removal).
    TargetRemoved,
    /// Local I/O failed while preparing or collecting an invocation.
    Io,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SandboxError {
    pub kind: SandboxErrorKind,
    pub message: String,
}

impl SandboxError {
    pub fn new(kind: SandboxErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_target_removed(&self) -> bool {
        self.kind == SandboxErrorKind::TargetRemoved
    }
}

/// Terminal error of a run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("script analysis failed: {0}")]
    Analysis(String),
    #[error("{message}")]
    Generation {
        kind: GenerationErrorKind,
        message: String,
    },
    #[error("{0}")]
    Build(String),
    #[error("{0}")]
    Validation(String),
    #[error("maximum refinement attempts ({max}) reached without success: {last}")]
    RefinementExhausted { max: u32, last: String },
    #[error("{0}")]
    Unexpected(String),
    #[error("run interrupted during {0}")]
    Interrupted(String),
}

impl WorkflowError {
    /// Stable identifier used in the run summary.
    pub fn kind(&self) -> ErrorTag {
        match self {
            WorkflowError::Analysis(_) => ErrorTag::AnalysisFailure,
            WorkflowError::Generation { .. } => ErrorTag::GenerationFailure,
            WorkflowError::Build(_) => ErrorTag::BuildFailure,
            WorkflowError::Validation(_) => ErrorTag::ValidationFailure,
            WorkflowError::RefinementExhausted { .. } => ErrorTag::RefinementExhausted,
            WorkflowError::Unexpected(_) => ErrorTag::UnexpectedFailure,
            WorkflowError::Interrupted(_) => ErrorTag::Interrupted,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorTag {
    AnalysisFailure,
    GenerationFailure,
    BuildFailure,
    ValidationFailure,
    RefinementExhausted,
    UnexpectedFailure,
    Interrupted,
}

impl fmt::Display for ErrorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorTag::AnalysisFailure => "analysis_failure",
            ErrorTag::GenerationFailure => "generation_failure",
            ErrorTag::BuildFailure => "build_failure",
            ErrorTag::ValidationFailure => "validation_failure",
            ErrorTag::RefinementExhausted => "refinement_exhausted",
            ErrorTag::UnexpectedFailure => "unexpected_failure",
            ErrorTag::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}
