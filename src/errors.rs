//! Typed error hierarchy for the generation pipeline.
//!
//! Two enums cover the core:
//! - `ClientError` — transport-level failures from the text-generation call
//! - `OrchestratorError` — the single terminal failure of one orchestration run
//!
//! Every variant carries a fixed string code plus a retryable flag. Callers
//! switch on `code()` at the boundary instead of dispatching on the Rust type,
//! so collaborator-side errors (auth, quota, request shape) compose into the
//! same `{code, message, retryable}` wire shape.

use thiserror::Error;

/// Transport-level failures from the generation client.
///
/// The client decides retryability before surfacing a failure; the
/// orchestrator re-raises these immediately without spending stage budget.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("text generation request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("text generation request failed: {message}")]
    Failure { message: String, retryable: bool },
}

impl ClientError {
    pub fn failure(message: impl Into<String>, retryable: bool) -> Self {
        ClientError::Failure {
            message: message.into(),
            retryable,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ClientError::Timeout { .. } => "OPENAI_TIMEOUT",
            ClientError::Failure { .. } => "OPENAI_ERROR",
        }
    }

    pub fn retryable(&self) -> bool {
        match self {
            ClientError::Timeout { .. } => true,
            ClientError::Failure { retryable, .. } => *retryable,
        }
    }
}

/// Terminal failure of one orchestration run.
///
/// Exactly one of these is surfaced per failed run; validation variants carry
/// the full accumulated violation list so callers can report the complete
/// defect set from a single attempt chain.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("text generation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("text generation failed: {message}")]
    Generation { message: String, retryable: bool },

    #[error("outline rejected after {attempts} attempt(s): {}", violations.join("; "))]
    OutlineValidation {
        attempts: u32,
        violations: Vec<String>,
    },

    #[error("final activity rejected after {attempts} attempt(s): {}", violations.join("; "))]
    FinalValidation {
        attempts: u32,
        violations: Vec<String>,
    },

    #[error("candidate too similar to recent concepts (score {score:.2})")]
    NoveltyRejected {
        score: f64,
        most_similar: Option<String>,
    },
}

impl OrchestratorError {
    pub fn code(&self) -> &'static str {
        match self {
            OrchestratorError::Timeout { .. } => "OPENAI_TIMEOUT",
            OrchestratorError::Generation { .. } => "OPENAI_ERROR",
            OrchestratorError::OutlineValidation { .. } => "OUTLINE_VALIDATION_FAILED",
            OrchestratorError::FinalValidation { .. } => "FINAL_VALIDATION_FAILED",
            OrchestratorError::NoveltyRejected { .. } => "NOVELTY_CHECK_FAILED",
        }
    }

    pub fn retryable(&self) -> bool {
        match self {
            OrchestratorError::Timeout { .. } => true,
            OrchestratorError::Generation { retryable, .. } => *retryable,
            OrchestratorError::OutlineValidation { .. } => false,
            OrchestratorError::FinalValidation { .. } => false,
            OrchestratorError::NoveltyRejected { .. } => false,
        }
    }

    /// Violation messages for validation failures; empty for other kinds.
    pub fn violations(&self) -> &[String] {
        match self {
            OrchestratorError::OutlineValidation { violations, .. }
            | OrchestratorError::FinalValidation { violations, .. } => violations,
            _ => &[],
        }
    }
}

impl From<ClientError> for OrchestratorError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Timeout { timeout_ms } => OrchestratorError::Timeout { timeout_ms },
            ClientError::Failure { message, retryable } => {
                OrchestratorError::Generation { message, retryable }
            }
        }
    }
}
