//! Centralized error types for Sift.
//!
//! Three layers, from the outside in:
//! - [`SiftError`] is what a caller of the engine sees. Only fatal runs and
//!   setup problems end up here.
//! - [`StageError`] is what a stage unit reports. The engine records it in
//!   `stage_errors` and substitutes the stage default.
//! - [`CollaboratorError`] is what an external capability returns.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::model::StageName;

/// External capability that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Generation,
    Embedding,
    DocumentSearch,
    SimilarityIndex,
    ChartRendering,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::Embedding => "embedding",
            Self::DocumentSearch => "document_search",
            Self::SimilarityIndex => "similarity_index",
            Self::ChartRendering => "chart_rendering",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by an external collaborator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    /// Network failure, timeout, rate limit or server error. Retried.
    #[error("{capability} unavailable: {message}")]
    Unavailable {
        capability: Capability,
        message: String,
    },

    /// Authentication, quota or request errors. Not retried.
    #[error("{capability} rejected the request: {message}")]
    Rejected {
        capability: Capability,
        message: String,
    },

    /// The collaborator answered but the payload could not be used.
    #[error("{capability} returned a malformed response: {message}")]
    Malformed {
        capability: Capability,
        message: String,
    },
}

impl CollaboratorError {
    pub fn unavailable(capability: Capability, message: impl Into<String>) -> Self {
        Self::Unavailable {
            capability,
            message: message.into(),
        }
    }

    pub fn rejected(capability: Capability, message: impl Into<String>) -> Self {
        Self::Rejected {
            capability,
            message: message.into(),
        }
    }

    pub fn malformed(capability: Capability, message: impl Into<String>) -> Self {
        Self::Malformed {
            capability,
            message: message.into(),
        }
    }

    /// Classify a non-success HTTP status.
    ///
    /// 408, 429 and 5xx are transient; everything else is a rejection.
    pub fn from_status(capability: Capability, status: u16, body: &str) -> Self {
        let message = if body.is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, body)
        };
        match status {
            408 | 429 | 500..=599 => Self::unavailable(capability, message),
            _ => Self::rejected(capability, message),
        }
    }

    pub fn capability(&self) -> Capability {
        match self {
            Self::Unavailable { capability, .. }
            | Self::Rejected { capability, .. }
            | Self::Malformed { capability, .. } => *capability,
        }
    }

    /// Whether retrying the same call can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

/// Error reported by a stage unit.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageError {
    #[error("{capability} unavailable: {message}")]
    CollaboratorUnavailable {
        capability: Capability,
        message: String,
    },

    #[error("Malformed input: {message}")]
    MalformedInput { message: String },

    #[error("Stage failed: {message}")]
    Failed { message: String },

    /// The stage produced output but in a reduced form.
    #[error("Degraded: {message}")]
    Degraded { message: String },

    /// A required state field is absent. Aborts the run.
    #[error("Structural violation: {message}")]
    StructuralViolation { message: String },
}

impl StageError {
    pub fn malformed_input(message: impl Into<String>) -> Self {
        Self::MalformedInput {
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::Degraded {
            message: message.into(),
        }
    }

    pub fn structural(message: impl Into<String>) -> Self {
        Self::StructuralViolation {
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StructuralViolation { .. })
    }
}

impl From<CollaboratorError> for StageError {
    fn from(err: CollaboratorError) -> Self {
        let capability = err.capability();
        let message = match err {
            CollaboratorError::Unavailable { message, .. }
            | CollaboratorError::Rejected { message, .. }
            | CollaboratorError::Malformed { message, .. } => message,
        };
        Self::CollaboratorUnavailable {
            capability,
            message,
        }
    }
}

/// Main error type for Sift operations.
#[derive(Error, Debug)]
pub enum SiftError {
    #[error("Research run for '{query}' aborted in stage '{stage}': {reason}")]
    Fatal {
        query: String,
        stage: StageName,
        reason: String,
    },

    #[error("Index corruption: {0}")]
    IndexCorruption(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type for Sift operations.
pub type SiftResult<T> = Result<T, SiftError>;

impl SiftError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let err = CollaboratorError::from_status(Capability::Generation, 429, "slow down");
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "generation unavailable: HTTP 429: slow down");

        let err = CollaboratorError::from_status(Capability::Generation, 503, "");
        assert!(err.is_transient());

        let err = CollaboratorError::from_status(Capability::Embedding, 401, "bad key");
        assert!(!err.is_transient());
        assert_eq!(err.capability(), Capability::Embedding);
    }

    #[test]
    fn test_collaborator_error_downgrades_to_stage_error() {
        let err = CollaboratorError::rejected(Capability::DocumentSearch, "quota exceeded");
        let stage: StageError = err.into();
        assert_eq!(
            stage,
            StageError::CollaboratorUnavailable {
                capability: Capability::DocumentSearch,
                message: "quota exceeded".to_string(),
            }
        );
        assert!(!stage.is_fatal());
        assert!(StageError::structural("analysis missing").is_fatal());
    }

    #[test]
    fn test_stage_error_serializes_with_kind_tag() {
        let json = serde_json::to_value(StageError::malformed_input("empty query")).unwrap();
        assert_eq!(json["kind"], "malformed_input");
        assert_eq!(json["message"], "empty query");
    }
}
