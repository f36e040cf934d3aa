//! Crate-level error types for `ragloom-kernel`.
//!
//! Every fallible operation in the kernel and the foundation crate returns
//! [`KernelResult`]. Errors are `Clone` because the workflow engine carries
//! them inside error events and replays them across retries.
//!
//! # Usage
//!
//! ```rust,ignore
//! use ragloom_kernel::error::{ErrorKind, KernelError, KernelResult};
//!
//! fn embed(node_id: &str) -> KernelResult<Vec<f32>> {
//!     Err(KernelError::embed_failed(node_id, "provider unavailable"))
//! }
//!
//! let err = embed("n-1").unwrap_err();
//! assert_eq!(err.kind(), ErrorKind::EmbedFailed);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type used throughout the toolkit.
pub type KernelResult<T> = Result<T, KernelError>;

/// Taxonomy tag of a [`KernelError`].
///
/// Callers branch on the kind rather than on variant shapes, so variants can
/// grow fields without breaking matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorKind {
    ConfigInvalid,
    InvalidKind,
    LlmRequired,
    LlmFailed,
    EmbedFailed,
    DimMismatch,
    MetadataTooLarge,
    TypeMismatch,
    NotFound,
    Cancelled,
    Timeout,
    Panic,
    HandlerFailed,
    Serialization,
}

impl ErrorKind {
    /// Wire name of the kind (`"CONFIG_INVALID"`, `"LLM_FAILED"`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConfigInvalid => "CONFIG_INVALID",
            Self::InvalidKind => "INVALID_KIND",
            Self::LlmRequired => "LLM_REQUIRED",
            Self::LlmFailed => "LLM_FAILED",
            Self::EmbedFailed => "EMBED_FAILED",
            Self::DimMismatch => "DIM_MISMATCH",
            Self::MetadataTooLarge => "METADATA_TOO_LARGE",
            Self::TypeMismatch => "TYPE_MISMATCH",
            Self::NotFound => "NOT_FOUND",
            Self::Cancelled => "CANCELLED",
            Self::Timeout => "TIMEOUT",
            Self::Panic => "PANIC",
            Self::HandlerFailed => "HANDLER_FAILED",
            Self::Serialization => "SERIALIZATION",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Crate-level error type.
#[derive(Debug, Clone, Error, PartialEq)]
#[non_exhaustive]
pub enum KernelError {
    /// A parameter or registration is invalid; raised before any work is done.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// A kind-specific field was requested on a node of another kind.
    #[error("Invalid node kind: expected {expected}, found {actual}")]
    InvalidKind { expected: String, actual: String },

    /// A component needs an LLM collaborator but none was configured.
    #[error("LLM required: {0}")]
    LlmRequired(String),

    /// The LLM collaborator returned an error.
    #[error("LLM call failed: {0}")]
    LlmFailed(String),

    /// The embedding collaborator failed for a specific node.
    #[error("Embedding failed for node {node_id}: {message}")]
    EmbedFailed { node_id: String, message: String },

    /// Two vectors of different dimensions were compared or stored together.
    #[error("Dimension mismatch: {left} vs {right}")]
    DimMismatch { left: usize, right: usize },

    /// The rendered metadata prefix leaves no room for content.
    #[error("Metadata length {metadata_len} is not smaller than chunk size {chunk_size}")]
    MetadataTooLarge {
        metadata_len: usize,
        chunk_size: usize,
    },

    /// A stored value could not be coerced to the requested type.
    #[error("Type mismatch for key '{key}': expected {expected}")]
    TypeMismatch { key: String, expected: String },

    /// A lookup by id or key found nothing.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Cooperative cancellation was observed.
    #[error("Operation was cancelled")]
    Cancelled,

    /// A wall-clock deadline expired.
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },

    /// A handler panicked; the payload is the recovered panic message.
    #[error("Handler panicked: {0}")]
    Panic(String),

    /// A workflow step failed.
    #[error("Step '{step}' failed: {message}")]
    HandlerFailed { step: String, message: String },

    /// A JSON (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl KernelError {
    /// Taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigInvalid(_) => ErrorKind::ConfigInvalid,
            Self::InvalidKind { .. } => ErrorKind::InvalidKind,
            Self::LlmRequired(_) => ErrorKind::LlmRequired,
            Self::LlmFailed(_) => ErrorKind::LlmFailed,
            Self::EmbedFailed { .. } => ErrorKind::EmbedFailed,
            Self::DimMismatch { .. } => ErrorKind::DimMismatch,
            Self::MetadataTooLarge { .. } => ErrorKind::MetadataTooLarge,
            Self::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Panic(_) => ErrorKind::Panic,
            Self::HandlerFailed { .. } => ErrorKind::HandlerFailed,
            Self::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Whether the failure is worth retrying with the same input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::LlmFailed | ErrorKind::EmbedFailed | ErrorKind::Timeout
        )
    }

    pub fn invalid_kind(expected: impl fmt::Display, actual: impl fmt::Display) -> Self {
        Self::InvalidKind {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Wrap a provider failure, keeping the cause's message.
    pub fn llm_failed(cause: impl fmt::Display) -> Self {
        Self::LlmFailed(cause.to_string())
    }

    pub fn embed_failed(node_id: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self::EmbedFailed {
            node_id: node_id.into(),
            message: cause.to_string(),
        }
    }

    pub fn type_mismatch(key: impl Into<String>, expected: impl Into<String>) -> Self {
        Self::TypeMismatch {
            key: key.into(),
            expected: expected.into(),
        }
    }

    pub fn handler_failed(step: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self::HandlerFailed {
            step: step.into(),
            message: cause.to_string(),
        }
    }

    pub fn timeout(duration_ms: u64) -> Self {
        Self::Timeout { duration_ms }
    }
}

impl From<serde_json::Error> for KernelError {
    fn from(err: serde_json::Error) -> Self {
        KernelError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(
            KernelError::ConfigInvalid("overlap".into()).kind(),
            ErrorKind::ConfigInvalid
        );
        assert_eq!(KernelError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(
            KernelError::embed_failed("n1", "boom").kind(),
            ErrorKind::EmbedFailed
        );
        assert_eq!(KernelError::timeout(10).kind(), ErrorKind::Timeout);
    }

    #[test]
    fn embed_failed_keeps_node_id() {
        let err = KernelError::embed_failed("node-7", "rate limited");
        assert!(err.to_string().contains("node-7"));
        assert!(err.to_string().contains("rate limited"));
    }

    #[test]
    fn retryable_kinds() {
        assert!(KernelError::llm_failed("503").is_retryable());
        assert!(KernelError::timeout(5).is_retryable());
        assert!(!KernelError::ConfigInvalid("x".into()).is_retryable());
        assert!(!KernelError::Cancelled.is_retryable());
    }

    #[test]
    fn serde_error_converts_via_from() {
        let bad = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: KernelError = bad.into();
        assert_eq!(err.kind(), ErrorKind::Serialization);
    }

    #[test]
    fn kind_wire_names() {
        assert_eq!(ErrorKind::MetadataTooLarge.to_string(), "METADATA_TOO_LARGE");
        assert_eq!(
            serde_json::to_string(&ErrorKind::HandlerFailed).unwrap(),
            "\"HANDLER_FAILED\""
        );
    }
}
