//! Unified error types for clinguard.
//!
//! Each collaborator boundary (model, scenario catalog, transcript store,
//! configuration) has its own error enum and result alias. Catalog, storage
//! and configuration errors convert into [`GuardError`], the type returned
//! by the orchestrator. Model errors stop at the orchestrator, which replaces
//! a failed call with the fallback reply.
//!
//! Classifier faults never reach [`GuardError`]: a broken
//! rule is logged and treated as "not flagged", it never aborts a turn.

use std::time::Duration;

// ============================================================================
// Main Error Type
// ============================================================================

/// The main error type for clinguard operations.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// Scenario catalog error.
    #[error("catalog: {0}")]
    Catalog(#[from] CatalogError),

    /// Transcript store error.
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    /// Configuration error.
    #[error("config: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for clinguard operations.
pub type Result<T> = std::result::Result<T, GuardError>;

// ============================================================================
// Model Collaborator Errors
// ============================================================================

/// Error type for model-generation calls.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The call did not finish within the configured timeout.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// Network or connection failure.
    #[error("transport: {0}")]
    Transport(String),

    /// The collaborator answered but the answer was unusable.
    #[error("response: {0}")]
    Response(String),
}

impl ModelError {
    /// Create a transport error.
    #[inline]
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a response error.
    #[inline]
    pub fn response(msg: impl Into<String>) -> Self {
        Self::Response(msg.into())
    }
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::response(err.to_string())
        } else {
            Self::transport(err.to_string())
        }
    }
}

/// Result type for model calls.
pub type ModelResult<T> = std::result::Result<T, ModelError>;

// ============================================================================
// Catalog Errors
// ============================================================================

/// Error type for scenario catalog lookups.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// No scenario registered under the key.
    #[error("unknown scenario: {0}")]
    NotFound(String),

    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("parse: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type for catalog operations.
pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

// ============================================================================
// Storage Errors
// ============================================================================

/// Error type for transcript storage.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ============================================================================
// Configuration Errors
// ============================================================================

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("parse: {0}")]
    Parse(#[from] serde_json::Error),

    /// Invalid value.
    #[error("invalid: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Create an invalid value error.
    #[inline]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// ============================================================================
// Classifier Faults
// ============================================================================

/// A rule evaluator failed (malformed pattern, failing custom matcher).
///
/// Never propagated to callers: the rule table logs it and treats the rule
/// as not matching.
#[derive(Debug, Clone, thiserror::Error)]
#[error("rule '{rule}' failed: {reason}")]
pub struct ClassifierFault {
    /// Name of the rule that failed.
    pub rule: String,
    /// Why it failed.
    pub reason: String,
}

impl ClassifierFault {
    /// Create a fault for the named rule.
    #[inline]
    pub fn new(rule: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            reason: reason.into(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
