//! Specification and configuration errors

use crate::expression::ExpressionError;
use std::path::PathBuf;

/// Invalid or missing specification / configuration
#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    /// Store name not present in the configuration
    #[error("unknown store '{0}'")]
    UnknownStore(String),

    /// Spec id not registered
    #[error("unknown specification '{0}'")]
    UnknownSpec(String),

    /// Spec id used twice within one store
    #[error("specification id '{0}' is defined more than once")]
    DuplicateSpec(String),

    /// Structural problem in one spec
    #[error("specification '{spec}': {message}")]
    Invalid {
        /// Spec id
        spec: String,
        /// What is wrong
        message: String,
    },

    /// A computed field failed to validate
    #[error("specification '{spec}' computed fields: {source}")]
    Expression {
        /// Spec id
        spec: String,
        /// Underlying error
        #[source]
        source: ExpressionError,
    },

    /// Configuration-level problem outside any spec
    #[error("configuration: {0}")]
    Config(String),

    /// Configuration file unreadable
    #[error("failed to read {path}: {source}")]
    Io {
        /// File path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Configuration file not parseable
    #[error("failed to parse {format} configuration: {message}")]
    Parse {
        /// `json`, `yaml` or `toml`
        format: &'static str,
        /// Parser message
        message: String,
    },
}

impl SpecError {
    /// Create an invalid-spec error
    pub fn invalid(spec: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            spec: spec.into(),
            message: message.into(),
        }
    }
}

/// Result alias for this crate
pub type SpecResult<T> = Result<T, SpecError>;
