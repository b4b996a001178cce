//! Domain error types
//!
//! Errors raised while building domain entities from remote listings or
//! validating folder configuration.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// The exclusion pattern of a sync folder does not compile
    #[error("Invalid exclusion pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// The pattern as configured
        pattern: String,
        /// Compiler message
        reason: String,
    },

    /// A base64 field could not be decoded
    #[error("Invalid base64 in field '{0}'")]
    InvalidEncoding(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
