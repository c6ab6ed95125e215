/// Unified error handling for charla
///
/// This module provides the error types shared by the registry, the registry
/// client and the gateway: transport errors, configuration errors, quota
/// invariant violations and internal aggregation failures.

use std::fmt;
use std::io;
use thiserror::Error;

/// Main error type for charla operations
#[derive(Debug, Error)]
pub enum CharlaError {
    /// Socket-level errors (binding, local address resolution)
    #[error("Network error: {0}")]
    Network(#[from] io::Error),

    /// HTTP client errors talking to the registry or a backend
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Malformed JSON payloads
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Service registry errors
    #[error("Registry error: {message}")]
    Registry { message: String },

    /// Backend call errors
    #[error("Backend error: {message}")]
    Backend { message: String },

    /// A quota slot was released without having been acquired
    #[error("Quota invariant violated: release called for uid {uid} with no request in flight")]
    QuotaViolation { uid: String },

    /// Timeout errors
    #[error("Operation timed out: {operation}")]
    Timeout { operation: String },

    /// Internal errors (should not happen in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Result type alias for charla operations
pub type CharlaResult<T> = Result<T, CharlaError>;

impl CharlaError {
    /// Create a registry error
    pub fn registry<S: Into<String>>(message: S) -> Self {
        CharlaError::Registry {
            message: message.into(),
        }
    }

    /// Create a backend error
    pub fn backend<S: Into<String>>(message: S) -> Self {
        CharlaError::Backend {
            message: message.into(),
        }
    }

    /// Create a quota invariant violation
    pub fn quota_violation<S: Into<String>>(uid: S) -> Self {
        CharlaError::QuotaViolation { uid: uid.into() }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S) -> Self {
        CharlaError::Timeout {
            operation: operation.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        CharlaError::Internal {
            message: message.into(),
        }
    }

    /// Check if this error is recoverable (the next loop iteration may succeed)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CharlaError::Network(_)
                | CharlaError::Http(_)
                | CharlaError::Registry { .. }
                | CharlaError::Backend { .. }
                | CharlaError::Timeout { .. }
        )
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            CharlaError::Config(_) => ErrorSeverity::Critical,
            CharlaError::QuotaViolation { .. } => ErrorSeverity::Critical,
            CharlaError::Internal { .. } => ErrorSeverity::Critical,
            CharlaError::Network(_) => ErrorSeverity::Warning,
            CharlaError::Http(_) => ErrorSeverity::Warning,
            CharlaError::Backend { .. } => ErrorSeverity::Warning,
            CharlaError::Timeout { .. } => ErrorSeverity::Warning,
            CharlaError::Registry { .. } => ErrorSeverity::Warning,
            CharlaError::Json(_) => ErrorSeverity::Error,
        }
    }
}

/// Error severity levels for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Critical errors that require immediate attention
    Critical,
    /// Errors that affect functionality but don't crash the system
    Error,
    /// Warnings about potential issues
    Warning,
    /// Informational messages about recoverable issues
    Info,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorSeverity::Critical => write!(f, "CRITICAL"),
            ErrorSeverity::Error => write!(f, "ERROR"),
            ErrorSeverity::Warning => write!(f, "WARNING"),
            ErrorSeverity::Info => write!(f, "INFO"),
        }
    }
}
