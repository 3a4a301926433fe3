//! Error types for alock

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using alock's Error
pub type Result<T> = std::result::Result<T, Error>;

/// alock error types with helpful messages and suggestions
///
/// Releasing a guard twice is not an error: `LockGuard::release` consumes the
/// guard and `Drop` skips guards that were already released.
#[derive(Error, Debug)]
pub enum Error {
    // Name errors (E100-E199)
    #[error("Invalid lock name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    // Resource errors (E200-E299)
    #[error("Lock resource {} is unavailable: {source}", path.display())]
    ResourceUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Acquisition errors (E300-E399)
    #[error("Lock timeout: '{name}' is still held after {}ms", waited.as_millis())]
    LockTimeout { name: String, waited: Duration },

    #[error("Lock acquisition for '{0}' was cancelled")]
    Cancelled(String),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for an `InvalidName` error
    pub(crate) fn invalid_name(name: &str, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidName { .. } => "E100",
            Self::ResourceUnavailable { .. } => "E200",
            Self::LockTimeout { .. } => "E300",
            Self::Cancelled(_) => "E301",
            Self::ConfigError(_) => "E600",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::InvalidName { .. } => Some(
                "Use a non-empty name without '/', '\\', '..' or control characters".to_string(),
            ),
            Self::ResourceUnavailable { path, .. } => Some(format!(
                "Check that {} is writable or set ALOCK_LOCK_DIR",
                path.parent().unwrap_or(path).display()
            )),
            Self::LockTimeout { .. } => {
                Some("Retry later or raise the timeout with --timeout".to_string())
            }
            Self::ConfigError(_) => Some("alock config list".to_string()),
            _ => None,
        }
    }

    /// Whether retrying the same acquisition may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}
