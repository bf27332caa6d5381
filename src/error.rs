/*!
 * Error types for Periscope
 */

use std::fmt;

use crate::tree::TreeError;

pub type Result<T> = std::result::Result<T, PeriscopeError>;

#[derive(Debug)]
pub enum PeriscopeError {
    /// A name lookup yielded zero matches; carries the sorted list of
    /// names that do exist so interactive failures are actionable
    NotFound {
        name: String,
        available: Vec<String>,
    },

    /// A singular lookup yielded more than one match
    NotUnique { name: String, matches: Vec<String> },

    /// The server rejected a requested property path
    InvalidPath { path: String, reason: String },

    /// An awaited asynchronous operation reported a server-side failure
    OperationFailed { entity: String, message: String },

    /// Session-level failure; surfaced to the caller, never retried here
    Connection(String),

    /// Configuration error
    Config(String),

    /// Property tree access error
    Tree(TreeError),

    /// Generic error with message
    Other(String),
}

/// Error category for logging and instrumentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Lookup,
    Ambiguity,
    PropertyPath,
    Task,
    Network,
    Configuration,
    Unknown,
}

impl PeriscopeError {
    /// Check if this error is fatal (should not retry)
    pub fn is_fatal(&self) -> bool {
        match self {
            PeriscopeError::NotFound { .. } => true,
            PeriscopeError::NotUnique { .. } => true,
            PeriscopeError::Config(_) => true,
            PeriscopeError::Tree(_) => true,
            // The awaited operation failed, not the wait machinery
            PeriscopeError::OperationFailed { .. } => true,

            // Recoverable by retrying without the offending path,
            // when the caller opted into path tolerance
            PeriscopeError::InvalidPath { .. } => false,
            PeriscopeError::Connection(_) => false,
            PeriscopeError::Other(_) => false,
        }
    }

    /// Check if this error is transient (worth retrying after the caller
    /// re-establishes the session)
    pub fn is_transient(&self) -> bool {
        matches!(self, PeriscopeError::Connection(_))
    }

    /// Get error category for logging and instrumentation
    pub fn category(&self) -> ErrorCategory {
        match self {
            PeriscopeError::NotFound { .. } => ErrorCategory::Lookup,
            PeriscopeError::NotUnique { .. } => ErrorCategory::Ambiguity,
            PeriscopeError::InvalidPath { .. } => ErrorCategory::PropertyPath,
            PeriscopeError::Tree(_) => ErrorCategory::PropertyPath,
            PeriscopeError::OperationFailed { .. } => ErrorCategory::Task,
            PeriscopeError::Connection(_) => ErrorCategory::Network,
            PeriscopeError::Config(_) => ErrorCategory::Configuration,
            PeriscopeError::Other(_) => ErrorCategory::Unknown,
        }
    }
}

impl fmt::Display for PeriscopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeriscopeError::NotFound { name, available } => {
                if available.is_empty() {
                    write!(f, "'{}' not found", name)
                } else {
                    write!(
                        f,
                        "'{}' not found; available: {}",
                        name,
                        available.join(", ")
                    )
                }
            }
            PeriscopeError::NotUnique { name, matches } => {
                write!(
                    f,
                    "'{}' matches {} objects: {}",
                    name,
                    matches.len(),
                    matches.join(", ")
                )
            }
            PeriscopeError::InvalidPath { path, reason } => {
                write!(f, "invalid property path '{}': {}", path, reason)
            }
            PeriscopeError::OperationFailed { entity, message } => {
                write!(f, "operation on '{}' failed: {}", entity, message)
            }
            PeriscopeError::Connection(msg) => write!(f, "connection failure: {}", msg),
            PeriscopeError::Config(msg) => write!(f, "configuration error: {}", msg),
            PeriscopeError::Tree(e) => write!(f, "property tree error: {}", e),
            PeriscopeError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for PeriscopeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PeriscopeError::Tree(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TreeError> for PeriscopeError {
    fn from(e: TreeError) -> Self {
        PeriscopeError::Tree(e)
    }
}
