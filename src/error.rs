use std::fmt;

/// Unified error type for the toolbridge crate.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreError {
    /// No registry entry exists for the requested id.
    NotFound(String),
    /// The entry exists but the remote plane no longer advertises it.
    Unavailable(String),
    /// Invalid input provided by the caller.
    InvalidInput(String),
    /// The remote control-plane returned an error or was unreachable.
    Remote(String),
    /// Internal error.
    Internal(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::NotFound(msg) => write!(f, "not found: {msg}"),
            CoreError::Unavailable(msg) => write!(f, "unavailable: {msg}"),
            CoreError::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            CoreError::Remote(msg) => write!(f, "remote error: {msg}"),
            CoreError::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for CoreError {}

/// Result type alias using [`CoreError`].
pub type CoreResult<T> = Result<T, CoreError>;
