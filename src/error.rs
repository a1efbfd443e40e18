//! Error types for callgate.

use thiserror::Error;

/// Main error type for callgate operations.
#[derive(Error, Debug)]
pub enum CallgateError {
    /// Configuration could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration parsed but holds an unusable value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A limiter was built without a callable to wrap
    #[error("No callable supplied to the rate limiter")]
    MissingCallable,

    /// No tokio runtime was available to drive the limiter's timers
    #[error("No tokio runtime available to schedule timers")]
    NoRuntime,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for callgate operations.
pub type Result<T> = std::result::Result<T, CallgateError>;
