//! Error types shared across RAMS crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised by shared helpers
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Invalid role: {0}")]
    InvalidRole(String),

    #[error("Invalid actor id: {0}")]
    InvalidActorId(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
