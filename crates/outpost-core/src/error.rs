//! OutPost error type: one enum shared by every crate in the workspace.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, OutPostError>;

/// All OutPost errors.
#[derive(Error, Debug)]
pub enum OutPostError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Capability error: {0}")]
    Capability(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl OutPostError {
    /// Shorthand for a store error from any displayable cause.
    pub fn store(msg: impl std::fmt::Display) -> Self {
        Self::Store(msg.to_string())
    }

    /// Shorthand for a config error.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    /// Shorthand for a capability error.
    pub fn capability(msg: impl std::fmt::Display) -> Self {
        Self::Capability(msg.to_string())
    }
}
