//! Error types for treadmill-core

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    /// Phase or rate-limiter configuration is invalid. Raised while building
    /// the per-phase policy objects, before any worker thread starts.
    #[error("configuration error: {0}")]
    Config(String),

    /// A worker thread failed mid-run. The run has already been aborted by
    /// the time this surfaces.
    #[error("worker error: {0}")]
    Worker(String),
}

impl Error {
    /// Shorthand for an [`Error::Config`] with the given message.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Shorthand for an [`Error::Worker`] with the given message.
    pub fn worker(msg: impl Into<String>) -> Self {
        Error::Worker(msg.into())
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
