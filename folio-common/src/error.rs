//! Common error types for folio

use thiserror::Error;

/// Common result type for folio operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the folio crates
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for errors that may clear on retry (lock contention and
    /// interrupted IO), false for everything that needs a caller decision.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Database(err) => err.to_string().contains("database is locked"),
            Error::Io(err) => err.kind() == std::io::ErrorKind::Interrupted,
            _ => false,
        }
    }
}
