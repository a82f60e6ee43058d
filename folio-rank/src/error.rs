//! Error types for the ranking engine
//!
//! Every coordinator operation returns `EngineResult`; callers branch on
//! the variant, outer layers map `kind()` to a wire tag. Only genuinely
//! fatal conditions (database unreachable, invariant violations) travel
//! through the `Storage` variant.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine error taxonomy
#[derive(Debug, Error)]
pub enum EngineError {
    /// No image root configured yet
    #[error("No image directory has been set")]
    NoDirectorySet,

    /// Fewer than two eligible images remain after pool filtering
    #[error("Not enough eligible images to form a pair")]
    NotEnoughImages,

    /// Choice quoted a round that is no longer current
    #[error("Stale round: expected {expected}, got {got}")]
    StaleRound { expected: i64, got: i64 },

    /// Strict mode: the submitted pair is not the pair that was issued
    #[error("Submitted pair does not match the issued pair for this round")]
    DigestMismatch,

    /// Digest is well-formed but unknown to the catalog
    #[error("Unknown digest: {0}")]
    UnknownDigest(String),

    /// Digest is not 64 lowercase hex characters
    #[error("Malformed digest: {0}")]
    InvalidDigest(String),

    /// Both slots of a submitted pair name the same image
    #[error("A pair cannot contain the same image twice")]
    SelfPair,

    /// Storage stayed contended through every retry attempt
    #[error("Storage contention: {0}")]
    Contention(String),

    /// Outcome string is not LEFT, RIGHT, or SKIP
    #[error("Invalid outcome: {0}")]
    InvalidOutcome(String),

    /// Scan root does not exist or is not a directory
    #[error("Directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    /// Scan discovered more files than the configured cap
    #[error("Too many files: found {found}, limit {limit}")]
    TooManyFiles { found: usize, limit: usize },

    /// Catalog entry exists but the file no longer matches it
    #[error("File missing or changed for digest {0}")]
    FileMissing(String),

    /// Scan was cancelled cooperatively
    #[error("Scan cancelled")]
    ScanCancelled,

    /// record_choice transaction exceeded its deadline; round unchanged
    #[error("Choice transaction timed out")]
    Timeout,

    /// Storage failure after retries, or any other fatal condition
    #[error("Storage error: {0}")]
    Storage(#[from] folio_common::Error),
}

impl EngineError {
    /// Stable machine-readable tag for the outer layer.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NoDirectorySet => "NO_DIRECTORY_SET",
            EngineError::NotEnoughImages => "NOT_ENOUGH_IMAGES",
            EngineError::StaleRound { .. } => "STALE_ROUND",
            EngineError::DigestMismatch => "DIGEST_MISMATCH",
            EngineError::UnknownDigest(_) => "UNKNOWN_DIGEST",
            EngineError::InvalidDigest(_) => "INVALID_DIGEST",
            EngineError::SelfPair => "SELF_PAIR",
            EngineError::Contention(_) => "CONFLICT",
            EngineError::InvalidOutcome(_) => "INVALID_OUTCOME",
            EngineError::DirectoryNotFound(_) => "DIRECTORY_NOT_FOUND",
            EngineError::TooManyFiles { .. } => "TOO_MANY_FILES",
            EngineError::FileMissing(_) => "FILE_MISSING",
            EngineError::ScanCancelled => "SCAN_CANCELLED",
            EngineError::Timeout => "TIMEOUT",
            EngineError::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Conflict-class errors: the caller's view of state is outdated and
    /// a retry with fresh state is reasonable.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            EngineError::StaleRound { .. }
                | EngineError::DigestMismatch
                | EngineError::Contention(_)
        )
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Storage(folio_common::Error::Database(err))
    }
}
