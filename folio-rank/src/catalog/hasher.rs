//! Streamed content hashing on a bounded worker pool
//!
//! SHA-256 over file contents in fixed-size chunks. The pool is sized
//! from configuration so scans cannot starve the caller's threads, and
//! cancellation is honored between chunks.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use rayon::prelude::*;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

/// Why a single file failed to hash.
#[derive(Debug)]
pub enum HashFileError {
    Cancelled,
    Io(std::io::Error),
}

/// Bounded hashing pool.
pub struct HashPool {
    pool: rayon::ThreadPool,
    chunk_bytes: usize,
}

impl HashPool {
    pub fn new(workers: usize, chunk_bytes: usize) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("folio-hash-{i}"))
            .build()
            .expect("hash pool construction cannot fail with nonzero workers");
        Self { pool, chunk_bytes }
    }

    /// Hash one file, checking for cancellation at every chunk boundary.
    pub fn hash_file(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<String, HashFileError> {
        hash_file_chunked(path, self.chunk_bytes, cancel)
    }

    /// Run `work` over `items` inside the bounded pool, preserving input
    /// order in the output.
    pub fn map<T, U, F>(&self, items: Vec<T>, work: F) -> Vec<U>
    where
        T: Send + Sync,
        U: Send,
        F: Fn(&T) -> U + Sync + Send,
    {
        self.pool
            .install(|| items.par_iter().map(|item| work(item)).collect())
    }
}

fn hash_file_chunked(
    path: &Path,
    chunk_bytes: usize,
    cancel: &CancellationToken,
) -> Result<String, HashFileError> {
    let mut file = File::open(path).map_err(HashFileError::Io)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; chunk_bytes];

    loop {
        if cancel.is_cancelled() {
            return Err(HashFileError::Cancelled);
        }
        let bytes_read = file.read(&mut buffer).map_err(HashFileError::Io)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// One-shot digest of an in-memory payload, hex encoded.
pub fn digest_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
