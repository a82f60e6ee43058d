//! Shared fixtures for integration tests
#![allow(dead_code)]

use std::path::Path;

use folio_common::db::init_memory_database;
use folio_common::TuningConfig;
use folio_rank::SessionCoordinator;

/// Minimal PNG: valid signature and IHDR, seed byte in the tail so each
/// seed hashes to a distinct digest. The engine sniffs and hashes, never
/// decodes.
pub fn tiny_png(seed: u8) -> Vec<u8> {
    let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    bytes.extend_from_slice(&13u32.to_be_bytes());
    bytes.extend_from_slice(b"IHDR");
    bytes.extend_from_slice(&8u32.to_be_bytes());
    bytes.extend_from_slice(&8u32.to_be_bytes());
    bytes.extend_from_slice(&[8, 6, 0, 0, 0]);
    bytes.extend_from_slice(&[0, 0, 0, 0]);
    bytes.push(seed);
    bytes
}

/// Write `count` distinct images into `dir`.
pub fn seed_images(dir: &Path, count: u8) {
    for i in 0..count {
        std::fs::write(dir.join(format!("img{i:03}.png")), tiny_png(i)).unwrap();
    }
}

/// Coordinator over a fresh in-memory database.
pub async fn coordinator(tuning: TuningConfig) -> SessionCoordinator {
    let (_, session) = coordinator_with_pool(tuning).await;
    session
}

/// Coordinator plus a handle on its pool, for tests that inspect the
/// tables directly.
pub async fn coordinator_with_pool(tuning: TuningConfig) -> (sqlx::SqlitePool, SessionCoordinator) {
    init_tracing();
    let pool = init_memory_database().await.unwrap();
    let session = SessionCoordinator::new(pool.clone(), tuning)
        .await
        .unwrap();
    (pool, session)
}

/// Test log output, honoring RUST_LOG. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Coordinator with default tuning.
pub async fn default_coordinator() -> SessionCoordinator {
    coordinator(TuningConfig::default()).await
}
