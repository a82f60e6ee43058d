//! Database initialization
//!
//! Creates the database on first run and brings the schema up
//! idempotently. Safe to call on every startup.

use std::path::Path;

use sqlx::SqlitePool;
use tracing::info;

use crate::Result;

/// Open (creating if needed) the database at `db_path` and ensure the
/// schema exists.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePool::connect(&db_url).await?;

    if newly_created {
        info!(path = %db_path.display(), "Initialized new database");
    } else {
        info!(path = %db_path.display(), "Opened existing database");
    }

    configure_connection(&pool).await?;
    create_schema(&pool).await?;

    Ok(pool)
}

/// In-memory database with full schema, for tests. Capped at a single
/// connection: each SQLite in-memory connection is its own database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    configure_connection(&pool).await?;
    create_schema(&pool).await?;
    Ok(pool)
}

async fn configure_connection(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;
    sqlx::query("PRAGMA busy_timeout = 5000").execute(pool).await?;
    sqlx::query("PRAGMA journal_mode = WAL").execute(pool).await?;
    Ok(())
}

/// Create all tables and the app_state singleton row. Idempotent.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    let mut tx = pool.begin().await?;

    // Images: posterior state keyed by content digest.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS images (
            digest TEXT PRIMARY KEY CHECK (length(digest) = 64),
            mu REAL NOT NULL DEFAULT 1500.0,
            sigma REAL NOT NULL DEFAULT 350.0,
            exposures INTEGER NOT NULL DEFAULT 0,
            likes INTEGER NOT NULL DEFAULT 0,
            unlikes INTEGER NOT NULL DEFAULT 0,
            skips INTEGER NOT NULL DEFAULT 0,
            last_seen_round INTEGER NOT NULL DEFAULT 0,
            next_eligible_round INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            CHECK (sigma > 0),
            CHECK (exposures = likes + unlikes + skips)
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_images_mu_sigma ON images(mu DESC, sigma ASC)")
        .execute(&mut *tx)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_images_exposures ON images(exposures)")
        .execute(&mut *tx)
        .await?;

    // Choices: append-only audit log keyed by round.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS choices (
            round INTEGER PRIMARY KEY,
            left_digest TEXT NOT NULL,
            right_digest TEXT NOT NULL,
            outcome TEXT NOT NULL CHECK (outcome IN ('LEFT', 'RIGHT', 'SKIP')),
            left_mu_before REAL NOT NULL,
            left_mu_after REAL NOT NULL,
            right_mu_before REAL NOT NULL,
            right_mu_after REAL NOT NULL,
            left_sigma_before REAL NOT NULL,
            left_sigma_after REAL NOT NULL,
            right_sigma_before REAL NOT NULL,
            right_sigma_after REAL NOT NULL,
            recorded_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            CHECK (left_digest != right_digest)
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // App state: singleton row with the round counter and the serialized
    // recency / top-K ring buffers.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS app_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            current_round INTEGER NOT NULL DEFAULT 1,
            recent_images TEXT NOT NULL DEFAULT '[]',
            recent_pairs TEXT NOT NULL DEFAULT '[]',
            top_k_history TEXT NOT NULL DEFAULT '[]'
        )
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO app_state (id, current_round) VALUES (1, 1)")
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}
