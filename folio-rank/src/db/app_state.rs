//! Singleton application state
//!
//! The monotonic round counter plus the recency and top-K ring buffers,
//! persisted as JSON TEXT columns in the single app_state row.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, SqliteConnection};

use folio_common::{Error, Result};

/// The coordinator's ring buffers, serialized into app_state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionRings {
    /// Last shown digests, oldest first.
    pub recent_images: VecDeque<String>,
    /// Last shown unordered pairs, canonical order within each pair.
    pub recent_pairs: VecDeque<(String, String)>,
    /// Top-K rankings recorded after each committed choice.
    pub top_k_history: VecDeque<Vec<String>>,
}

/// Load the round counter and ring buffers.
pub async fn load<'e, E>(executor: E) -> Result<(i64, SessionRings)>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: (i64, String, String, String) = sqlx::query_as(
        "SELECT current_round, recent_images, recent_pairs, top_k_history FROM app_state WHERE id = 1",
    )
    .fetch_one(executor)
    .await?;

    let rings = SessionRings {
        recent_images: parse_ring(&row.1, "recent_images")?,
        recent_pairs: parse_ring(&row.2, "recent_pairs")?,
        top_k_history: parse_ring(&row.3, "top_k_history")?,
    };
    Ok((row.0, rings))
}

fn parse_ring<T: serde::de::DeserializeOwned>(raw: &str, column: &str) -> Result<T> {
    serde_json::from_str(raw)
        .map_err(|e| Error::Internal(format!("corrupt app_state.{column}: {e}")))
}

pub async fn current_round<'e, E>(executor: E) -> Result<i64>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    Ok(
        sqlx::query_scalar("SELECT current_round FROM app_state WHERE id = 1")
            .fetch_one(executor)
            .await?,
    )
}

/// Persist the ring buffers without touching the round counter.
pub async fn save_rings(conn: &mut SqliteConnection, rings: &SessionRings) -> Result<()> {
    sqlx::query(
        "UPDATE app_state SET recent_images = ?, recent_pairs = ?, top_k_history = ? WHERE id = 1",
    )
    .bind(serialize_ring(&rings.recent_images)?)
    .bind(serialize_ring(&rings.recent_pairs)?)
    .bind(serialize_ring(&rings.top_k_history)?)
    .execute(conn)
    .await?;
    Ok(())
}

fn serialize_ring<T: Serialize>(ring: &T) -> Result<String> {
    serde_json::to_string(ring).map_err(|e| Error::Internal(format!("serialize ring: {e}")))
}

/// Advance the round counter by exactly one, guarded against concurrent
/// movement. The coordinator lock should make the guard unreachable; a
/// trip means an invariant was violated elsewhere.
pub async fn advance_round(conn: &mut SqliteConnection, expected: i64) -> Result<i64> {
    let result = sqlx::query(
        "UPDATE app_state SET current_round = current_round + 1 WHERE id = 1 AND current_round = ?",
    )
    .bind(expected)
    .execute(conn)
    .await?;

    if result.rows_affected() != 1 {
        return Err(Error::Internal(format!(
            "round counter moved during commit (expected {expected})"
        )));
    }
    Ok(expected + 1)
}

/// Reset to the initial state: round 1, empty rings.
pub async fn reset(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query(
        "UPDATE app_state SET current_round = 1, recent_images = '[]', recent_pairs = '[]', top_k_history = '[]' WHERE id = 1",
    )
    .execute(conn)
    .await?;
    Ok(())
}
