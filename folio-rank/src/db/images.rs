//! Image posterior persistence

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{Sqlite, SqliteConnection};

use folio_common::{Error, Result};

use crate::models::ImageRecord;

type ImageRow = (
    String, // digest
    f64,    // mu
    f64,    // sigma
    i64,    // exposures
    i64,    // likes
    i64,    // unlikes
    i64,    // skips
    i64,    // last_seen_round
    i64,    // next_eligible_round
    String, // created_at
);

const SELECT_COLUMNS: &str = "digest, mu, sigma, exposures, likes, unlikes, skips, \
     last_seen_round, next_eligible_round, created_at";

fn map_row(row: ImageRow) -> Result<ImageRecord> {
    Ok(ImageRecord {
        digest: row.0,
        mu: row.1,
        sigma: row.2,
        exposures: row.3,
        likes: row.4,
        unlikes: row.5,
        skips: row.6,
        last_seen_round: row.7,
        next_eligible_round: row.8,
        created_at: parse_timestamp(&row.9)?,
    })
}

/// Parse RFC3339 or SQLite's CURRENT_TIMESTAMP format.
pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(parsed.and_utc());
    }
    Err(Error::Internal(format!("unparseable timestamp: {raw}")))
}

/// Fetch one image row.
pub async fn get_image<'e, E>(executor: E, digest: &str) -> Result<Option<ImageRecord>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let row: Option<ImageRow> = sqlx::query_as(&format!(
        "SELECT {SELECT_COLUMNS} FROM images WHERE digest = ?"
    ))
    .bind(digest)
    .fetch_optional(executor)
    .await?;

    row.map(map_row).transpose()
}

/// Fetch every image row.
pub async fn all_images<'e, E>(executor: E) -> Result<Vec<ImageRecord>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let rows: Vec<ImageRow> =
        sqlx::query_as(&format!("SELECT {SELECT_COLUMNS} FROM images ORDER BY digest"))
            .fetch_all(executor)
            .await?;

    rows.into_iter().map(map_row).collect()
}

pub async fn count_images<'e, E>(executor: E) -> Result<i64>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM images")
        .fetch_one(executor)
        .await?)
}

/// Create rows with initial posteriors for digests not yet known.
/// Existing rows are untouched. Returns how many rows were created.
pub async fn seed_images(
    conn: &mut SqliteConnection,
    digests: &[String],
    initial_mu: f64,
    sigma_initial: f64,
) -> Result<u64> {
    let mut created = 0u64;
    let now = Utc::now().to_rfc3339();
    for digest in digests {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO images (digest, mu, sigma, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(digest)
        .bind(initial_mu)
        .bind(sigma_initial)
        .bind(&now)
        .execute(&mut *conn)
        .await?;
        created += result.rows_affected();
    }
    if created > 0 {
        tracing::debug!(created, "Seeded new image records");
    }
    Ok(created)
}

/// Write back a full posterior row. The row must already exist.
pub async fn update_posterior(conn: &mut SqliteConnection, record: &ImageRecord) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE images SET
            mu = ?, sigma = ?, exposures = ?, likes = ?, unlikes = ?, skips = ?,
            last_seen_round = ?, next_eligible_round = ?
        WHERE digest = ?
        "#,
    )
    .bind(record.mu)
    .bind(record.sigma)
    .bind(record.exposures)
    .bind(record.likes)
    .bind(record.unlikes)
    .bind(record.skips)
    .bind(record.last_seen_round)
    .bind(record.next_eligible_round)
    .bind(&record.digest)
    .execute(conn)
    .await?;

    if result.rows_affected() != 1 {
        return Err(Error::Internal(format!(
            "posterior update matched {} rows for digest {}",
            result.rows_affected(),
            record.digest
        )));
    }
    Ok(())
}

/// Remove every image row (reset).
pub async fn delete_all(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query("DELETE FROM images").execute(conn).await?;
    Ok(())
}
