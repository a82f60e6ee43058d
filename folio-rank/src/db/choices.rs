//! Append-only choice log
//!
//! One row per committed round with posterior snapshots on both sides,
//! enough to audit or replay any session offline.

use std::collections::HashMap;

use sqlx::{Sqlite, SqliteConnection};

use folio_common::Result;

use crate::db::images::parse_timestamp;
use crate::models::{ChoiceRecord, Outcome};

type ChoiceRow = (
    i64,    // round
    String, // left_digest
    String, // right_digest
    String, // outcome
    f64,    // left_mu_before
    f64,    // left_mu_after
    f64,    // right_mu_before
    f64,    // right_mu_after
    f64,    // left_sigma_before
    f64,    // left_sigma_after
    f64,    // right_sigma_before
    f64,    // right_sigma_after
    String, // recorded_at
);

const SELECT_COLUMNS: &str = "round, left_digest, right_digest, outcome, \
     left_mu_before, left_mu_after, right_mu_before, right_mu_after, \
     left_sigma_before, left_sigma_after, right_sigma_before, right_sigma_after, \
     recorded_at";

fn map_row(row: ChoiceRow) -> Result<ChoiceRecord> {
    Ok(ChoiceRecord {
        round: row.0,
        left_digest: row.1,
        right_digest: row.2,
        outcome: row
            .3
            .parse::<Outcome>()
            .map_err(|_| folio_common::Error::Internal(format!("bad outcome in log: {}", row.3)))?,
        left_mu_before: row.4,
        left_mu_after: row.5,
        right_mu_before: row.6,
        right_mu_after: row.7,
        left_sigma_before: row.8,
        left_sigma_after: row.9,
        right_sigma_before: row.10,
        right_sigma_after: row.11,
        recorded_at: parse_timestamp(&row.12)?,
    })
}

/// Append one choice row. Fails on a duplicate round, by design of the
/// primary key.
pub async fn insert_choice(conn: &mut SqliteConnection, choice: &ChoiceRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO choices (round, left_digest, right_digest, outcome,
            left_mu_before, left_mu_after, right_mu_before, right_mu_after,
            left_sigma_before, left_sigma_after, right_sigma_before, right_sigma_after,
            recorded_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(choice.round)
    .bind(&choice.left_digest)
    .bind(&choice.right_digest)
    .bind(choice.outcome.as_str())
    .bind(choice.left_mu_before)
    .bind(choice.left_mu_after)
    .bind(choice.right_mu_before)
    .bind(choice.right_mu_after)
    .bind(choice.left_sigma_before)
    .bind(choice.left_sigma_after)
    .bind(choice.right_sigma_before)
    .bind(choice.right_sigma_after)
    .bind(choice.recorded_at.to_rfc3339())
    .execute(conn)
    .await?;
    Ok(())
}

/// Full log in round order.
pub async fn all_choices<'e, E>(executor: E) -> Result<Vec<ChoiceRecord>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let rows: Vec<ChoiceRow> =
        sqlx::query_as(&format!("SELECT {SELECT_COLUMNS} FROM choices ORDER BY round"))
            .fetch_all(executor)
            .await?;
    rows.into_iter().map(map_row).collect()
}

pub async fn count_choices<'e, E>(executor: E) -> Result<i64>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM choices")
        .fetch_one(executor)
        .await?)
}

/// Remove the whole log (reset).
pub async fn delete_all(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query("DELETE FROM choices").execute(conn).await?;
    Ok(())
}

/// Posterior state recomputed from the log alone.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplayedPosterior {
    pub mu: f64,
    pub sigma: f64,
    pub exposures: i64,
    pub likes: i64,
    pub unlikes: i64,
    pub skips: i64,
    pub last_seen_round: i64,
}

/// Replay the append-only log: every image that appears in a choice ends
/// at exactly the posteriors the log's after-snapshots dictate. Cooldown
/// state is session-local and not part of the replayed posterior.
pub fn replay_posteriors(
    choices: &[ChoiceRecord],
    initial_mu: f64,
    sigma_initial: f64,
) -> HashMap<String, ReplayedPosterior> {
    let mut replayed: HashMap<String, ReplayedPosterior> = HashMap::new();

    let fresh = || ReplayedPosterior {
        mu: initial_mu,
        sigma: sigma_initial,
        exposures: 0,
        likes: 0,
        unlikes: 0,
        skips: 0,
        last_seen_round: 0,
    };

    for choice in choices {
        {
            let left = replayed
                .entry(choice.left_digest.clone())
                .or_insert_with(fresh);
            left.mu = choice.left_mu_after;
            left.sigma = choice.left_sigma_after;
            left.exposures += 1;
            left.last_seen_round = choice.round;
            match choice.outcome {
                Outcome::Left => left.likes += 1,
                Outcome::Right => left.unlikes += 1,
                Outcome::Skip => left.skips += 1,
            }
        }
        {
            let right = replayed
                .entry(choice.right_digest.clone())
                .or_insert_with(fresh);
            right.mu = choice.right_mu_after;
            right.sigma = choice.right_sigma_after;
            right.exposures += 1;
            right.last_seen_round = choice.round;
            match choice.outcome {
                Outcome::Left => right.unlikes += 1,
                Outcome::Right => right.likes += 1,
                Outcome::Skip => right.skips += 1,
            }
        }
    }

    replayed
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use folio_common::db::init_memory_database;

    fn choice(round: i64, left: &str, right: &str, outcome: Outcome) -> ChoiceRecord {
        ChoiceRecord {
            round,
            left_digest: left.repeat(64),
            right_digest: right.repeat(64),
            outcome,
            left_mu_before: 1500.0,
            left_mu_after: if outcome == Outcome::Skip { 1500.0 } else { 1512.0 },
            right_mu_before: 1500.0,
            right_mu_after: if outcome == Outcome::Skip { 1500.0 } else { 1488.0 },
            left_sigma_before: 350.0,
            left_sigma_after: if outcome == Outcome::Skip { 350.0 } else { 339.5 },
            right_sigma_before: 350.0,
            right_sigma_after: if outcome == Outcome::Skip { 350.0 } else { 339.5 },
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn log_round_trips_and_orders_by_round() {
        let pool = init_memory_database().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();

        insert_choice(&mut conn, &choice(2, "a", "b", Outcome::Skip))
            .await
            .unwrap();
        insert_choice(&mut conn, &choice(1, "a", "b", Outcome::Left))
            .await
            .unwrap();

        let log = all_choices(&pool).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].round, 1);
        assert_eq!(log[0].outcome, Outcome::Left);
        assert_eq!(log[1].round, 2);
        assert_eq!(log[1].outcome, Outcome::Skip);
    }

    #[tokio::test]
    async fn duplicate_round_is_rejected() {
        let pool = init_memory_database().await.unwrap();
        let mut conn = pool.acquire().await.unwrap();
        insert_choice(&mut conn, &choice(1, "a", "b", Outcome::Left))
            .await
            .unwrap();
        assert!(insert_choice(&mut conn, &choice(1, "c", "d", Outcome::Right))
            .await
            .is_err());
    }

    #[test]
    fn replay_applies_snapshots_and_counters() {
        let log = vec![
            choice(1, "a", "b", Outcome::Left),
            choice(2, "a", "b", Outcome::Skip),
        ];
        let replayed = replay_posteriors(&log, 1500.0, 350.0);

        let a = &replayed[&"a".repeat(64)];
        assert_eq!(a.mu, 1500.0); // skip snapshot wrote the unchanged value
        assert_eq!(a.exposures, 2);
        assert_eq!(a.likes, 1);
        assert_eq!(a.skips, 1);
        assert_eq!(a.last_seen_round, 2);

        let b = &replayed[&"b".repeat(64)];
        assert_eq!(b.unlikes, 1);
        assert_eq!(b.skips, 1);
    }
}
