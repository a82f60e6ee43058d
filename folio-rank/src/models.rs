//! Value types shared across the engine
//!
//! Explicit row and payload structs; the digest (64 lowercase hex chars
//! of SHA-256) is the sole cross-component image identifier.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// User verdict on a shown pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Left,
    Right,
    Skip,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Left => "LEFT",
            Outcome::Right => "RIGHT",
            Outcome::Skip => "SKIP",
        }
    }

    /// True for LEFT/RIGHT, false for SKIP.
    pub fn is_rated(&self) -> bool {
        !matches!(self, Outcome::Skip)
    }
}

impl FromStr for Outcome {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LEFT" => Ok(Outcome::Left),
            "RIGHT" => Ok(Outcome::Right),
            "SKIP" => Ok(Outcome::Skip),
            other => Err(EngineError::InvalidOutcome(other.to_string())),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-image posterior state, one row per content digest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageRecord {
    pub digest: String,
    /// Posterior mean rating.
    pub mu: f64,
    /// Posterior uncertainty, floored at the configured minimum.
    pub sigma: f64,
    pub exposures: i64,
    pub likes: i64,
    pub unlikes: i64,
    pub skips: i64,
    /// 0 when never shown.
    pub last_seen_round: i64,
    /// When greater than the current round the image is in skip cooldown.
    /// 0 means no cooldown pending.
    pub next_eligible_round: i64,
    pub created_at: DateTime<Utc>,
}

impl ImageRecord {
    /// Fresh record with initial posteriors.
    pub fn new(digest: String, initial_mu: f64, sigma_initial: f64) -> Self {
        Self {
            digest,
            mu: initial_mu,
            sigma: sigma_initial,
            exposures: 0,
            likes: 0,
            unlikes: 0,
            skips: 0,
            last_seen_round: 0,
            next_eligible_round: 0,
            created_at: Utc::now(),
        }
    }
}

/// Append-only audit row for one committed choice.
#[derive(Debug, Clone, Serialize)]
pub struct ChoiceRecord {
    pub round: i64,
    pub left_digest: String,
    pub right_digest: String,
    pub outcome: Outcome,
    pub left_mu_before: f64,
    pub left_mu_after: f64,
    pub right_mu_before: f64,
    pub right_mu_after: f64,
    pub left_sigma_before: f64,
    pub left_sigma_after: f64,
    pub right_sigma_before: f64,
    pub right_sigma_after: f64,
    pub recorded_at: DateTime<Utc>,
}

/// One side of a served pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairImage {
    pub digest: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// A served comparison: two distinct images and the round a choice on
/// them must quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pair {
    pub round: i64,
    pub left: PairImage,
    pub right: PairImage,
}

/// Outcome of a committed choice.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ChoiceReceipt {
    pub saved: bool,
    pub next_round: i64,
}

/// Quality ladder for the composite progress score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Excellent,
    VeryGood,
    Good,
    Fair,
    Early,
}

impl Quality {
    /// Label for a progress percentage in [0, 100].
    pub fn from_progress(progress: f64) -> Self {
        if progress >= 90.0 {
            Quality::Excellent
        } else if progress >= 75.0 {
            Quality::VeryGood
        } else if progress >= 50.0 {
            Quality::Good
        } else if progress >= 25.0 {
            Quality::Fair
        } else {
            Quality::Early
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Excellent => "excellent",
            Quality::VeryGood => "very good",
            Quality::Good => "good",
            Quality::Fair => "fair",
            Quality::Early => "early",
        }
    }
}

/// Convergence metrics exposed to the outer layer.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressReport {
    /// Composite progress percentage, clamped to [0, 100].
    pub progress: f64,
    pub portfolio_ready: bool,
    pub quality: Quality,
    /// Fraction of catalog images with enough exposures, [0, 1].
    pub coverage: f64,
    /// Fraction of top-K images with confident sigma, [0, 1].
    pub confidence: f64,
    /// CI_lower(K) - CI_upper(K+1); positive means a clean boundary.
    /// +inf when there is no K+1-th image to contest it.
    pub boundary_gap: f64,
    /// Top-K rank stability over the history window, [0, 1].
    pub stability: f64,
    pub round: i64,
    pub catalog_size: usize,
    pub rated_choices: i64,
}

impl ProgressReport {
    /// The all-zero report served for an empty or never-judged catalog.
    pub fn empty(round: i64, catalog_size: usize) -> Self {
        Self {
            progress: 0.0,
            portfolio_ready: false,
            quality: Quality::Early,
            coverage: 0.0,
            confidence: 0.0,
            boundary_gap: 0.0,
            stability: 0.0,
            round,
            catalog_size,
            rated_choices: 0,
        }
    }
}

/// Per-image counters for the stats aggregate.
#[derive(Debug, Clone, Serialize)]
pub struct ImageCounters {
    pub digest: String,
    pub likes: i64,
    pub unlikes: i64,
    pub skips: i64,
    pub exposures: i64,
}

/// Aggregate counters across the whole session.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub images: i64,
    pub rounds: i64,
    pub by_image: Vec<ImageCounters>,
}

/// Validate a content digest: exactly 64 lowercase hex characters.
pub fn validate_digest(digest: &str) -> Result<(), EngineError> {
    let well_formed = digest.len() == 64
        && digest
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if well_formed {
        Ok(())
    } else {
        Err(EngineError::InvalidDigest(digest.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_round_trips() {
        for outcome in [Outcome::Left, Outcome::Right, Outcome::Skip] {
            assert_eq!(outcome.as_str().parse::<Outcome>().unwrap(), outcome);
        }
        assert!("left".parse::<Outcome>().is_err());
        assert!("BOTH".parse::<Outcome>().is_err());
    }

    #[test]
    fn quality_ladder_boundaries() {
        assert_eq!(Quality::from_progress(100.0), Quality::Excellent);
        assert_eq!(Quality::from_progress(90.0), Quality::Excellent);
        assert_eq!(Quality::from_progress(89.9), Quality::VeryGood);
        assert_eq!(Quality::from_progress(75.0), Quality::VeryGood);
        assert_eq!(Quality::from_progress(50.0), Quality::Good);
        assert_eq!(Quality::from_progress(25.0), Quality::Fair);
        assert_eq!(Quality::from_progress(0.0), Quality::Early);
    }

    #[test]
    fn digest_validation() {
        let good = "a".repeat(64);
        validate_digest(&good).unwrap();

        assert!(validate_digest("abc").is_err());
        assert!(validate_digest(&"A".repeat(64)).is_err());
        assert!(validate_digest(&"g".repeat(64)).is_err());
        assert!(validate_digest(&"a".repeat(63)).is_err());
    }

    #[test]
    fn fresh_record_has_consistent_counters() {
        let record = ImageRecord::new("d".repeat(64), 1500.0, 350.0);
        assert_eq!(
            record.exposures,
            record.likes + record.unlikes + record.skips
        );
        assert_eq!(record.last_seen_round, 0);
        assert_eq!(record.next_eligible_round, 0);
    }
}
