//! Engine tuning parameters
//!
//! Central struct for every tunable the rating, pairing, and convergence
//! engines consume. Read-frequently, write-never after startup: the
//! coordinator owns one `TuningConfig` by value and hands references down.
//!
//! All fields have serde defaults so a partial `[tuning]` table in the
//! config file overrides only what it names.

use serde::Deserialize;

use crate::{Error, Result};

/// Tunable parameters for the ranking engine.
///
/// Defaults are the shipped behavior; every field can be overridden from
/// the TOML config without a schema migration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TuningConfig {
    /// Probability of choosing a uniformly random partner instead of the
    /// information-theoretic one. Range [0, 1].
    pub epsilon_greedy: f64,

    /// Probability of pulling slot A from the skip-eligible pool when it
    /// is nonempty. Range [0, 1].
    pub skip_inject_probability: f64,

    /// Inclusive bounds for the per-image skip cooldown, in rounds.
    pub skip_cooldown_min: u64,
    pub skip_cooldown_max: u64,

    /// Recency suppression window sizes: individual images and unordered
    /// pairs recently shown are excluded from selection.
    pub recent_images_window: usize,
    pub recent_pairs_window: usize,

    /// Shortlist size for the information-theoretic partner search.
    pub shortlist_k: usize,

    /// Initial posterior mean for a never-rated image.
    pub initial_mu: f64,

    /// Posterior uncertainty bounds and per-rated-exposure decay.
    pub sigma_initial: f64,
    pub sigma_min: f64,
    pub sigma_decay: f64,

    /// Dynamic K-factor shape: K(sigma) = clamp(k_base * sigma/sigma_initial, k_min, k_max).
    pub k_base: f64,
    pub k_min: f64,
    pub k_max: f64,

    /// Size of the tracked top-K ranking.
    pub target_top_k: usize,

    /// Coverage counts images with at least this many exposures.
    pub min_exposures_per_image: u64,

    /// Confidence counts top-K images with sigma at or below this.
    pub sigma_confident_max: f64,

    /// Rounds of top-K history retained for the stability metric.
    pub stability_window: usize,

    /// z-score for the boundary-gap confidence intervals.
    pub confidence_z: f64,

    /// Mean exposures per image considered "enough" by the progress meter.
    pub target_exposures: f64,

    /// Catalog guards.
    pub max_files: usize,
    pub max_file_bytes: u64,

    /// Hashing worker pool size and streaming chunk size.
    pub hash_workers: usize,
    pub hash_chunk_bytes: usize,

    /// Deadline for a record_choice transaction, in milliseconds.
    pub choice_timeout_ms: u64,

    /// Attempts for transient database-lock retries before surfacing.
    pub db_retry_attempts: u32,

    /// When set, record_choice rejects pairs that do not match the last
    /// pair issued by next_pair.
    pub strict_pair_validation: bool,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            epsilon_greedy: 0.10,
            skip_inject_probability: 0.30,
            skip_cooldown_min: 11,
            skip_cooldown_max: 49,
            recent_images_window: 64,
            recent_pairs_window: 128,
            shortlist_k: 64,
            initial_mu: 1500.0,
            sigma_initial: 350.0,
            sigma_min: 60.0,
            sigma_decay: 0.97,
            k_base: 24.0,
            k_min: 8.0,
            k_max: 48.0,
            target_top_k: 40,
            min_exposures_per_image: 5,
            sigma_confident_max: 90.0,
            stability_window: 120,
            confidence_z: 1.96,
            target_exposures: 10.0,
            max_files: 200_000,
            max_file_bytes: 250 * 1024 * 1024,
            hash_workers: 4,
            hash_chunk_bytes: 1024 * 1024,
            choice_timeout_ms: 5000,
            db_retry_attempts: 3,
            strict_pair_validation: false,
        }
    }
}

impl TuningConfig {
    /// Reject configurations the engines cannot run with.
    pub fn validate(&self) -> Result<()> {
        fn probability(name: &str, v: f64) -> Result<()> {
            if !(0.0..=1.0).contains(&v) {
                return Err(Error::Config(format!(
                    "{name}: value {v} out of range [0.0, 1.0]"
                )));
            }
            Ok(())
        }

        probability("epsilon_greedy", self.epsilon_greedy)?;
        probability("skip_inject_probability", self.skip_inject_probability)?;

        if self.skip_cooldown_min == 0 || self.skip_cooldown_min > self.skip_cooldown_max {
            return Err(Error::Config(format!(
                "skip_cooldown: invalid range [{}, {}]",
                self.skip_cooldown_min, self.skip_cooldown_max
            )));
        }
        if self.recent_images_window == 0 || self.recent_pairs_window == 0 {
            return Err(Error::Config(
                "recency windows must be nonzero".to_string(),
            ));
        }
        if self.shortlist_k < 2 {
            return Err(Error::Config(format!(
                "shortlist_k: {} is too small to form a pair",
                self.shortlist_k
            )));
        }
        if self.sigma_min <= 0.0 || self.sigma_min > self.sigma_initial {
            return Err(Error::Config(format!(
                "sigma bounds: min {} incompatible with initial {}",
                self.sigma_min, self.sigma_initial
            )));
        }
        if !(0.0..=1.0).contains(&self.sigma_decay) || self.sigma_decay == 0.0 {
            return Err(Error::Config(format!(
                "sigma_decay: value {} out of range (0.0, 1.0]",
                self.sigma_decay
            )));
        }
        if self.k_min <= 0.0 || self.k_min > self.k_max {
            return Err(Error::Config(format!(
                "k factor: invalid clamp range [{}, {}]",
                self.k_min, self.k_max
            )));
        }
        if self.target_top_k == 0 {
            return Err(Error::Config("target_top_k must be nonzero".to_string()));
        }
        if self.stability_window < 2 {
            return Err(Error::Config(
                "stability_window must hold at least two snapshots".to_string(),
            ));
        }
        if self.max_files == 0 || self.max_file_bytes == 0 {
            return Err(Error::Config("catalog guards must be nonzero".to_string()));
        }
        if self.hash_workers == 0 || self.hash_chunk_bytes == 0 {
            return Err(Error::Config(
                "hash_workers and hash_chunk_bytes must be nonzero".to_string(),
            ));
        }
        if self.db_retry_attempts == 0 {
            return Err(Error::Config(
                "db_retry_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
