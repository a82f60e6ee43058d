//! Pair selection policy
//!
//! Policy order: recency suppression, skip resurfacing, unseen priority,
//! epsilon-greedy exploration, information-theoretic partner, with a
//! forced calibration partner when slot A is unseen. Recency filters are
//! relaxed in stages (pair filter first, then image filter) before the
//! selection gives up.

use std::collections::HashSet;

use rand::Rng;

use folio_common::TuningConfig;

use crate::error::{EngineError, EngineResult};
use crate::models::ImageRecord;
use crate::pairing::pools::PoolSet;

/// Rating-gap cost per point of sigma in the partner score: a one-sigma
/// gap of 100 rating points cancels one unit of uncertainty.
const RATING_GAP_ALPHA: f64 = 1.0 / 100.0;

/// Read-only view of the coordinator's recency rings.
#[derive(Debug, Clone, Copy)]
pub struct RecencyView<'a> {
    pub images: &'a HashSet<String>,
    pub pairs: &'a HashSet<(String, String)>,
}

/// Canonical unordered pair representation.
pub fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

#[derive(Clone, Copy)]
struct Filters {
    image_recency: bool,
    pair_recency: bool,
}

/// Choose the next pair, or `NotEnoughImages` when even the fully
/// relaxed candidate set cannot produce one.
pub fn select_pair<R: Rng>(
    pools: &PoolSet,
    recency: RecencyView<'_>,
    tuning: &TuningConfig,
    rng: &mut R,
) -> EngineResult<(String, String)> {
    // Relaxation ladder: full filtering, then drop the pair filter, then
    // drop the image filter too.
    let stages = [
        Filters { image_recency: true, pair_recency: true },
        Filters { image_recency: true, pair_recency: false },
        Filters { image_recency: false, pair_recency: false },
    ];

    for filters in stages {
        if let Some(pair) = attempt(pools, recency, filters, tuning, rng) {
            return Ok(pair);
        }
    }

    Err(EngineError::NotEnoughImages)
}

fn attempt<R: Rng>(
    pools: &PoolSet,
    recency: RecencyView<'_>,
    filters: Filters,
    tuning: &TuningConfig,
    rng: &mut R,
) -> Option<(String, String)> {
    let image_ok =
        |r: &&ImageRecord| !filters.image_recency || !recency.images.contains(&r.digest);

    let unseen: Vec<&ImageRecord> = pools.unseen.iter().filter(image_ok).collect();
    let active: Vec<&ImageRecord> = pools.active.iter().filter(image_ok).collect();
    let skipped: Vec<&ImageRecord> = pools.skipped_eligible.iter().filter(image_ok).collect();

    if unseen.len() + active.len() < 2 {
        return None;
    }

    // Slot A: skip resurfacing, then unseen priority, then least-certain.
    let (slot_a, a_from_unseen) =
        if !skipped.is_empty() && rng.gen::<f64>() < tuning.skip_inject_probability {
            (skipped[rng.gen_range(0..skipped.len())], false)
        } else if !unseen.is_empty() {
            (unseen[rng.gen_range(0..unseen.len())], true)
        } else {
            (weighted_by_sigma(&active, rng)?, false)
        };

    let pair_ok = |b: &&ImageRecord| {
        !filters.pair_recency || !recency.pairs.contains(&pair_key(&slot_a.digest, &b.digest))
    };
    let not_a = |b: &&ImageRecord| b.digest != slot_a.digest;

    let candidates: Vec<&ImageRecord> = unseen
        .iter()
        .chain(active.iter())
        .copied()
        .filter(|b| not_a(b) && pair_ok(b))
        .collect();
    if candidates.is_empty() {
        return None;
    }

    // Calibration: an unseen slot A is anchored against a well-placed
    // active image when one survives the filters.
    if a_from_unseen && !active.is_empty() {
        let active_candidates: Vec<&ImageRecord> = active
            .iter()
            .copied()
            .filter(|b| not_a(b) && pair_ok(b))
            .collect();
        if let Some(partner) = calibration_partner(&pools.active, &active_candidates) {
            return Some((slot_a.digest.clone(), partner.digest.clone()));
        }
    }

    // Epsilon-greedy exploration.
    if rng.gen::<f64>() < tuning.epsilon_greedy {
        let partner = candidates[rng.gen_range(0..candidates.len())];
        return Some((slot_a.digest.clone(), partner.digest.clone()));
    }

    let partner = information_partner(slot_a, &candidates, tuning.shortlist_k)?;
    Some((slot_a.digest.clone(), partner.digest.clone()))
}

/// Draw from `pool` with probability proportional to sigma.
fn weighted_by_sigma<'a, R: Rng>(
    pool: &[&'a ImageRecord],
    rng: &mut R,
) -> Option<&'a ImageRecord> {
    if pool.is_empty() {
        return None;
    }
    let total: f64 = pool.iter().map(|r| r.sigma).sum();
    if total <= 0.0 {
        return Some(pool[rng.gen_range(0..pool.len())]);
    }
    let mut remaining = rng.gen::<f64>() * total;
    for record in pool {
        remaining -= record.sigma;
        if remaining <= 0.0 {
            return Some(record);
        }
    }
    Some(pool[pool.len() - 1])
}

/// Highest-sigma shortlist, scored by sigma minus the scaled rating gap.
/// Ties break toward fewer exposures, then the lower digest.
fn information_partner<'a>(
    slot_a: &ImageRecord,
    candidates: &[&'a ImageRecord],
    shortlist_k: usize,
) -> Option<&'a ImageRecord> {
    let mut shortlist: Vec<&ImageRecord> = candidates.to_vec();
    shortlist.sort_by(|a, b| {
        b.sigma
            .partial_cmp(&a.sigma)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.digest.cmp(&b.digest))
    });
    shortlist.truncate(shortlist_k);

    let score = |b: &ImageRecord| b.sigma - RATING_GAP_ALPHA * (b.mu - slot_a.mu).abs();

    let mut best: Option<(&ImageRecord, f64)> = None;
    for candidate in shortlist {
        let candidate_score = score(candidate);
        let better = match best {
            None => true,
            Some((incumbent, incumbent_score)) => {
                match candidate_score.partial_cmp(&incumbent_score) {
                    Some(std::cmp::Ordering::Greater) => true,
                    Some(std::cmp::Ordering::Equal) => {
                        (candidate.exposures, &candidate.digest)
                            < (incumbent.exposures, &incumbent.digest)
                    }
                    _ => false,
                }
            }
        };
        if better {
            best = Some((candidate, candidate_score));
        }
    }
    best.map(|(record, _)| record)
}

/// Active image near the pool's median rating with sigma in the top
/// tercile: the most informative anchor for an unrated image.
fn calibration_partner<'a>(
    full_active: &[ImageRecord],
    candidates: &[&'a ImageRecord],
) -> Option<&'a ImageRecord> {
    if candidates.is_empty() {
        return None;
    }

    let median = median_mu(full_active);

    let mut sigmas: Vec<f64> = full_active.iter().map(|r| r.sigma).collect();
    sigmas.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    let tercile_floor = sigmas[(sigmas.len().saturating_sub(1)) / 3];

    let top_sigma: Vec<&ImageRecord> = candidates
        .iter()
        .copied()
        .filter(|r| r.sigma >= tercile_floor)
        .collect();
    let pool: &[&ImageRecord] = if top_sigma.is_empty() {
        candidates
    } else {
        &top_sigma
    };

    pool.iter()
        .copied()
        .min_by(|a, b| {
            (a.mu - median)
                .abs()
                .partial_cmp(&(b.mu - median).abs())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.digest.cmp(&b.digest))
        })
}

fn median_mu(records: &[ImageRecord]) -> f64 {
    if records.is_empty() {
        return 0.0;
    }
    let mut mus: Vec<f64> = records.iter().map(|r| r.mu).collect();
    mus.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = mus.len() / 2;
    if mus.len() % 2 == 0 {
        (mus[mid - 1] + mus[mid]) / 2.0
    } else {
        mus[mid]
    }
}
