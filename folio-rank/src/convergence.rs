//! Convergence detection
//!
//! Consumes posterior snapshots and the top-K history ring and produces
//! the four convergence metrics plus the composite progress signal. Pure
//! over its inputs; the coordinator owns the history ring and feeds it in.

use std::collections::{HashMap, VecDeque};

use folio_common::TuningConfig;

use crate::models::{ImageRecord, ProgressReport, Quality};

/// Convergence metric calculator.
#[derive(Debug, Clone)]
pub struct ConvergenceDetector {
    target_top_k: usize,
    min_exposures: i64,
    sigma_confident_max: f64,
    confidence_z: f64,
    target_exposures: f64,
}

impl ConvergenceDetector {
    pub fn new(tuning: &TuningConfig) -> Self {
        Self {
            target_top_k: tuning.target_top_k,
            min_exposures: tuning.min_exposures_per_image as i64,
            sigma_confident_max: tuning.sigma_confident_max,
            confidence_z: tuning.confidence_z,
            target_exposures: tuning.target_exposures,
        }
    }

    /// Rank by mu descending, ties broken by lower sigma then digest.
    pub fn rank<'a>(&self, records: &'a [ImageRecord]) -> Vec<&'a ImageRecord> {
        let mut ranked: Vec<&ImageRecord> = records.iter().collect();
        ranked.sort_by(|a, b| {
            b.mu
                .partial_cmp(&a.mu)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    a.sigma
                        .partial_cmp(&b.sigma)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.digest.cmp(&b.digest))
        });
        ranked
    }

    /// Current top-K digests in rank order, for the history ring.
    pub fn top_k_snapshot(&self, records: &[ImageRecord]) -> Vec<String> {
        self.rank(records)
            .into_iter()
            .take(self.target_top_k)
            .map(|r| r.digest.clone())
            .collect()
    }

    /// Full metrics over the present posteriors and the recorded history.
    pub fn report(
        &self,
        records: &[ImageRecord],
        history: &VecDeque<Vec<String>>,
        round: i64,
        rated_choices: i64,
    ) -> ProgressReport {
        let catalog_size = records.len();
        let total_exposures: i64 = records.iter().map(|r| r.exposures).sum();
        if catalog_size == 0 || total_exposures == 0 {
            return ProgressReport::empty(round, catalog_size);
        }

        let ranked = self.rank(records);

        let coverage = records
            .iter()
            .filter(|r| r.exposures >= self.min_exposures)
            .count() as f64
            / catalog_size as f64;

        let top_k: Vec<&ImageRecord> =
            ranked.iter().take(self.target_top_k).copied().collect();
        let confidence = if top_k.is_empty() {
            0.0
        } else {
            top_k
                .iter()
                .filter(|r| r.sigma <= self.sigma_confident_max)
                .count() as f64
                / top_k.len() as f64
        };

        let boundary_gap = self.boundary_gap(&ranked);
        let stability = stability(history);

        let mean_exposures = total_exposures as f64 / catalog_size as f64;
        let exposure_term = (mean_exposures / self.target_exposures).min(1.0);

        let progress = ((0.30 * coverage
            + 0.25 * exposure_term
            + 0.25 * confidence
            + 0.20 * stability)
            * 100.0)
            .clamp(0.0, 100.0);

        let portfolio_ready =
            coverage >= 0.95 && confidence >= 0.90 && boundary_gap > 0.0 && stability >= 0.95;

        ProgressReport {
            progress,
            portfolio_ready,
            quality: Quality::from_progress(progress),
            coverage,
            confidence,
            boundary_gap,
            stability,
            round,
            catalog_size,
            rated_choices,
        }
    }

    /// `CI_lower(K) - CI_upper(K+1)`. Positive means the K-th image's
    /// lower bound clears the (K+1)-th's upper bound. With no (K+1)-th
    /// image the boundary is uncontested.
    fn boundary_gap(&self, ranked: &[&ImageRecord]) -> f64 {
        if ranked.len() <= self.target_top_k {
            return f64::INFINITY;
        }
        let kth = ranked[self.target_top_k - 1];
        let next = ranked[self.target_top_k];
        (kth.mu - self.confidence_z * kth.sigma) - (next.mu + self.confidence_z * next.sigma)
    }
}

/// Top-K stability over the history window: one minus the normalized
/// swap count across consecutive snapshots. A swap is a rank change of a
/// retained entry or one entry entering/leaving. Fewer than two
/// snapshots carry no evidence of stability.
fn stability(history: &VecDeque<Vec<String>>) -> f64 {
    if history.len() < 2 {
        return 0.0;
    }

    let mut swaps = 0usize;
    let mut max_swaps = 0usize;

    for window in 0..history.len() - 1 {
        let prev = &history[window];
        let curr = &history[window + 1];
        let cap = prev.len().max(curr.len());
        max_swaps += cap;

        let prev_ranks: HashMap<&str, usize> = prev
            .iter()
            .enumerate()
            .map(|(rank, digest)| (digest.as_str(), rank))
            .collect();
        let curr_ranks: HashMap<&str, usize> = curr
            .iter()
            .enumerate()
            .map(|(rank, digest)| (digest.as_str(), rank))
            .collect();

        let mut pair_swaps = 0usize;
        for (digest, rank) in &curr_ranks {
            match prev_ranks.get(digest) {
                Some(prev_rank) if prev_rank != rank => pair_swaps += 1,
                Some(_) => {}
                None => pair_swaps += 1, // entered
            }
        }
        for digest in prev_ranks.keys() {
            if !curr_ranks.contains_key(digest) {
                pair_swaps += 1; // left
            }
        }
        swaps += pair_swaps.min(cap);
    }

    if max_swaps == 0 {
        return 0.0;
    }
    1.0 - swaps as f64 / max_swaps as f64
}
