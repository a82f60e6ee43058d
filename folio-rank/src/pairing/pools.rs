//! Eligibility pool classification
//!
//! Pools are recomputed per call from the current posteriors; nothing is
//! cached between rounds.

use crate::models::ImageRecord;

/// Images classified by eligibility for the current round.
#[derive(Debug, Default)]
pub struct PoolSet {
    /// Never shown: `exposures == 0`.
    pub unseen: Vec<ImageRecord>,
    /// Shown before and not cooling down.
    pub active: Vec<ImageRecord>,
    /// Previously skipped, cooldown expired. Subset of `active`.
    pub skipped_eligible: Vec<ImageRecord>,
    /// Cooling down after a SKIP; excluded from selection entirely.
    pub cooldown: usize,
}

impl PoolSet {
    /// Count of images any selection stage may draw from.
    pub fn eligible_len(&self) -> usize {
        self.unseen.len() + self.active.len()
    }
}

/// Classify `records` against `current_round`.
pub fn classify(records: Vec<ImageRecord>, current_round: i64) -> PoolSet {
    let mut pools = PoolSet::default();

    for record in records {
        if record.exposures == 0 {
            pools.unseen.push(record);
        } else if record.next_eligible_round > current_round {
            pools.cooldown += 1;
        } else {
            if record.next_eligible_round > 0 && record.skips > 0 {
                pools.skipped_eligible.push(record.clone());
            }
            pools.active.push(record);
        }
    }

    pools
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(digest: char, exposures: i64, skips: i64, next_eligible: i64) -> ImageRecord {
        let mut r = ImageRecord::new(digest.to_string().repeat(64), 1500.0, 350.0);
        r.exposures = exposures;
        r.skips = skips;
        r.likes = exposures - skips;
        r.next_eligible_round = next_eligible;
        r
    }

    #[test]
    fn classifies_all_four_pools() {
        let records = vec![
            record('a', 0, 0, 0),   // unseen
            record('b', 3, 0, 0),   // active
            record('c', 2, 1, 90),  // skipped, cooldown expired
            record('d', 2, 1, 150), // still cooling down
        ];
        let pools = classify(records, 100);

        assert_eq!(pools.unseen.len(), 1);
        assert_eq!(pools.active.len(), 2);
        assert_eq!(pools.skipped_eligible.len(), 1);
        assert_eq!(pools.skipped_eligible[0].digest, "c".repeat(64));
        assert_eq!(pools.cooldown, 1);
        assert_eq!(pools.eligible_len(), 3);
    }

    #[test]
    fn cooldown_boundary_is_inclusive() {
        // next_eligible_round == current_round means eligible again.
        let pools = classify(vec![record('a', 1, 1, 100)], 100);
        assert_eq!(pools.active.len(), 1);
        assert_eq!(pools.skipped_eligible.len(), 1);
        assert_eq!(pools.cooldown, 0);

        let pools = classify(vec![record('a', 1, 1, 101)], 100);
        assert_eq!(pools.active.len(), 0);
        assert_eq!(pools.cooldown, 1);
    }

    #[test]
    fn rated_image_with_cleared_cooldown_is_plain_active() {
        let pools = classify(vec![record('a', 5, 1, 0)], 100);
        assert_eq!(pools.active.len(), 1);
        assert!(pools.skipped_eligible.is_empty());
    }
}
