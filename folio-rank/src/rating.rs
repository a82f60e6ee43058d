//! Elo+sigma rating engine
//!
//! Pure mathematical core: given two posteriors and an outcome, produce
//! the updated posteriors. No IO, no clock, randomness injected by the
//! caller (only SKIP cooldowns draw from it).

use rand::Rng;

use folio_common::TuningConfig;

use crate::models::{ImageRecord, Outcome};

/// Rating calculator configured from the engine tunables.
#[derive(Debug, Clone)]
pub struct Rater {
    k_base: f64,
    k_min: f64,
    k_max: f64,
    sigma_initial: f64,
    sigma_min: f64,
    sigma_decay: f64,
    cooldown_min: u64,
    cooldown_max: u64,
}

impl Rater {
    pub fn new(tuning: &TuningConfig) -> Self {
        Self {
            k_base: tuning.k_base,
            k_min: tuning.k_min,
            k_max: tuning.k_max,
            sigma_initial: tuning.sigma_initial,
            sigma_min: tuning.sigma_min,
            sigma_decay: tuning.sigma_decay,
            cooldown_min: tuning.skip_cooldown_min,
            cooldown_max: tuning.skip_cooldown_max,
        }
    }

    /// Expected score of `mu_a` against `mu_b`:
    /// `E_a = 1 / (1 + 10^((mu_b - mu_a)/400))`.
    pub fn expected_score(&self, mu_a: f64, mu_b: f64) -> f64 {
        1.0 / (1.0 + 10f64.powf((mu_b - mu_a) / 400.0))
    }

    /// Dynamic K-factor: higher uncertainty moves the rating more.
    pub fn k_factor(&self, sigma: f64) -> f64 {
        (self.k_base * sigma / self.sigma_initial).clamp(self.k_min, self.k_max)
    }

    /// Apply one committed choice at `round` to both posteriors and
    /// return the updated records. Counter invariants hold on the output:
    /// exposures = likes + unlikes + skips, sigma >= sigma_min.
    pub fn rate<R: Rng>(
        &self,
        left: &ImageRecord,
        right: &ImageRecord,
        outcome: Outcome,
        round: i64,
        rng: &mut R,
    ) -> (ImageRecord, ImageRecord) {
        let mut left = left.clone();
        let mut right = right.clone();

        match outcome {
            Outcome::Skip => {
                // SKIP carries no preference signal: posteriors untouched,
                // cooldowns drawn independently per image.
                left.skips += 1;
                right.skips += 1;
                left.next_eligible_round = round + self.draw_cooldown(rng);
                right.next_eligible_round = round + self.draw_cooldown(rng);
            }
            Outcome::Left | Outcome::Right => {
                let expected_left = self.expected_score(left.mu, right.mu);
                let expected_right = 1.0 - expected_left;
                let score_left = if outcome == Outcome::Left { 1.0 } else { 0.0 };

                left.mu += self.k_factor(left.sigma) * (score_left - expected_left);
                right.mu += self.k_factor(right.sigma) * ((1.0 - score_left) - expected_right);

                left.sigma = self.decay_sigma(left.sigma);
                right.sigma = self.decay_sigma(right.sigma);

                if outcome == Outcome::Left {
                    left.likes += 1;
                    right.unlikes += 1;
                } else {
                    right.likes += 1;
                    left.unlikes += 1;
                }

                // A rated outcome ends any pending skip cooldown.
                left.next_eligible_round = 0;
                right.next_eligible_round = 0;
            }
        }

        left.exposures += 1;
        right.exposures += 1;
        left.last_seen_round = round;
        right.last_seen_round = round;

        (left, right)
    }

    fn decay_sigma(&self, sigma: f64) -> f64 {
        (sigma * self.sigma_decay).max(self.sigma_min)
    }

    fn draw_cooldown<R: Rng>(&self, rng: &mut R) -> i64 {
        rng.gen_range(self.cooldown_min..=self.cooldown_max) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn rater() -> Rater {
        Rater::new(&TuningConfig::default())
    }

    fn image(digest: char, mu: f64, sigma: f64) -> ImageRecord {
        let mut record = ImageRecord::new(digest.to_string().repeat(64), mu, sigma);
        record.mu = mu;
        record.sigma = sigma;
        record
    }

    #[test]
    fn expected_score_is_symmetric() {
        let r = rater();
        assert_eq!(r.expected_score(1500.0, 1500.0), 0.5);
        let e = r.expected_score(1600.0, 1500.0);
        assert!((e + r.expected_score(1500.0, 1600.0) - 1.0).abs() < 1e-12);
        assert!(e > 0.5);
    }

    #[test]
    fn k_factor_clamps() {
        let r = rater();
        assert_eq!(r.k_factor(350.0), 24.0);
        assert_eq!(r.k_factor(60.0), 8.0);
        assert_eq!(r.k_factor(10_000.0), 48.0);
    }

    #[test]
    fn fresh_pair_left_win() {
        let r = rater();
        let mut rng = StdRng::seed_from_u64(7);
        let (a, b) = r.rate(
            &image('a', 1500.0, 350.0),
            &image('b', 1500.0, 350.0),
            Outcome::Left,
            1,
            &mut rng,
        );

        assert!((a.mu - 1512.0).abs() < 1e-9);
        assert!((b.mu - 1488.0).abs() < 1e-9);
        assert!((a.sigma - 339.5).abs() < 1e-9);
        assert!((b.sigma - 339.5).abs() < 1e-9);
        assert_eq!((a.likes, a.unlikes, a.exposures), (1, 0, 1));
        assert_eq!((b.likes, b.unlikes, b.exposures), (0, 1, 1));
        assert_eq!(a.last_seen_round, 1);
    }

    #[test]
    fn asymmetric_right_win() {
        let r = rater();
        let mut rng = StdRng::seed_from_u64(7);
        let (a, b) = r.rate(
            &image('a', 1600.0, 200.0),
            &image('b', 1500.0, 350.0),
            Outcome::Right,
            1,
            &mut rng,
        );

        // E_b = 1/(1+10^(100/400)) ~ 0.360, K_a ~ 13.71, K_b = 24.
        assert!((a.mu - 1591.2).abs() < 0.1);
        assert!((b.mu - 1515.4).abs() < 0.1);
        assert_eq!((a.likes, a.unlikes), (0, 1));
        assert_eq!((b.likes, b.unlikes), (1, 0));
    }

    #[test]
    fn sigma_never_falls_below_floor() {
        let r = rater();
        let mut rng = StdRng::seed_from_u64(7);
        let (a, _) = r.rate(
            &image('a', 1500.0, 60.0),
            &image('b', 1500.0, 61.0),
            Outcome::Left,
            3,
            &mut rng,
        );
        assert_eq!(a.sigma, 60.0);
    }

    #[test]
    fn skip_leaves_posteriors_and_sets_cooldown() {
        let r = rater();
        let mut rng = StdRng::seed_from_u64(42);
        let (a, b) = r.rate(
            &image('a', 1510.0, 300.0),
            &image('b', 1490.0, 310.0),
            Outcome::Skip,
            100,
            &mut rng,
        );

        assert_eq!(a.mu, 1510.0);
        assert_eq!(a.sigma, 300.0);
        assert_eq!(b.mu, 1490.0);
        assert_eq!(b.sigma, 310.0);
        assert_eq!((a.skips, a.exposures), (1, 1));
        assert_eq!((b.skips, b.exposures), (1, 1));
        assert!((111..=149).contains(&a.next_eligible_round));
        assert!((111..=149).contains(&b.next_eligible_round));
    }

    #[test]
    fn rated_outcome_clears_cooldown() {
        let r = rater();
        let mut rng = StdRng::seed_from_u64(1);
        let mut a = image('a', 1500.0, 350.0);
        a.next_eligible_round = 140;
        a.skips = 1;
        a.exposures = 1;
        let (a, _) = r.rate(&a, &image('b', 1500.0, 350.0), Outcome::Left, 150, &mut rng);
        assert_eq!(a.next_eligible_round, 0);
    }

    #[test]
    fn counter_invariant_holds_over_many_updates() {
        let r = rater();
        let mut rng = StdRng::seed_from_u64(99);
        let mut a = image('a', 1500.0, 350.0);
        let mut b = image('b', 1500.0, 350.0);
        for round in 1..=200 {
            let outcome = match round % 3 {
                0 => Outcome::Left,
                1 => Outcome::Right,
                _ => Outcome::Skip,
            };
            let (na, nb) = r.rate(&a, &b, outcome, round, &mut rng);
            a = na;
            b = nb;
            assert_eq!(a.exposures, a.likes + a.unlikes + a.skips);
            assert_eq!(b.exposures, b.likes + b.unlikes + b.skips);
            assert!(a.sigma >= 60.0);
            assert!(b.sigma >= 60.0);
        }
    }
}
