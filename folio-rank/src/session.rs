//! Session coordination
//!
//! The sole entry point for the outer layer. One logical write lock
//! serializes every state-mutating sequence (read posteriors, select,
//! commit, bump round); read-only operations borrow it only long enough
//! to snapshot the ring buffers.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use folio_common::TuningConfig;

use crate::catalog::{Catalog, ScanSummary};
use crate::convergence::ConvergenceDetector;
use crate::db::app_state::SessionRings;
use crate::db::{app_state, choices, images, retry_on_lock};
use crate::error::{EngineError, EngineResult};
use crate::events::{EngineEvent, EventBus};
use crate::models::{
    validate_digest, ChoiceReceipt, ChoiceRecord, EngineStats, ImageCounters, ImageRecord,
    Outcome, Pair, PairImage, ProgressReport,
};
use crate::pairing::{classify, pair_key, select_pair, RecencyView};
use crate::rating::Rater;

/// The pair most recently issued by next_pair, for strict validation.
#[derive(Debug, Clone)]
struct IssuedPair {
    round: i64,
    key: (String, String),
}

#[derive(Debug, Default)]
struct SessionState {
    rings: SessionRings,
    issued: Option<IssuedPair>,
}

/// Orchestrates catalog, rating, pairing, and convergence behind four
/// public operations plus the catalog pass-throughs.
pub struct SessionCoordinator {
    db: SqlitePool,
    catalog: Arc<Catalog>,
    tuning: TuningConfig,
    rater: Rater,
    detector: ConvergenceDetector,
    events: EventBus,
    state: Mutex<SessionState>,
}

impl SessionCoordinator {
    /// Build a coordinator over an initialized database, restoring the
    /// persisted ring buffers.
    pub async fn new(db: SqlitePool, tuning: TuningConfig) -> EngineResult<Self> {
        tuning.validate().map_err(EngineError::Storage)?;
        let (_, rings) = app_state::load(&db).await.map_err(EngineError::Storage)?;

        Ok(Self {
            catalog: Arc::new(Catalog::new(&tuning)),
            rater: Rater::new(&tuning),
            detector: ConvergenceDetector::new(&tuning),
            events: EventBus::default(),
            state: Mutex::new(SessionState {
                rings,
                issued: None,
            }),
            tuning,
            db,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Point the engine at an image root and scan it.
    pub async fn set_root(&self, root: &Path) -> EngineResult<ScanSummary> {
        self.set_root_with_cancel(root, CancellationToken::new())
            .await
    }

    /// set_root with a caller-owned cancellation token; cancellation
    /// aborts at chunk boundaries without mutating any state.
    pub async fn set_root_with_cancel(
        &self,
        root: &Path,
        cancel: CancellationToken,
    ) -> EngineResult<ScanSummary> {
        let summary = self.catalog.scan(root, cancel).await?;

        // Newly observed digests get rating records immediately so the
        // pairing engine sees one coherent catalog.
        let present = self.catalog.present_digests().await;
        let db = &self.db;
        let (initial_mu, sigma_initial) = (self.tuning.initial_mu, self.tuning.sigma_initial);
        retry_on_lock("seed scanned images", self.tuning.db_retry_attempts, || async {
            let mut tx = db.begin().await?;
            images::seed_images(&mut tx, &present, initial_mu, sigma_initial).await?;
            tx.commit().await?;
            Ok(())
        })
        .await
        .map_err(EngineError::Storage)?;

        self.events.emit(EngineEvent::ScanCompleted {
            image_count: summary.image_count,
            new_digests: summary.new_digests,
            timestamp: Utc::now(),
        });
        Ok(summary)
    }

    /// Select the next pair to show. Does not advance the round.
    pub async fn next_pair(&self) -> EngineResult<Pair> {
        let mut state = self.state.lock().await;

        if self.catalog.root().await.is_none() {
            return Err(EngineError::NoDirectorySet);
        }
        let present = self.catalog.present_digests().await;
        if present.len() < 2 {
            return Err(EngineError::NotEnoughImages);
        }

        let round = app_state::current_round(&self.db)
            .await
            .map_err(EngineError::Storage)?;
        let records = self.present_records(&present).await?;
        let pools = classify(records, round);

        let recent_images: HashSet<String> =
            state.rings.recent_images.iter().cloned().collect();
        let recent_pairs: HashSet<(String, String)> =
            state.rings.recent_pairs.iter().cloned().collect();
        let (left_digest, right_digest) = {
            let mut rng = rand::thread_rng();
            select_pair(
                &pools,
                RecencyView {
                    images: &recent_images,
                    pairs: &recent_pairs,
                },
                &self.tuning,
                &mut rng,
            )?
        };

        // Stage the updated rings, persist, and only then adopt them.
        let mut rings = state.rings.clone();
        push_bounded(
            &mut rings.recent_images,
            left_digest.clone(),
            self.tuning.recent_images_window,
        );
        push_bounded(
            &mut rings.recent_images,
            right_digest.clone(),
            self.tuning.recent_images_window,
        );
        push_bounded(
            &mut rings.recent_pairs,
            pair_key(&left_digest, &right_digest),
            self.tuning.recent_pairs_window,
        );

        let db = &self.db;
        retry_on_lock("persist recency rings", self.tuning.db_retry_attempts, || {
            let rings = &rings;
            async move {
                let mut conn = db.acquire().await?;
                app_state::save_rings(&mut conn, rings).await
            }
        })
        .await
        .map_err(EngineError::Storage)?;

        state.rings = rings;
        state.issued = Some(IssuedPair {
            round,
            key: pair_key(&left_digest, &right_digest),
        });

        debug!(round, left = %left_digest, right = %right_digest, "Issued pair");
        Ok(Pair {
            round,
            left: self.pair_image(left_digest).await,
            right: self.pair_image(right_digest).await,
        })
    }

    /// Validate and commit one choice: posterior updates, the choice
    /// row, the round bump, and the ring buffers, in one transaction.
    pub async fn record_choice(
        &self,
        round: i64,
        left_digest: &str,
        right_digest: &str,
        outcome: &str,
    ) -> EngineResult<ChoiceReceipt> {
        let outcome: Outcome = outcome.parse()?;
        validate_digest(left_digest)?;
        validate_digest(right_digest)?;
        if left_digest == right_digest {
            return Err(EngineError::SelfPair);
        }

        let mut state = self.state.lock().await;

        let current = app_state::current_round(&self.db)
            .await
            .map_err(EngineError::Storage)?;
        if round != current {
            return Err(EngineError::StaleRound {
                expected: current,
                got: round,
            });
        }

        for digest in [left_digest, right_digest] {
            if !self.catalog.is_present(digest).await {
                return Err(EngineError::UnknownDigest(digest.to_string()));
            }
        }

        if self.tuning.strict_pair_validation {
            let submitted = pair_key(left_digest, right_digest);
            match &state.issued {
                Some(issued) if issued.round == round && issued.key == submitted => {}
                _ => return Err(EngineError::DigestMismatch),
            }
        }

        // Load posteriors and compute the update outside the transaction;
        // the session lock guarantees nothing commits in between.
        let left_before = self.record_or_fresh(left_digest).await?;
        let right_before = self.record_or_fresh(right_digest).await?;
        let (left_after, right_after) = {
            let mut rng = rand::thread_rng();
            self.rater
                .rate(&left_before, &right_before, outcome, round, &mut rng)
        };

        let choice = ChoiceRecord {
            round,
            left_digest: left_digest.to_string(),
            right_digest: right_digest.to_string(),
            outcome,
            left_mu_before: left_before.mu,
            left_mu_after: left_after.mu,
            right_mu_before: right_before.mu,
            right_mu_after: right_after.mu,
            left_sigma_before: left_before.sigma,
            left_sigma_after: left_after.sigma,
            right_sigma_before: right_before.sigma,
            right_sigma_after: right_after.sigma,
            recorded_at: Utc::now(),
        };

        // The post-commit top-K snapshot, staged into the rings that
        // commit with the choice.
        let present = self.catalog.present_digests().await;
        let mut records = self.present_records(&present).await?;
        for record in records.iter_mut() {
            if record.digest == left_after.digest {
                *record = left_after.clone();
            } else if record.digest == right_after.digest {
                *record = right_after.clone();
            }
        }
        let mut rings = state.rings.clone();
        push_bounded(
            &mut rings.top_k_history,
            self.detector.top_k_snapshot(&records),
            self.tuning.stability_window,
        );

        let db = &self.db;
        let attempts = self.tuning.db_retry_attempts;
        let seeds = [left_digest.to_string(), right_digest.to_string()];
        let (initial_mu, sigma_initial) = (self.tuning.initial_mu, self.tuning.sigma_initial);
        let commit = retry_on_lock("record choice", attempts, || {
            let (left_after, right_after) = (&left_after, &right_after);
            let (choice, rings, seeds) = (&choice, &rings, &seeds);
            async move {
                let mut tx = db.begin().await?;
                images::seed_images(&mut tx, seeds, initial_mu, sigma_initial).await?;
                images::update_posterior(&mut tx, left_after).await?;
                images::update_posterior(&mut tx, right_after).await?;
                choices::insert_choice(&mut tx, choice).await?;
                let next_round = app_state::advance_round(&mut tx, choice.round).await?;
                app_state::save_rings(&mut tx, rings).await?;
                tx.commit().await?;
                Ok(next_round)
            }
        });

        let next_round =
            match tokio::time::timeout(Duration::from_millis(self.tuning.choice_timeout_ms), commit)
                .await
            {
                Err(_) => return Err(EngineError::Timeout),
                Ok(Err(err)) if err.is_transient() => {
                    return Err(EngineError::Contention(err.to_string()))
                }
                Ok(Err(err)) => return Err(EngineError::Storage(err)),
                Ok(Ok(next_round)) => next_round,
            };

        state.rings = rings;
        state.issued = None;

        info!(round, outcome = %outcome, next_round, "Choice committed");
        self.events.emit(EngineEvent::ChoiceRecorded {
            round,
            outcome,
            left_digest: left_digest.to_string(),
            right_digest: right_digest.to_string(),
            timestamp: Utc::now(),
        });

        let report = self
            .detector
            .report(&records, &state.rings.top_k_history, next_round, round);
        self.events.emit(EngineEvent::ProgressChanged {
            progress: report.progress,
            portfolio_ready: report.portfolio_ready,
            timestamp: Utc::now(),
        });

        Ok(ChoiceReceipt {
            saved: true,
            next_round,
        })
    }

    /// Current convergence metrics. Zeroed for an empty or never-judged
    /// catalog.
    pub async fn progress(&self) -> EngineResult<ProgressReport> {
        let history = {
            let state = self.state.lock().await;
            state.rings.top_k_history.clone()
        };

        let round = app_state::current_round(&self.db)
            .await
            .map_err(EngineError::Storage)?;
        let rated = choices::count_choices(&self.db)
            .await
            .map_err(EngineError::Storage)?;
        let present = self.catalog.present_digests().await;
        let records = self.present_records(&present).await?;

        Ok(self.detector.report(&records, &history, round, rated))
    }

    /// Clear all posteriors, the choice log, and the session state. The
    /// catalog is unaffected; present digests are re-seeded fresh.
    pub async fn reset(&self) -> EngineResult<()> {
        let mut state = self.state.lock().await;
        let present = self.catalog.present_digests().await;

        let db = &self.db;
        let (initial_mu, sigma_initial) = (self.tuning.initial_mu, self.tuning.sigma_initial);
        retry_on_lock("reset session", self.tuning.db_retry_attempts, || {
            let present = &present;
            async move {
                let mut tx = db.begin().await?;
                images::delete_all(&mut tx).await?;
                choices::delete_all(&mut tx).await?;
                app_state::reset(&mut tx).await?;
                images::seed_images(&mut tx, present, initial_mu, sigma_initial).await?;
                tx.commit().await?;
                Ok(())
            }
        })
        .await
        .map_err(EngineError::Storage)?;

        state.rings = SessionRings::default();
        state.issued = None;

        info!("Session reset");
        self.events.emit(EngineEvent::SessionReset {
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Raw image payload and MIME type by digest.
    pub async fn fetch_image(&self, digest: &str) -> EngineResult<(Vec<u8>, &'static str)> {
        validate_digest(digest)?;
        self.catalog.fetch_bytes(digest).await
    }

    /// Aggregate per-image counters.
    pub async fn stats(&self) -> EngineResult<EngineStats> {
        let images = images::all_images(&self.db)
            .await
            .map_err(EngineError::Storage)?;
        let rounds = choices::count_choices(&self.db)
            .await
            .map_err(EngineError::Storage)?;

        Ok(EngineStats {
            images: images.len() as i64,
            rounds,
            by_image: images
                .into_iter()
                .map(|record| ImageCounters {
                    digest: record.digest,
                    likes: record.likes,
                    unlikes: record.unlikes,
                    skips: record.skips,
                    exposures: record.exposures,
                })
                .collect(),
        })
    }

    /// Rating records for every present digest; digests the store has
    /// not seen yet (mid-scan) get fresh in-memory posteriors.
    async fn present_records(&self, present: &[String]) -> EngineResult<Vec<ImageRecord>> {
        let all = images::all_images(&self.db)
            .await
            .map_err(EngineError::Storage)?;
        let mut by_digest: std::collections::HashMap<String, ImageRecord> =
            all.into_iter().map(|r| (r.digest.clone(), r)).collect();

        Ok(present
            .iter()
            .map(|digest| {
                by_digest.remove(digest).unwrap_or_else(|| {
                    ImageRecord::new(
                        digest.clone(),
                        self.tuning.initial_mu,
                        self.tuning.sigma_initial,
                    )
                })
            })
            .collect())
    }

    async fn record_or_fresh(&self, digest: &str) -> EngineResult<ImageRecord> {
        Ok(images::get_image(&self.db, digest)
            .await
            .map_err(EngineError::Storage)?
            .unwrap_or_else(|| {
                ImageRecord::new(
                    digest.to_string(),
                    self.tuning.initial_mu,
                    self.tuning.sigma_initial,
                )
            }))
    }

    async fn pair_image(&self, digest: String) -> PairImage {
        let entry = self.catalog.lookup(&digest).await;
        PairImage {
            width: entry.as_ref().and_then(|e| e.width),
            height: entry.as_ref().and_then(|e| e.height),
            digest,
        }
    }
}

fn push_bounded<T>(ring: &mut std::collections::VecDeque<T>, value: T, capacity: usize) {
    ring.push_back(value);
    while ring.len() > capacity {
        ring.pop_front();
    }
}
