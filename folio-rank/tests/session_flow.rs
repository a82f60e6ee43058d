//! End-to-end session flow: scan, pair, choose, observe progress.

mod common;

use common::{coordinator, default_coordinator, seed_images, tiny_png};
use folio_common::TuningConfig;
use folio_rank::{EngineError, Outcome, Quality};

#[tokio::test]
async fn next_pair_requires_a_root() {
    let session = default_coordinator().await;
    assert!(matches!(
        session.next_pair().await,
        Err(EngineError::NoDirectorySet)
    ));
}

#[tokio::test]
async fn set_root_rejects_missing_directory() {
    let session = default_coordinator().await;
    let result = session
        .set_root(std::path::Path::new("/no/such/folio/dir"))
        .await;
    assert!(matches!(result, Err(EngineError::DirectoryNotFound(_))));
}

#[tokio::test]
async fn set_root_enforces_file_cap() {
    let dir = tempfile::tempdir().unwrap();
    seed_images(dir.path(), 5);

    let session = coordinator(TuningConfig {
        max_files: 3,
        ..Default::default()
    })
    .await;
    assert!(matches!(
        session.set_root(dir.path()).await,
        Err(EngineError::TooManyFiles { limit: 3, .. })
    ));
    // The failed scan must leak nothing.
    assert!(matches!(
        session.next_pair().await,
        Err(EngineError::NoDirectorySet)
    ));
}

#[tokio::test]
async fn one_image_is_not_enough() {
    let dir = tempfile::tempdir().unwrap();
    seed_images(dir.path(), 1);

    let session = default_coordinator().await;
    session.set_root(dir.path()).await.unwrap();
    assert!(matches!(
        session.next_pair().await,
        Err(EngineError::NotEnoughImages)
    ));
}

#[tokio::test]
async fn full_choice_loop_advances_rounds_and_updates_posteriors() {
    let dir = tempfile::tempdir().unwrap();
    seed_images(dir.path(), 8);

    let (pool, session) = common::coordinator_with_pool(folio_common::TuningConfig::default()).await;
    let summary = session.set_root(dir.path()).await.unwrap();
    assert_eq!(summary.image_count, 8);
    assert_eq!(summary.new_digests, 8);

    let pair = session.next_pair().await.unwrap();
    assert_eq!(pair.round, 1);
    assert_ne!(pair.left.digest, pair.right.digest);
    assert_eq!(pair.left.width, Some(8));

    let receipt = session
        .record_choice(pair.round, &pair.left.digest, &pair.right.digest, "LEFT")
        .await
        .unwrap();
    assert!(receipt.saved);
    assert_eq!(receipt.next_round, 2);

    let stats = session.stats().await.unwrap();
    assert_eq!(stats.rounds, 1);
    let left = stats
        .by_image
        .iter()
        .find(|c| c.digest == pair.left.digest)
        .unwrap();
    assert_eq!((left.likes, left.unlikes, left.exposures), (1, 0, 1));

    // Fresh equal posteriors, LEFT outcome: 1512 / 1488, sigma 339.5.
    let log = folio_rank::db::choices::all_choices(&pool).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].round, 1);
    assert!((log[0].left_mu_after - 1512.0).abs() < 1e-9);
    assert!((log[0].right_mu_after - 1488.0).abs() < 1e-9);
    assert!((log[0].left_sigma_after - 339.5).abs() < 1e-9);

    let pair2 = session.next_pair().await.unwrap();
    assert_eq!(pair2.round, 2);
}

#[tokio::test]
async fn recorded_choice_snapshots_match_rating_math() {
    let dir = tempfile::tempdir().unwrap();
    seed_images(dir.path(), 4);

    let session = default_coordinator().await;
    session.set_root(dir.path()).await.unwrap();

    let pair = session.next_pair().await.unwrap();
    session
        .record_choice(pair.round, &pair.left.digest, &pair.right.digest, "LEFT")
        .await
        .unwrap();

    let report = session.progress().await.unwrap();
    assert_eq!(report.round, 2);
    assert_eq!(report.rated_choices, 1);
    assert_eq!(report.catalog_size, 4);
}

#[tokio::test]
async fn invalid_inputs_are_rejected_without_state_change() {
    let dir = tempfile::tempdir().unwrap();
    seed_images(dir.path(), 4);

    let session = default_coordinator().await;
    session.set_root(dir.path()).await.unwrap();
    let pair = session.next_pair().await.unwrap();

    // Unknown outcome.
    assert!(matches!(
        session
            .record_choice(pair.round, &pair.left.digest, &pair.right.digest, "MAYBE")
            .await,
        Err(EngineError::InvalidOutcome(_))
    ));

    // Malformed digest.
    assert!(matches!(
        session
            .record_choice(pair.round, "abc", &pair.right.digest, "LEFT")
            .await,
        Err(EngineError::InvalidDigest(_))
    ));

    // Self pair.
    assert!(matches!(
        session
            .record_choice(pair.round, &pair.left.digest, &pair.left.digest, "LEFT")
            .await,
        Err(EngineError::SelfPair)
    ));

    // Well-formed but unknown digest.
    let ghost = "0123456789abcdef".repeat(4);
    assert!(matches!(
        session
            .record_choice(pair.round, &ghost, &pair.right.digest, "LEFT")
            .await,
        Err(EngineError::UnknownDigest(_))
    ));

    // Nothing committed, round unmoved.
    let report = session.progress().await.unwrap();
    assert_eq!(report.round, 1);
    assert_eq!(report.rated_choices, 0);
}

#[tokio::test]
async fn stale_round_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    seed_images(dir.path(), 6);

    let session = default_coordinator().await;
    session.set_root(dir.path()).await.unwrap();

    let pair = session.next_pair().await.unwrap();
    session
        .record_choice(pair.round, &pair.left.digest, &pair.right.digest, "RIGHT")
        .await
        .unwrap();

    // The same round quoted again is stale now.
    let result = session
        .record_choice(pair.round, &pair.left.digest, &pair.right.digest, "LEFT")
        .await;
    match result {
        Err(EngineError::StaleRound { expected, got }) => {
            assert_eq!(expected, 2);
            assert_eq!(got, 1);
        }
        other => panic!("expected StaleRound, got {other:?}"),
    }

    let report = session.progress().await.unwrap();
    assert_eq!(report.round, 2);
    assert_eq!(report.rated_choices, 1);
}

#[tokio::test]
async fn strict_mode_rejects_unissued_pairs() {
    let dir = tempfile::tempdir().unwrap();
    seed_images(dir.path(), 6);

    let session = coordinator(TuningConfig {
        strict_pair_validation: true,
        ..Default::default()
    })
    .await;
    session.set_root(dir.path()).await.unwrap();

    let pair = session.next_pair().await.unwrap();
    let digests = session.catalog().present_digests().await;
    let outsider = digests
        .iter()
        .find(|d| **d != pair.left.digest && **d != pair.right.digest)
        .unwrap();

    assert!(matches!(
        session
            .record_choice(pair.round, &pair.left.digest, outsider, "LEFT")
            .await,
        Err(EngineError::DigestMismatch)
    ));

    // The issued pair itself commits fine.
    session
        .record_choice(pair.round, &pair.left.digest, &pair.right.digest, "LEFT")
        .await
        .unwrap();
}

#[tokio::test]
async fn fetch_image_round_trips_payload() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("only.png"), tiny_png(42))?;
    std::fs::write(dir.path().join("other.png"), tiny_png(43))?;

    let session = default_coordinator().await;
    session.set_root(dir.path()).await?;

    let digests = session.catalog().present_digests().await;
    let (bytes, mime) = session.fetch_image(&digests[0]).await?;
    assert_eq!(mime, "image/png");
    assert!(bytes == tiny_png(42) || bytes == tiny_png(43));

    assert!(matches!(
        session.fetch_image(&"f".repeat(64)).await,
        Err(EngineError::UnknownDigest(_))
    ));
    assert!(matches!(
        session.fetch_image("not-a-digest").await,
        Err(EngineError::InvalidDigest(_))
    ));
    Ok(())
}

#[tokio::test]
async fn progress_starts_at_zero_and_grows() {
    let dir = tempfile::tempdir().unwrap();
    seed_images(dir.path(), 4);

    let session = default_coordinator().await;

    // No catalog at all.
    let report = session.progress().await.unwrap();
    assert_eq!(report.progress, 0.0);
    assert_eq!(report.quality, Quality::Early);
    assert!(!report.portfolio_ready);

    // Catalog but zero exposures.
    session.set_root(dir.path()).await.unwrap();
    let report = session.progress().await.unwrap();
    assert_eq!(report.progress, 0.0);
    assert_eq!(report.coverage, 0.0);
    assert_eq!(report.boundary_gap, 0.0);
    assert_eq!(report.stability, 0.0);

    // Judgments move it.
    for _ in 0..12 {
        let pair = session.next_pair().await.unwrap();
        session
            .record_choice(pair.round, &pair.left.digest, &pair.right.digest, "LEFT")
            .await
            .unwrap();
    }
    let report = session.progress().await.unwrap();
    assert!(report.progress > 0.0);
    assert_eq!(report.rated_choices, 12);
}

#[tokio::test]
async fn events_are_broadcast_on_commit() {
    let dir = tempfile::tempdir().unwrap();
    seed_images(dir.path(), 4);

    let session = default_coordinator().await;
    let mut rx = session.subscribe_events();

    session.set_root(dir.path()).await.unwrap();
    let pair = session.next_pair().await.unwrap();
    session
        .record_choice(pair.round, &pair.left.digest, &pair.right.digest, "SKIP")
        .await
        .unwrap();

    let mut saw_scan = false;
    let mut saw_choice = false;
    while let Ok(event) = rx.try_recv() {
        match event {
            folio_rank::events::EngineEvent::ScanCompleted { image_count, .. } => {
                assert_eq!(image_count, 4);
                saw_scan = true;
            }
            folio_rank::events::EngineEvent::ChoiceRecorded { outcome, .. } => {
                assert_eq!(outcome, Outcome::Skip);
                saw_choice = true;
            }
            _ => {}
        }
    }
    assert!(saw_scan);
    assert!(saw_choice);
}
