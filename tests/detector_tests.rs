// Gap detector tests: reconciliation, the both-tables rule, noise
// suppression, idempotence, and unavailability classification.

mod common;

use common::*;
use preagg::calendar::epoch_ms_now;
use preagg::detector::GapDetector;
use preagg::error::BackfillError;
use preagg::models::{Granularity, TeamId};

const TEAM: TeamId = TeamId(42);

fn detector(env: &TestEnv, noise_threshold: usize) -> GapDetector {
    GapDetector::new(env.aggregate_repo.clone(), noise_threshold)
}

#[tokio::test]
async fn fresh_team_reports_all_partitions_missing() {
    let env = test_env().await;
    let det = detector(&env, 3);

    let report = det
        .detect_gaps(TEAM, epoch_ms_now(), 7, Granularity::Day)
        .await
        .unwrap();
    assert_eq!(report.expected.len(), 7);
    assert!(report.present.is_empty());
    assert_eq!(report.missing.len(), 7);
    assert_eq!(report.missing, report.expected);
    assert_eq!(report.suppressed, 0);
}

#[tokio::test]
async fn missing_is_subset_of_expected_and_sorted() {
    let env = test_env().await;
    for days_ago in [1, 3, 5] {
        publish_partition(&env, &daily_key(TEAM, days_ago)).await;
    }
    let det = detector(&env, 3);
    let report = det
        .detect_gaps(TEAM, epoch_ms_now(), 10, Granularity::Day)
        .await
        .unwrap();

    assert_eq!(report.missing.len(), 7);
    for key in &report.missing {
        assert!(report.expected.contains(key));
        assert!(!report.present.contains(key));
    }
    for pair in report.missing.windows(2) {
        assert!(pair[0].bucket_start < pair[1].bucket_start);
    }
}

#[tokio::test]
async fn partition_in_only_one_table_is_a_gap() {
    let env = test_env().await;
    let key = daily_key(TEAM, 1);
    // Overview row with traffic but no breakdown rows: inconsistent.
    sqlx::query(
        "INSERT INTO agg_overview_daily
         (team_id, bucket_start, granularity_secs, pageviews, visitors, sessions)
         VALUES ($1, $2, $3, 10, 5, 5)",
    )
    .bind(key.team_id.0)
    .bind(key.bucket_start)
    .bind(key.granularity.secs())
    .execute(&env.pool)
    .await
    .unwrap();

    let det = detector(&env, 1);
    let report = det
        .detect_gaps(TEAM, epoch_ms_now(), 7, Granularity::Day)
        .await
        .unwrap();
    assert!(report.missing.contains(&key));
    assert!(!report.present.contains(&key));
}

#[tokio::test]
async fn zero_traffic_overview_row_counts_as_present() {
    let env = test_env().await;
    let key = daily_key(TEAM, 1);
    sqlx::query(
        "INSERT INTO agg_overview_daily
         (team_id, bucket_start, granularity_secs, pageviews, visitors, sessions)
         VALUES ($1, $2, $3, 0, 0, 0)",
    )
    .bind(key.team_id.0)
    .bind(key.bucket_start)
    .bind(key.granularity.secs())
    .execute(&env.pool)
    .await
    .unwrap();

    let det = detector(&env, 1);
    let report = det
        .detect_gaps(TEAM, epoch_ms_now(), 7, Granularity::Day)
        .await
        .unwrap();
    assert!(report.present.contains(&key));
    assert!(!report.missing.contains(&key));
}

#[tokio::test]
async fn one_gap_out_of_ten_is_suppressed_as_noise() {
    let env = test_env().await;
    for days_ago in 1..=10 {
        if days_ago != 10 {
            publish_partition(&env, &daily_key(TEAM, days_ago)).await;
        }
    }
    let det = detector(&env, 3);
    let report = det
        .detect_gaps(TEAM, epoch_ms_now(), 10, Granularity::Day)
        .await
        .unwrap();

    assert!(report.missing.is_empty());
    assert_eq!(report.suppressed, 1);
    assert!(report.is_clean());
}

#[tokio::test]
async fn noise_threshold_boundary() {
    let env = test_env().await;
    // 8 of 10 present: 2 missing, below the default threshold of 3.
    for days_ago in 3..=10 {
        publish_partition(&env, &daily_key(TEAM, days_ago)).await;
    }
    let det = detector(&env, 3);
    let report = det
        .detect_gaps(TEAM, epoch_ms_now(), 10, Granularity::Day)
        .await
        .unwrap();
    assert!(report.missing.is_empty());
    assert_eq!(report.suppressed, 2);

    // Remove one more: 3 missing is exactly at threshold, reported.
    sqlx::query("DELETE FROM agg_overview_daily WHERE bucket_start = $1")
        .bind(day_start(3))
        .execute(&env.pool)
        .await
        .unwrap();
    let report = det
        .detect_gaps(TEAM, epoch_ms_now(), 10, Granularity::Day)
        .await
        .unwrap();
    assert_eq!(report.missing.len(), 3);
    assert_eq!(report.suppressed, 0);
}

#[tokio::test]
async fn detection_is_idempotent_without_intervening_writes() {
    let env = test_env().await;
    for days_ago in [2, 4] {
        publish_partition(&env, &daily_key(TEAM, days_ago)).await;
    }
    let det = detector(&env, 3);
    let now = epoch_ms_now();
    let a = det.detect_gaps(TEAM, now, 7, Granularity::Day).await.unwrap();
    let b = det.detect_gaps(TEAM, now, 7, Granularity::Day).await.unwrap();
    assert_eq!(a.expected, b.expected);
    assert_eq!(a.present, b.present);
    assert_eq!(a.missing, b.missing);
    assert_eq!(a.suppressed, b.suppressed);
}

#[tokio::test]
async fn store_error_is_unavailability_not_zero_gaps() {
    let env = test_env().await;
    sqlx::query("DROP TABLE agg_overview_daily")
        .execute(&env.pool)
        .await
        .unwrap();

    let det = detector(&env, 3);
    let result = det
        .detect_gaps(TEAM, epoch_ms_now(), 7, Granularity::Day)
        .await;
    match result {
        Err(BackfillError::DetectionUnavailable { team_id, .. }) => {
            assert_eq!(team_id, TEAM);
        }
        other => panic!("expected DetectionUnavailable, got {:?}", other.map(|r| r.missing)),
    }
}

#[tokio::test]
async fn detector_never_writes_to_the_store() {
    let env = test_env().await;
    publish_partition(&env, &daily_key(TEAM, 1)).await;

    let det = detector(&env, 3);
    let _ = det
        .detect_gaps(TEAM, epoch_ms_now(), 7, Granularity::Day)
        .await
        .unwrap();

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM agg_overview_daily")
        .fetch_one(&env.pool)
        .await
        .unwrap();
    assert_eq!(rows, 1);
    let staged: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM staging_overview")
        .fetch_one(&env.pool)
        .await
        .unwrap();
    assert_eq!(staged, 0);
}
