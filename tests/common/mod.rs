// Shared test helpers: a temp SQLite database with all engine tables, plus
// seeding utilities for teams, events, and published partitions.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use preagg::aggregate_repo::AggregateRepo;
use preagg::calendar::{epoch_ms_now, floor_to_bucket};
use preagg::coordinator::{BackfillCoordinator, CoordinatorConfig};
use preagg::detector::GapDetector;
use preagg::event_repo::EventRepo;
use preagg::executor::BackfillExecutor;
use preagg::lease_repo::LeaseRepo;
use preagg::models::*;
use preagg::signals::Signals;
use preagg::team_repo::TeamRepo;
use tempfile::TempDir;

pub struct TestEnv {
    // Kept alive so the database file outlives the test body.
    pub dir: TempDir,
    pub pool: sqlx::SqlitePool,
    pub team_repo: Arc<TeamRepo>,
    pub event_repo: Arc<EventRepo>,
    pub aggregate_repo: Arc<AggregateRepo>,
    pub lease_repo: Arc<LeaseRepo>,
}

pub async fn test_env() -> TestEnv {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("preagg.db");
    let pool = preagg::db::connect(path.to_str().unwrap(), 5).await.unwrap();

    let team_repo = Arc::new(TeamRepo::new(pool.clone()));
    let event_repo = Arc::new(EventRepo::new(pool.clone()));
    let aggregate_repo = Arc::new(AggregateRepo::new(pool.clone()));
    let lease_repo = Arc::new(LeaseRepo::new(pool.clone()));
    team_repo.init().await.unwrap();
    event_repo.init().await.unwrap();
    aggregate_repo.init().await.unwrap();
    lease_repo.init().await.unwrap();

    TestEnv {
        dir,
        pool,
        team_repo,
        event_repo,
        aggregate_repo,
        lease_repo,
    }
}

/// Coordinator with test-sized timings (fast backoff, short deadline).
pub fn make_coordinator(
    env: &TestEnv,
    noise_threshold: usize,
    max_attempts: u32,
) -> Arc<BackfillCoordinator> {
    let signals = Arc::new(Signals::new());
    let detector = Arc::new(GapDetector::new(env.aggregate_repo.clone(), noise_threshold));
    let executor = Arc::new(BackfillExecutor::new(
        env.event_repo.clone(),
        env.aggregate_repo.clone(),
    ));
    Arc::new(BackfillCoordinator::new(
        detector,
        executor,
        env.lease_repo.clone(),
        signals,
        CoordinatorConfig {
            max_attempts,
            retry_backoff_base: Duration::from_millis(10),
            lease_ttl: Duration::from_secs(60),
            degraded_cooldown: Duration::from_secs(60),
            job_deadline: Duration::from_secs(30),
            max_concurrent_jobs: 4,
            granularity: Granularity::Day,
        },
    ))
}

/// Start of the daily bucket `days_ago` full days before now.
pub fn day_start(days_ago: u32) -> i64 {
    floor_to_bucket(epoch_ms_now(), Granularity::Day) - (days_ago as i64) * MS_PER_DAY
}

pub fn daily_key(team_id: TeamId, days_ago: u32) -> PartitionKey {
    PartitionKey::new(team_id, day_start(days_ago), Granularity::Day)
}

pub async fn insert_team(
    env: &TestEnv,
    team_id: TeamId,
    name: &str,
    preagg_enabled: Option<bool>,
    lookback_days: Option<u32>,
) {
    sqlx::query(
        "INSERT OR REPLACE INTO teams (team_id, name, preagg_enabled, lookback_days)
         VALUES ($1, $2, $3, $4)",
    )
    .bind(team_id.0)
    .bind(name)
    .bind(preagg_enabled.map(|b| b as i64))
    .bind(lookback_days.map(|d| d as i64))
    .execute(&env.pool)
    .await
    .unwrap();
}

pub async fn insert_event(
    env: &TestEnv,
    team_id: TeamId,
    occurred_at: i64,
    visitor_id: &str,
    session_id: &str,
    pathname: &str,
) {
    sqlx::query(
        "INSERT INTO events (team_id, occurred_at, visitor_id, session_id, pathname)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(team_id.0)
    .bind(occurred_at)
    .bind(visitor_id)
    .bind(session_id)
    .bind(pathname)
    .execute(&env.pool)
    .await
    .unwrap();
}

/// Seed `count` pageview events spread through one daily bucket, each from
/// its own visitor and session, alternating between two pathnames.
pub async fn seed_day(env: &TestEnv, team_id: TeamId, bucket_start: i64, count: usize) {
    for i in 0..count {
        let path = if i % 2 == 0 { "/" } else { "/pricing" };
        insert_event(
            env,
            team_id,
            bucket_start + (i as i64) * 60_000,
            &format!("v{}", i),
            &format!("s{}", i),
            path,
        )
        .await;
    }
}

/// Publish a partition directly into both live tables, bypassing the
/// executor (for seeding "already materialized" state).
pub async fn publish_partition(env: &TestEnv, key: &PartitionKey) {
    sqlx::query(
        "INSERT OR REPLACE INTO agg_overview_daily
         (team_id, bucket_start, granularity_secs, pageviews, visitors, sessions)
         VALUES ($1, $2, $3, 1, 1, 1)",
    )
    .bind(key.team_id.0)
    .bind(key.bucket_start)
    .bind(key.granularity.secs())
    .execute(&env.pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT OR REPLACE INTO agg_pathname_daily
         (team_id, bucket_start, granularity_secs, pathname, pageviews, visitors)
         VALUES ($1, $2, $3, '/', 1, 1)",
    )
    .bind(key.team_id.0)
    .bind(key.bucket_start)
    .bind(key.granularity.secs())
    .execute(&env.pool)
    .await
    .unwrap();
}

/// Wait until the tenant lease is released (job finished) or panic.
pub async fn wait_for_release(env: &TestEnv, team_id: TeamId) {
    for _ in 0..400 {
        if env
            .lease_repo
            .current_holder(team_id)
            .await
            .unwrap()
            .is_none()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("lease for team {} not released in time", team_id);
}
