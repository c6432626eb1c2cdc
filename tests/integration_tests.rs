// End-to-end engine tests: sweep pass over eligible teams, the enablement
// path, and the enablement watcher.

mod common;

use std::time::Duration;

use common::*;
use preagg::calendar::epoch_ms_now;
use preagg::detector::GapDetector;
use preagg::models::{Granularity, TeamId, TriggerSource};
use preagg::orchestrator::{OrchestratorConfig, run_sweep_once, spawn_enablement_watcher};
use preagg::selector::SelectorConfig;

fn orchestrator_config(allow: Vec<TeamId>, fallback: Vec<TeamId>) -> OrchestratorConfig {
    OrchestratorConfig {
        sweep_interval_secs: 3600,
        sweep_schedule: None,
        stats_log_interval_secs: 300,
        dispatch_capacity: 16,
        default_lookback_days: 7,
        heuristic_window_days: 14,
        granularity: Granularity::Day,
        selector: SelectorConfig {
            heuristic_cap: 30,
            allow_list: allow,
            fallback_teams: fallback,
        },
    }
}

#[tokio::test]
async fn sweep_backfills_enabled_teams_and_skips_disabled() {
    let env = test_env().await;
    let enabled = TeamId(1);
    let disabled = TeamId(2);
    insert_team(&env, enabled, "acme", Some(true), None).await;
    insert_team(&env, disabled, "other", Some(false), None).await;
    for d in 1..=7 {
        seed_day(&env, enabled, day_start(d), 3).await;
        seed_day(&env, disabled, day_start(d), 3).await;
    }

    let coordinator = make_coordinator(&env, 3, 3);
    let config = orchestrator_config(vec![], vec![]);
    let admitted = run_sweep_once(&env.team_repo, &env.event_repo, &coordinator, &config)
        .await
        .unwrap();
    assert_eq!(admitted, 1);
    wait_for_release(&env, enabled).await;

    // Enabled team fully materialized; disabled team untouched.
    let det = GapDetector::new(env.aggregate_repo.clone(), 3);
    let report = det
        .detect_gaps(enabled, epoch_ms_now(), 7, Granularity::Day)
        .await
        .unwrap();
    assert!(report.missing.is_empty());
    assert_eq!(report.present.len(), 7);

    assert!(
        env.aggregate_repo
            .get_overview(&daily_key(disabled, 1))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn sweep_respects_per_team_lookback_override() {
    let env = test_env().await;
    let team = TeamId(5);
    insert_team(&env, team, "deep", Some(true), Some(10)).await;
    for d in 1..=10 {
        seed_day(&env, team, day_start(d), 2).await;
    }

    let coordinator = make_coordinator(&env, 3, 3);
    let config = orchestrator_config(vec![], vec![]);
    let admitted = run_sweep_once(&env.team_repo, &env.event_repo, &coordinator, &config)
        .await
        .unwrap();
    assert_eq!(admitted, 1);
    wait_for_release(&env, team).await;

    for d in 1..=10 {
        assert!(
            env.aggregate_repo
                .get_overview(&daily_key(team, d))
                .await
                .unwrap()
                .is_some()
        );
    }
}

#[tokio::test]
async fn enablement_path_backfills_all_seven_partitions_in_one_job() {
    let env = test_env().await;
    let team = TeamId(9);
    insert_team(&env, team, "fresh", Some(true), None).await;
    for d in 1..=7 {
        seed_day(&env, team, day_start(d), 2).await;
    }

    let coordinator = make_coordinator(&env, 3, 3);
    assert!(coordinator.admit(team, 7, TriggerSource::Enablement).await);
    wait_for_release(&env, team).await;

    let det = GapDetector::new(env.aggregate_repo.clone(), 3);
    let report = det
        .detect_gaps(team, epoch_ms_now(), 7, Granularity::Day)
        .await
        .unwrap();
    assert_eq!(report.present.len(), 7);
    assert!(report.missing.is_empty());
    assert_eq!(report.suppressed, 0);
}

#[tokio::test]
async fn second_sweep_after_drain_admits_nothing_to_do() {
    let env = test_env().await;
    let team = TeamId(4);
    insert_team(&env, team, "steady", Some(true), None).await;
    for d in 1..=7 {
        seed_day(&env, team, day_start(d), 2).await;
    }

    let coordinator = make_coordinator(&env, 3, 3);
    let config = orchestrator_config(vec![], vec![]);
    run_sweep_once(&env.team_repo, &env.event_repo, &coordinator, &config)
        .await
        .unwrap();
    wait_for_release(&env, team).await;

    let before: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM agg_overview_daily")
        .fetch_one(&env.pool)
        .await
        .unwrap();

    // Second pass admits the team again, finds nothing, changes nothing.
    run_sweep_once(&env.team_repo, &env.event_repo, &coordinator, &config)
        .await
        .unwrap();
    wait_for_release(&env, team).await;

    let after: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM agg_overview_daily")
        .fetch_one(&env.pool)
        .await
        .unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn allow_list_team_is_swept_without_flag() {
    let env = test_env().await;
    let team = TeamId(6);
    insert_team(&env, team, "vip", None, None).await;
    for d in 1..=7 {
        seed_day(&env, team, day_start(d), 2).await;
    }

    let coordinator = make_coordinator(&env, 3, 3);
    let config = orchestrator_config(vec![team], vec![]);
    let admitted = run_sweep_once(&env.team_repo, &env.event_repo, &coordinator, &config)
        .await
        .unwrap();
    assert_eq!(admitted, 1);
    wait_for_release(&env, team).await;
    assert!(
        env.aggregate_repo
            .get_overview(&daily_key(team, 1))
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn enablement_watcher_emits_on_disabled_to_enabled_transition() {
    let env = test_env().await;
    let team = TeamId(8);
    insert_team(&env, team, "flip", Some(false), None).await;

    let (tx, mut rx) = tokio::sync::mpsc::channel(8);
    let watcher = spawn_enablement_watcher(env.team_repo.clone(), tx, 1);

    // Let the watcher seed its baseline, then flip the flag.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    insert_team(&env, team, "flip", Some(true), None).await;

    let received = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("watcher did not emit within 5s");
    assert_eq!(received, Some(team));

    // No duplicate event while the flag stays on.
    let extra = tokio::time::timeout(Duration::from_millis(1500), rx.recv()).await;
    assert!(extra.is_err());

    watcher.abort();
}
