use anyhow::Result;
use preagg::*;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    tracing::info!(version = version::VERSION, "starting {}", version::NAME);

    let app_config = config::AppConfig::load()?;

    let pool = db::connect(
        &app_config.database.path,
        app_config.database.max_pool_size,
    )
    .await?;

    let team_repo = Arc::new(team_repo::TeamRepo::new(pool.clone()));
    let event_repo = Arc::new(event_repo::EventRepo::new(pool.clone()));
    let aggregate_repo = Arc::new(aggregate_repo::AggregateRepo::new(pool.clone()));
    let lease_repo = Arc::new(lease_repo::LeaseRepo::new(pool.clone()));
    team_repo.init().await?;
    event_repo.init().await?;
    aggregate_repo.init().await?;
    lease_repo.init().await?;

    let signals = Arc::new(signals::Signals::new());
    let detector = Arc::new(detector::GapDetector::new(
        aggregate_repo.clone(),
        app_config.engine.noise_threshold,
    ));
    let executor = Arc::new(executor::BackfillExecutor::new(
        event_repo.clone(),
        aggregate_repo.clone(),
    ));
    let coordinator = Arc::new(coordinator::BackfillCoordinator::new(
        detector,
        executor,
        lease_repo.clone(),
        signals.clone(),
        coordinator::CoordinatorConfig {
            max_attempts: app_config.engine.max_attempts,
            retry_backoff_base: std::time::Duration::from_secs(
                app_config.engine.retry_backoff_base_secs,
            ),
            lease_ttl: std::time::Duration::from_secs(app_config.engine.lease_ttl_secs),
            degraded_cooldown: std::time::Duration::from_secs(
                app_config.engine.degraded_cooldown_secs,
            ),
            job_deadline: std::time::Duration::from_secs(app_config.engine.job_deadline_secs),
            max_concurrent_jobs: app_config.engine.max_concurrent_jobs,
            granularity: app_config.engine.granularity,
        },
    ));

    let orchestrator_config = orchestrator::OrchestratorConfig {
        sweep_interval_secs: app_config.engine.sweep_interval_secs,
        sweep_schedule: app_config.engine.sweep_schedule.clone(),
        stats_log_interval_secs: app_config.engine.stats_log_interval_secs,
        dispatch_capacity: app_config.engine.dispatch_capacity,
        default_lookback_days: app_config.engine.lookback_days,
        heuristic_window_days: app_config.selection.heuristic_window_days,
        granularity: app_config.engine.granularity,
        selector: selector::SelectorConfig {
            heuristic_cap: app_config.selection.heuristic_cap,
            allow_list: app_config
                .selection
                .allow_list
                .iter()
                .map(|&id| models::TeamId(id))
                .collect(),
            fallback_teams: app_config
                .selection
                .fallback_teams
                .iter()
                .map(|&id| models::TeamId(id))
                .collect(),
        },
    };

    backfill::run_backfill(
        team_repo.clone(),
        event_repo.clone(),
        coordinator.clone(),
        &orchestrator_config,
    )
    .await?;

    let (enablement_tx, enablement_rx) = tokio::sync::mpsc::channel(64);
    let _watcher = orchestrator::spawn_enablement_watcher(
        team_repo.clone(),
        enablement_tx,
        app_config.engine.enablement_poll_secs,
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let orchestrator_handle = orchestrator::spawn(
        orchestrator::OrchestratorDeps {
            team_repo,
            event_repo,
            coordinator,
            signals,
            enablement_rx,
            shutdown_rx,
        },
        orchestrator_config,
    );

    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => {
                tokio::signal::ctrl_c().await?;
                let _ = shutdown_tx.send(());
                let _ = orchestrator_handle.await;
                return Ok(());
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    tracing::info!("Received shutdown signal");
    let _ = shutdown_tx.send(());
    let _ = orchestrator_handle.await;

    Ok(())
}
