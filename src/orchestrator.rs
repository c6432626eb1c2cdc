// Composition root for the trigger side. The trigger loop only translates
// ticks and enablement events into queued work items; selection, detection
// and admission all happen on the dispatcher task, so a slow store never
// blocks trigger consumption. Sweeps run on a fixed interval or an
// optional cron schedule.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::calendar::{epoch_ms_now, floor_to_bucket};
use crate::coordinator::BackfillCoordinator;
use crate::event_repo::EventRepo;
use crate::models::{Granularity, MS_PER_DAY, TeamId, TriggerSource};
use crate::selector::{self, SelectorConfig};
use crate::signals::Signals;
use crate::team_repo::TeamRepo;

/// Queued unit of trigger work.
#[derive(Debug, Clone, Copy)]
enum WorkItem {
    /// Periodic pass over all eligible tenants.
    Sweep,
    /// Single-tenant pass (enablement path, bypasses the interval).
    Tenant {
        team_id: TeamId,
        source: TriggerSource,
    },
}

pub struct OrchestratorDeps {
    pub team_repo: Arc<TeamRepo>,
    pub event_repo: Arc<EventRepo>,
    pub coordinator: Arc<BackfillCoordinator>,
    pub signals: Arc<Signals>,
    pub enablement_rx: mpsc::Receiver<TeamId>,
    pub shutdown_rx: tokio::sync::oneshot::Receiver<()>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub sweep_interval_secs: u64,
    /// Optional cron expression for sweeps (local time). Overrides the
    /// fixed interval when set.
    pub sweep_schedule: Option<String>,
    pub stats_log_interval_secs: u64,
    /// Dispatch queue capacity; a full queue drops the trigger (the next
    /// tick retries).
    pub dispatch_capacity: usize,
    pub default_lookback_days: u32,
    pub heuristic_window_days: u32,
    pub granularity: Granularity,
    pub selector: SelectorConfig,
}

/// Spawns the trigger loop and its dispatcher. Returns a join handle.
pub fn spawn(deps: OrchestratorDeps, config: OrchestratorConfig) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run(deps, config).await;
    })
}

#[instrument(skip(deps, config), fields(sweep_interval_secs = config.sweep_interval_secs))]
async fn run(deps: OrchestratorDeps, config: OrchestratorConfig) {
    let OrchestratorDeps {
        team_repo,
        event_repo,
        coordinator,
        signals,
        mut enablement_rx,
        mut shutdown_rx,
    } = deps;

    let (work_tx, work_rx) = mpsc::channel::<WorkItem>(config.dispatch_capacity.max(1));
    let dispatcher = tokio::spawn(dispatch_loop(
        work_rx,
        team_repo,
        event_repo,
        coordinator,
        config.clone(),
    ));

    let (sweep_tx, mut sweep_rx) = mpsc::channel::<()>(1);
    tokio::spawn(sweep_scheduler(config.clone(), sweep_tx));

    let mut stats_tick =
        tokio::time::interval(Duration::from_secs(config.stats_log_interval_secs.max(1)));
    stats_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut enablement_open = true;
    let mut sweeps_open = true;
    loop {
        tokio::select! {
            tick = sweep_rx.recv(), if sweeps_open => {
                match tick {
                    Some(()) => enqueue(&work_tx, WorkItem::Sweep),
                    None => {
                        debug!("sweep scheduler stopped");
                        sweeps_open = false;
                    }
                }
            }
            event = enablement_rx.recv(), if enablement_open => {
                match event {
                    Some(team_id) => {
                        info!(team_id = %team_id, "enablement event received");
                        enqueue(&work_tx, WorkItem::Tenant {
                            team_id,
                            source: TriggerSource::Enablement,
                        });
                    }
                    None => {
                        debug!("enablement event source closed");
                        enablement_open = false;
                    }
                }
            }
            _ = stats_tick.tick() => {
                signals.log_stats();
            }
            _ = &mut shutdown_rx => {
                debug!("orchestrator shutting down");
                break;
            }
        }
    }

    drop(work_tx);
    let _ = dispatcher.await;
}

/// Non-blocking handoff from the trigger loop to the dispatcher.
fn enqueue(work_tx: &mpsc::Sender<WorkItem>, item: WorkItem) {
    if let Err(e) = work_tx.try_send(item) {
        warn!(error = %e, "dispatch queue full, trigger dropped");
    }
}

/// Sends a message on `tx` at each sweep time (cron or fixed interval).
/// Uses local time for cron.
async fn sweep_scheduler(config: OrchestratorConfig, tx: mpsc::Sender<()>) {
    if let Some(ref cron_str) = config.sweep_schedule {
        let Ok(schedule) = cron::Schedule::from_str(cron_str) else {
            warn!(cron = %cron_str, "invalid sweep_schedule; periodic sweeps will not run");
            return;
        };
        loop {
            let now = chrono::Local::now();
            let next = schedule.after(&now).next();
            if let Some(next) = next {
                let delay = (next - now).to_std().unwrap_or(Duration::from_secs(1));
                tokio::time::sleep(delay).await;
                if tx.send(()).await.is_err() {
                    break;
                }
            } else {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
        }
    } else {
        let mut interval =
            tokio::time::interval(Duration::from_secs(config.sweep_interval_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if tx.send(()).await.is_err() {
                break;
            }
        }
    }
}

async fn dispatch_loop(
    mut work_rx: mpsc::Receiver<WorkItem>,
    team_repo: Arc<TeamRepo>,
    event_repo: Arc<EventRepo>,
    coordinator: Arc<BackfillCoordinator>,
    config: OrchestratorConfig,
) {
    while let Some(item) = work_rx.recv().await {
        match item {
            WorkItem::Sweep => {
                if let Err(e) =
                    run_sweep_once(&team_repo, &event_repo, &coordinator, &config).await
                {
                    warn!(error = %e, "periodic sweep failed");
                }
            }
            WorkItem::Tenant { team_id, source } => {
                let lookback = match team_repo.get_team(team_id).await {
                    Ok(Some(team)) => team
                        .lookback_days
                        .unwrap_or(config.default_lookback_days),
                    Ok(None) => {
                        warn!(team_id = %team_id, "trigger for unknown team ignored");
                        continue;
                    }
                    Err(e) => {
                        warn!(team_id = %team_id, error = %e, "team lookup failed, trigger dropped");
                        continue;
                    }
                };
                coordinator.admit(team_id, lookback, source).await;
            }
        }
    }
    debug!("dispatcher shutting down");
}

/// One periodic pass: resolve the eligible tenant set and fan out
/// admission. Used by the dispatch loop, by the startup backfill, and by
/// tests. Returns the number of admitted jobs.
pub async fn run_sweep_once(
    team_repo: &Arc<TeamRepo>,
    event_repo: &Arc<EventRepo>,
    coordinator: &Arc<BackfillCoordinator>,
    config: &OrchestratorConfig,
) -> anyhow::Result<usize> {
    let teams = team_repo.list_teams().await?;

    let now_ms = epoch_ms_now();
    let window_start = floor_to_bucket(now_ms, Granularity::Day)
        - (config.heuristic_window_days as i64) * MS_PER_DAY;
    let activity = event_repo
        .daily_pageview_counts(window_start, now_ms, MS_PER_DAY)
        .await?;

    let eligible = selector::select_eligible(&teams, &activity, &config.selector);

    let lookbacks: HashMap<TeamId, u32> = teams
        .iter()
        .map(|t| {
            (
                t.team_id,
                t.lookback_days.unwrap_or(config.default_lookback_days),
            )
        })
        .collect();

    let admitted = join_all(eligible.iter().map(|&team_id| {
        let lookback = lookbacks
            .get(&team_id)
            .copied()
            .unwrap_or(config.default_lookback_days);
        coordinator.admit(team_id, lookback, TriggerSource::Periodic)
    }))
    .await
    .into_iter()
    .filter(|admitted| *admitted)
    .count();

    info!(
        eligible = eligible.len(),
        admitted, "periodic sweep pass"
    );
    Ok(admitted)
}

/// Polls the tenant configuration store and emits an enablement event when
/// a team's flag transitions to enabled. This is the engine-side consumer
/// of the config store's change notifications.
pub fn spawn_enablement_watcher(
    team_repo: Arc<TeamRepo>,
    tx: mpsc::Sender<TeamId>,
    poll_interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut previous: Option<std::collections::BTreeSet<TeamId>> = None;
        let mut interval =
            tokio::time::interval(Duration::from_secs(poll_interval_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            let teams = match team_repo.list_teams().await {
                Ok(t) => t,
                Err(e) => {
                    warn!(error = %e, "enablement watcher poll failed");
                    continue;
                }
            };
            let enabled: std::collections::BTreeSet<TeamId> = teams
                .iter()
                .filter(|t| t.preagg_enabled == Some(true))
                .map(|t| t.team_id)
                .collect();

            if let Some(ref prev) = previous {
                for &team_id in enabled.difference(prev) {
                    if tx.send(team_id).await.is_err() {
                        return;
                    }
                }
            }
            previous = Some(enabled);
        }
    })
}
