// One-time backfill: run one sweep pass at startup so coverage is current
// before the periodic loop takes over.

use std::sync::Arc;

use tracing::info;

use crate::coordinator::BackfillCoordinator;
use crate::event_repo::EventRepo;
use crate::orchestrator::{OrchestratorConfig, run_sweep_once};
use crate::team_repo::TeamRepo;

/// Runs one sweep pass over all currently-eligible teams.
pub async fn run_backfill(
    team_repo: Arc<TeamRepo>,
    event_repo: Arc<EventRepo>,
    coordinator: Arc<BackfillCoordinator>,
    config: &OrchestratorConfig,
) -> anyhow::Result<()> {
    let admitted = run_sweep_once(&team_repo, &event_repo, &coordinator, config).await?;
    info!(admitted, "startup backfill sweep complete");
    Ok(())
}
