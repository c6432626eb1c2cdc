// Backfill execution: regenerate missing partitions into staging, then
// publish them with per-partition atomic swaps.
//
// Generating reads the source log and writes staging only; a failure there
// leaves the live tables untouched. Swapping publishes partitions in
// ascending order, one transaction each; a failure reports how many were
// already live so the caller knows a re-detection is required before any
// retry. Staging is discarded on every exit path.

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::aggregate_repo::AggregateRepo;
use crate::error::BackfillError;
use crate::event_repo::EventRepo;
use crate::models::{BackfillJob, JobOutcome, JobState, TeamId};

pub struct BackfillExecutor {
    event_repo: Arc<EventRepo>,
    aggregate_repo: Arc<AggregateRepo>,
}

impl BackfillExecutor {
    pub fn new(event_repo: Arc<EventRepo>, aggregate_repo: Arc<AggregateRepo>) -> Self {
        Self {
            event_repo,
            aggregate_repo,
        }
    }

    /// Drive one job through generating -> swapping -> cleanup. The
    /// regeneration scope is exactly `job.partitions`, never the whole
    /// lookback window.
    pub async fn execute(&self, job: &BackfillJob) -> Result<JobOutcome, BackfillError> {
        let team_id = job.team_id;
        let started = Instant::now();

        debug!(
            team_id = %team_id,
            job_id = %job.id,
            partitions = job.partitions.len(),
            state = %JobState::Generating,
            "job state"
        );

        match tokio::time::timeout(job.deadline, self.generate(job)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.discard_staging(&job.id, team_id).await;
                return Err(BackfillError::GenerationFailure {
                    team_id,
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                self.discard_staging(&job.id, team_id).await;
                return Err(BackfillError::GenerationFailure {
                    team_id,
                    reason: format!("deadline of {:?} exceeded during generation", job.deadline),
                });
            }
        }

        debug!(team_id = %team_id, job_id = %job.id, state = %JobState::Swapping, "job state");

        let mut published = 0usize;
        for key in &job.partitions {
            let remaining = job.deadline.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                self.discard_staging(&job.id, team_id).await;
                return Err(BackfillError::SwapFailure {
                    team_id,
                    published,
                    reason: format!("deadline of {:?} exceeded during swap", job.deadline),
                });
            }
            match tokio::time::timeout(remaining, self.aggregate_repo.swap_partition(&job.id, key))
                .await
            {
                Ok(Ok(())) => published += 1,
                Ok(Err(e)) => {
                    self.discard_staging(&job.id, team_id).await;
                    return Err(BackfillError::SwapFailure {
                        team_id,
                        published,
                        reason: e.to_string(),
                    });
                }
                Err(_) => {
                    self.discard_staging(&job.id, team_id).await;
                    return Err(BackfillError::SwapFailure {
                        team_id,
                        published,
                        reason: format!("deadline of {:?} exceeded during swap", job.deadline),
                    });
                }
            }
        }

        debug!(team_id = %team_id, job_id = %job.id, state = %JobState::Cleanup, "job state");
        self.discard_staging(&job.id, team_id).await;

        debug!(
            team_id = %team_id,
            job_id = %job.id,
            published,
            state = %JobState::Done,
            "job state"
        );
        Ok(JobOutcome { published })
    }

    /// Generating phase: one overview aggregate + one pathname breakdown
    /// per missing partition, written to staging.
    async fn generate(&self, job: &BackfillJob) -> anyhow::Result<()> {
        for key in &job.partitions {
            let overview = self.event_repo.aggregate_overview(key).await?;
            self.aggregate_repo
                .stage_overview(&job.id, key, &overview)
                .await?;

            let pathnames = self.event_repo.aggregate_pathnames(key).await?;
            if !pathnames.is_empty() {
                self.aggregate_repo
                    .stage_pathnames(&job.id, key, &pathnames)
                    .await?;
            }
        }
        Ok(())
    }

    /// Staging rows are job-owned; already-published partitions are
    /// unaffected by this delete. A failed delete only strands invisible
    /// rows, so it is logged rather than escalated.
    async fn discard_staging(&self, job_id: &str, team_id: TeamId) {
        if let Err(e) = self.aggregate_repo.cleanup_staging(job_id).await {
            warn!(team_id = %team_id, job_id = %job_id, error = %e, "staging cleanup failed");
        }
    }
}
