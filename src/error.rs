// Engine error taxonomy. Callers must be able to tell "detector ran and
// found nothing" from "detector could not run", and a generation failure
// (live tables untouched, replay freely) from a swap failure (re-detect
// before retrying).

use crate::models::TeamId;

#[derive(Debug, thiserror::Error)]
pub enum BackfillError {
    /// Aggregate store unreachable during a gap check. Never interpreted
    /// as zero gaps; the next trigger retries.
    #[error("gap detection unavailable for team {team_id}: {source}")]
    DetectionUnavailable {
        team_id: TeamId,
        #[source]
        source: sqlx::Error,
    },

    /// Staging write or source read failed. Live tables untouched, so a
    /// retry may replay the same partition list safely.
    #[error("generation failed for team {team_id}: {reason}")]
    GenerationFailure { team_id: TeamId, reason: String },

    /// The publish step failed partway. Each partition swap is atomic but
    /// the job as a whole is not; `published` partitions are already live.
    #[error("swap failed for team {team_id} after publishing {published} partition(s): {reason}")]
    SwapFailure {
        team_id: TeamId,
        published: usize,
        reason: String,
    },

    /// All attempts consumed. Terminal until cooldown elapses or an
    /// enablement trigger overrides.
    #[error("backfill for team {team_id} abandoned after {attempts} attempt(s)")]
    RetryExhausted { team_id: TeamId, attempts: u32 },
}

impl BackfillError {
    /// True for failures where the live tables were provably untouched.
    pub fn is_safely_retryable(&self) -> bool {
        matches!(
            self,
            BackfillError::GenerationFailure { .. } | BackfillError::DetectionUnavailable { .. }
        )
    }
}
