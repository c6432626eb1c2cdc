// Backfill job: the unit of work handed from coordinator to executor.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{PartitionKey, TeamId};

/// What caused a trigger: the periodic sweep or a team flipping its
/// pre-aggregation flag on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerSource {
    Periodic,
    Enablement,
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerSource::Periodic => write!(f, "periodic"),
            TriggerSource::Enablement => write!(f, "enablement"),
        }
    }
}

/// Execution state of a backfill job. Generating touches only staging;
/// swapping is the only phase that mutates the live tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Generating,
    Swapping,
    Cleanup,
    Done,
    Failed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Generating => "generating",
            JobState::Swapping => "swapping",
            JobState::Cleanup => "cleanup",
            JobState::Done => "done",
            JobState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// One admitted backfill attempt. Discarded on terminal success; a fresh
/// job (with a fresh partition list from re-detection) is built per attempt.
#[derive(Debug, Clone)]
pub struct BackfillJob {
    /// Staging ownership key; unique per in-flight job.
    pub id: String,
    pub team_id: TeamId,
    /// Missing partitions to regenerate, ascending by bucket_start.
    pub partitions: Vec<PartitionKey>,
    /// 1-based attempt counter.
    pub attempt: u32,
    /// Wall-clock budget for the whole job.
    pub deadline: Duration,
}

impl BackfillJob {
    pub fn new(
        team_id: TeamId,
        partitions: Vec<PartitionKey>,
        attempt: u32,
        deadline: Duration,
        now_ms: i64,
    ) -> Self {
        Self {
            id: format!("job-{}-{}-{}", team_id, now_ms, attempt),
            team_id,
            partitions,
            attempt,
            deadline,
        }
    }
}

/// Terminal result of a successful job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobOutcome {
    /// Partitions published by the swap phase.
    pub published: usize,
}
