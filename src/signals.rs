// Observability signal points. Events go out as single-line JSON payloads
// under the `preagg::signals` target so an external collector can consume
// them from the log stream; counters and the degraded-tenant gauge are
// reported on the orchestrator's stats tick. Emission is best-effort and
// never affects control flow.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;
use tracing::{info, warn};

use crate::models::{TeamId, TriggerSource};

const TARGET: &str = "preagg::signals";

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum SignalEvent<'a> {
    JobStarted {
        team_id: TeamId,
        job_id: &'a str,
        attempt: u32,
        partitions: usize,
        source: TriggerSource,
    },
    JobSucceeded {
        team_id: TeamId,
        job_id: &'a str,
        attempt: u32,
        published: usize,
    },
    JobFailed {
        team_id: TeamId,
        job_id: &'a str,
        attempt: u32,
        error: &'a str,
    },
    TenantDegraded {
        team_id: TeamId,
        attempts: u32,
        cooldown_secs: u64,
    },
}

fn emit(event: &SignalEvent<'_>) {
    match serde_json::to_string(event) {
        Ok(payload) => info!(target: TARGET, payload = %payload, "signal"),
        Err(e) => warn!(target: TARGET, error = %e, "signal serialization failed"),
    }
}

/// Shared signal sink: counters plus the currently-degraded gauge.
#[derive(Debug, Default)]
pub struct Signals {
    jobs_started: AtomicU64,
    jobs_succeeded: AtomicU64,
    jobs_failed: AtomicU64,
    degraded_teams: AtomicUsize,
}

impl Signals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_started(
        &self,
        team_id: TeamId,
        job_id: &str,
        attempt: u32,
        partitions: usize,
        source: TriggerSource,
    ) {
        self.jobs_started.fetch_add(1, Ordering::Relaxed);
        emit(&SignalEvent::JobStarted {
            team_id,
            job_id,
            attempt,
            partitions,
            source,
        });
    }

    pub fn job_succeeded(&self, team_id: TeamId, job_id: &str, attempt: u32, published: usize) {
        self.jobs_succeeded.fetch_add(1, Ordering::Relaxed);
        emit(&SignalEvent::JobSucceeded {
            team_id,
            job_id,
            attempt,
            published,
        });
    }

    pub fn job_failed(&self, team_id: TeamId, job_id: &str, attempt: u32, error: &str) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        emit(&SignalEvent::JobFailed {
            team_id,
            job_id,
            attempt,
            error,
        });
    }

    /// Persistent-error signal: retries exhausted, tenant parked until
    /// cooldown or enablement.
    pub fn tenant_degraded(&self, team_id: TeamId, attempts: u32, cooldown_secs: u64) {
        emit(&SignalEvent::TenantDegraded {
            team_id,
            attempts,
            cooldown_secs,
        });
    }

    pub fn set_degraded_gauge(&self, count: usize) {
        self.degraded_teams.store(count, Ordering::Relaxed);
    }

    pub fn degraded_gauge(&self) -> usize {
        self.degraded_teams.load(Ordering::Relaxed)
    }

    /// Periodic stats line (orchestrator stats tick).
    pub fn log_stats(&self) {
        info!(
            jobs_started_total = self.jobs_started.load(Ordering::Relaxed),
            jobs_succeeded_total = self.jobs_succeeded.load(Ordering::Relaxed),
            jobs_failed_total = self.jobs_failed.load(Ordering::Relaxed),
            degraded_teams = self.degraded_teams.load(Ordering::Relaxed),
            "engine stats"
        );
    }
}
