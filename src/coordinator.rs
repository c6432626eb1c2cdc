// Per-tenant admission control and job lifecycle. Admission takes the
// tenant lease (non-blocking); the job task runs on a bounded pool,
// parallel across tenants, at most one in flight per tenant. Every
// attempt starts from a fresh gap-detection pass, so a retry after a
// partial swap re-derives the missing set from live truth instead of
// replaying a stale plan. Exhausted tenants enter a TTL'd degraded
// cooldown that periodic triggers respect and enablement triggers
// override.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::calendar::epoch_ms_now;
use crate::detector::GapDetector;
use crate::error::BackfillError;
use crate::executor::BackfillExecutor;
use crate::lease_repo::LeaseRepo;
use crate::models::{BackfillJob, Granularity, TeamId, TriggerSource};
use crate::signals::Signals;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub max_attempts: u32,
    pub retry_backoff_base: Duration,
    pub lease_ttl: Duration,
    pub degraded_cooldown: Duration,
    pub job_deadline: Duration,
    pub max_concurrent_jobs: usize,
    pub granularity: Granularity,
}

pub struct BackfillCoordinator {
    detector: Arc<GapDetector>,
    executor: Arc<BackfillExecutor>,
    lease_repo: Arc<LeaseRepo>,
    signals: Arc<Signals>,
    config: CoordinatorConfig,
    /// Lease holder identity for this worker process.
    holder: String,
    /// team -> cooldown expiry. In-process cache; the lease is the
    /// crash-safe piece.
    degraded: Mutex<HashMap<TeamId, Instant>>,
    pool: Arc<Semaphore>,
}

impl BackfillCoordinator {
    pub fn new(
        detector: Arc<GapDetector>,
        executor: Arc<BackfillExecutor>,
        lease_repo: Arc<LeaseRepo>,
        signals: Arc<Signals>,
        config: CoordinatorConfig,
    ) -> Self {
        let holder = format!("preagg-{}-{}", std::process::id(), epoch_ms_now());
        let pool = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
        Self {
            detector,
            executor,
            lease_repo,
            signals,
            config,
            holder,
            degraded: Mutex::new(HashMap::new()),
            pool,
        }
    }

    /// Try to start a backfill job for a tenant. Returns false when one is
    /// already in flight, the tenant is in degraded cooldown (periodic
    /// triggers only), or the lease store is unreachable.
    pub async fn admit(
        self: &Arc<Self>,
        team_id: TeamId,
        lookback_days: u32,
        source: TriggerSource,
    ) -> bool {
        {
            let mut degraded = self.degraded.lock().await;
            let now = Instant::now();
            degraded.retain(|_, expiry| *expiry > now);
            if degraded.contains_key(&team_id) {
                if source == TriggerSource::Enablement {
                    degraded.remove(&team_id);
                    info!(team_id = %team_id, "degraded cooldown overridden by enablement trigger");
                } else {
                    debug!(team_id = %team_id, "tenant in degraded cooldown, trigger suppressed");
                    self.signals.set_degraded_gauge(degraded.len());
                    return false;
                }
            }
            self.signals.set_degraded_gauge(degraded.len());
        }

        let ttl_ms = self.config.lease_ttl.as_millis() as i64;
        match self
            .lease_repo
            .try_acquire(team_id, &self.holder, ttl_ms)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(team_id = %team_id, "backfill already in flight, trigger is a no-op");
                return false;
            }
            Err(e) => {
                warn!(team_id = %team_id, error = %e, "lease acquisition failed");
                return false;
            }
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let permit = this.pool.clone().acquire_owned().await;
            if permit.is_ok() {
                this.run_job(team_id, lookback_days, source).await;
            }
            if let Err(e) = this.lease_repo.release(team_id, &this.holder).await {
                warn!(team_id = %team_id, error = %e, "lease release failed, will expire by TTL");
            }
        });
        true
    }

    /// Number of tenants currently parked in degraded cooldown.
    pub async fn degraded_count(&self) -> usize {
        let mut degraded = self.degraded.lock().await;
        let now = Instant::now();
        degraded.retain(|_, expiry| *expiry > now);
        degraded.len()
    }

    async fn run_job(&self, team_id: TeamId, lookback_days: u32, source: TriggerSource) {
        let mut attempt = 1u32;
        loop {
            // Long jobs outlive the initial TTL; extend while working.
            let ttl_ms = self.config.lease_ttl.as_millis() as i64;
            if let Err(e) = self.lease_repo.renew(team_id, &self.holder, ttl_ms).await {
                warn!(team_id = %team_id, error = %e, "lease renewal failed");
            }

            let now_ms = epoch_ms_now();
            let error = match self
                .detector
                .detect_gaps(team_id, now_ms, lookback_days, self.config.granularity)
                .await
            {
                Ok(report) if report.is_clean() => {
                    if attempt > 1 || report.suppressed > 0 {
                        info!(
                            team_id = %team_id,
                            attempt,
                            suppressed = report.suppressed,
                            "gap report clean, backfill drained"
                        );
                    } else {
                        debug!(team_id = %team_id, "no gaps detected");
                    }
                    return;
                }
                Ok(report) => {
                    let job = BackfillJob::new(
                        team_id,
                        report.missing,
                        attempt,
                        self.config.job_deadline,
                        now_ms,
                    );
                    self.signals.job_started(
                        team_id,
                        &job.id,
                        attempt,
                        job.partitions.len(),
                        source,
                    );
                    match self.executor.execute(&job).await {
                        Ok(outcome) => {
                            self.signals
                                .job_succeeded(team_id, &job.id, attempt, outcome.published);
                            info!(
                                team_id = %team_id,
                                attempt,
                                published = outcome.published,
                                "backfill succeeded"
                            );
                            return;
                        }
                        Err(e) => {
                            self.signals.job_failed(team_id, &job.id, attempt, &e.to_string());
                            e
                        }
                    }
                }
                Err(e) => e,
            };

            warn!(
                team_id = %team_id,
                attempt,
                max_attempts = self.config.max_attempts,
                safely_retryable = error.is_safely_retryable(),
                error = %error,
                "backfill attempt failed"
            );

            if attempt >= self.config.max_attempts {
                self.mark_degraded(team_id, attempt).await;
                return;
            }

            let backoff = self.config.retry_backoff_base * 2u32.pow(attempt - 1);
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }

    async fn mark_degraded(&self, team_id: TeamId, attempts: u32) {
        let cooldown = self.config.degraded_cooldown;
        let count = {
            let mut degraded = self.degraded.lock().await;
            degraded.insert(team_id, Instant::now() + cooldown);
            degraded.len()
        };
        self.signals.set_degraded_gauge(count);
        self.signals
            .tenant_degraded(team_id, attempts, cooldown.as_secs());
        let error = BackfillError::RetryExhausted { team_id, attempts };
        warn!(
            team_id = %team_id,
            cooldown_secs = cooldown.as_secs(),
            "{error}; automatic retries suppressed until cooldown or enablement"
        );
    }
}
