// Gap detection: reconcile the partition calendar against what is
// actually materialized. A partition counts as present only when both
// aggregate tables carry it; presence in one table alone is a gap. Store
// errors surface as DetectionUnavailable, never as "no gaps".

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::debug;

use crate::aggregate_repo::AggregateRepo;
use crate::calendar;
use crate::error::BackfillError;
use crate::models::{GapReport, Granularity, PartitionKey, TeamId};

pub struct GapDetector {
    aggregate_repo: Arc<AggregateRepo>,
    /// Gaps below this count are normal pipeline lag, not data loss.
    noise_threshold: usize,
}

impl GapDetector {
    pub fn new(aggregate_repo: Arc<AggregateRepo>, noise_threshold: usize) -> Self {
        Self {
            aggregate_repo,
            noise_threshold,
        }
    }

    /// One reconciliation pass for one team. Two metadata-level queries
    /// total, regardless of how many partitions the window spans.
    pub async fn detect_gaps(
        &self,
        team_id: TeamId,
        now_ms: i64,
        lookback_days: u32,
        granularity: Granularity,
    ) -> Result<GapReport, BackfillError> {
        let expected = calendar::expected_partitions(team_id, now_ms, lookback_days, granularity);

        let (window_start, window_end) = match (expected.first(), expected.last()) {
            (Some(first), Some(last)) => (first.bucket_start, last.bucket_end()),
            _ => {
                return Ok(GapReport {
                    team_id,
                    expected,
                    present: BTreeSet::new(),
                    missing: Vec::new(),
                    suppressed: 0,
                });
            }
        };

        let (overview, pathname) = self
            .aggregate_repo
            .present_partitions(team_id, window_start, window_end, granularity)
            .await
            .map_err(|source| BackfillError::DetectionUnavailable { team_id, source })?;

        // Consistent = present in both tables. A zero-traffic partition
        // has no breakdown rows to carry, so its overview row alone is
        // consistent.
        let present: BTreeSet<PartitionKey> = overview
            .iter()
            .filter(|&(bucket_start, pageviews)| {
                *pageviews == 0 || pathname.contains(bucket_start)
            })
            .map(|(&bucket_start, _)| PartitionKey::new(team_id, bucket_start, granularity))
            .collect();

        let mut missing: Vec<PartitionKey> = expected
            .iter()
            .filter(|key| !present.contains(key))
            .copied()
            .collect();

        let mut suppressed = 0;
        if !missing.is_empty() && missing.len() < self.noise_threshold {
            debug!(
                team_id = %team_id,
                gaps = missing.len(),
                threshold = self.noise_threshold,
                "gap count below noise threshold, suppressing"
            );
            suppressed = missing.len();
            missing.clear();
        }

        Ok(GapReport {
            team_id,
            expected,
            present,
            missing,
            suppressed,
        })
    }
}
