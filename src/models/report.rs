// Gap report: expected vs. materialized partitions for one team.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{PartitionKey, TeamId};

/// Result of one gap-detection pass. `present` is a read-only probe of the
/// live tables; `missing` is always a subset of `expected`, in ascending
/// bucket order. When the raw gap count is below the noise threshold the
/// missing set is emptied and `suppressed` records how many were dropped
/// (normal pipeline lag, not a data-loss signal).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapReport {
    pub team_id: TeamId,
    pub expected: Vec<PartitionKey>,
    pub present: BTreeSet<PartitionKey>,
    pub missing: Vec<PartitionKey>,
    pub suppressed: usize,
}

impl GapReport {
    /// True when there is nothing to backfill (either genuinely complete
    /// or suppressed as noise).
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty()
    }
}
