// Partition identity: one materialized unit of aggregate data.

use serde::{Deserialize, Serialize};

use super::TeamId;

pub const MS_PER_HOUR: i64 = 3_600_000;
pub const MS_PER_DAY: i64 = 86_400_000;

/// Bucket granularity of a partition. Daily is the production default;
/// hourly exists for dense short-window tenants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Hour,
    Day,
}

impl Granularity {
    /// Bucket width in milliseconds.
    pub fn bucket_ms(self) -> i64 {
        match self {
            Granularity::Hour => MS_PER_HOUR,
            Granularity::Day => MS_PER_DAY,
        }
    }

    /// Bucket width in seconds, as stored in the `granularity_secs` column.
    pub fn secs(self) -> i64 {
        self.bucket_ms() / 1000
    }
}

/// (team, bucket_start, granularity) triple identifying one materialized
/// partition. Immutable once published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub team_id: TeamId,
    /// Bucket start, epoch milliseconds UTC, aligned to the granularity.
    pub bucket_start: i64,
    pub granularity: Granularity,
}

impl PartitionKey {
    pub fn new(team_id: TeamId, bucket_start: i64, granularity: Granularity) -> Self {
        Self {
            team_id,
            bucket_start,
            granularity,
        }
    }

    /// Exclusive bucket end, epoch milliseconds.
    pub fn bucket_end(&self) -> i64 {
        self.bucket_start + self.granularity.bucket_ms()
    }
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "team {} bucket {} ({:?})",
            self.team_id, self.bucket_start, self.granularity
        )
    }
}
