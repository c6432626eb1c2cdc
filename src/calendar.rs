// Partition calendar: the buckets that should exist for a window.
// Pure epoch-ms arithmetic; no store access.

use crate::models::{Granularity, PartitionKey, TeamId};

/// Epoch milliseconds now. Clock errors fall back to 0 and are logged by
/// callers when it matters; partitions are never derived from a 0 clock.
pub fn epoch_ms_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Floor `ts` to the start of its bucket.
pub fn floor_to_bucket(ts: i64, granularity: Granularity) -> i64 {
    let width = granularity.bucket_ms();
    (ts / width) * width
}

/// All complete buckets inside the lookback window ending at `now_ms`:
/// bucket_start >= floor(now) - lookback and bucket_end <= now. Ascending,
/// contiguous, no duplicates. The in-flight current bucket is excluded, so
/// a 7-day lookback at daily granularity yields exactly 7 keys.
pub fn expected_partitions(
    team_id: TeamId,
    now_ms: i64,
    lookback_days: u32,
    granularity: Granularity,
) -> Vec<PartitionKey> {
    if now_ms <= 0 || lookback_days == 0 {
        return Vec::new();
    }
    let width = granularity.bucket_ms();
    let window_start = floor_to_bucket(now_ms, granularity)
        - (lookback_days as i64) * crate::models::MS_PER_DAY;

    let mut out = Vec::new();
    let mut bucket_start = window_start.max(0);
    while bucket_start + width <= now_ms {
        out.push(PartitionKey::new(team_id, bucket_start, granularity));
        bucket_start += width;
    }
    out
}
