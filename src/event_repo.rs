// Source event log (read-only). Append-mostly pageview events; late
// arrivals land in recent partitions and are absorbed by re-backfill.
// Regeneration queries are always scoped to one partition's time range.

use sqlx::Row;
use sqlx::sqlite::SqlitePool;
use tracing::instrument;

use crate::models::{PartitionKey, TeamId};

/// Scalar aggregate for one partition of the overview table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverviewRow {
    pub pageviews: i64,
    pub visitors: i64,
    pub sessions: i64,
}

/// One pathname's aggregate within a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathnameRow {
    pub pathname: String,
    pub pageviews: i64,
    pub visitors: i64,
}

/// Per-team daily pageview count, input to the heuristic selector ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyCount {
    pub team_id: TeamId,
    pub bucket_start: i64,
    pub pageviews: i64,
}

pub struct EventRepo {
    pool: SqlitePool,
}

impl EventRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates the events table if the deployment does not provide one.
    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                team_id INTEGER NOT NULL,
                occurred_at INTEGER NOT NULL,
                visitor_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                pathname TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_events_team_occurred ON events(team_id, occurred_at)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Daily pageview counts per team in [from_ts, to_ts), one grouped
    /// query. Feeds the trailing-window median ranking.
    #[instrument(skip(self), fields(repo = "event", operation = "daily_pageview_counts"))]
    pub async fn daily_pageview_counts(
        &self,
        from_ts: i64,
        to_ts: i64,
        day_ms: i64,
    ) -> anyhow::Result<Vec<DailyCount>> {
        let rows = sqlx::query(
            "SELECT team_id, (occurred_at / $3) * $3 AS bucket_start, COUNT(*) AS pageviews
             FROM events WHERE occurred_at >= $1 AND occurred_at < $2
             GROUP BY team_id, bucket_start
             ORDER BY team_id ASC, bucket_start ASC",
        )
        .bind(from_ts)
        .bind(to_ts)
        .bind(day_ms)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(DailyCount {
                team_id: TeamId(row.try_get("team_id")?),
                bucket_start: row.try_get("bucket_start")?,
                pageviews: row.try_get("pageviews")?,
            });
        }
        Ok(out)
    }

    /// Overview aggregate for exactly one partition. An empty bucket
    /// yields a zero row; the partition is still published so detection
    /// sees it as present.
    #[instrument(skip(self), fields(repo = "event", operation = "aggregate_overview"))]
    pub async fn aggregate_overview(&self, key: &PartitionKey) -> anyhow::Result<OverviewRow> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS pageviews,
                    COUNT(DISTINCT visitor_id) AS visitors,
                    COUNT(DISTINCT session_id) AS sessions
             FROM events
             WHERE team_id = $1 AND occurred_at >= $2 AND occurred_at < $3",
        )
        .bind(key.team_id.0)
        .bind(key.bucket_start)
        .bind(key.bucket_end())
        .fetch_one(&self.pool)
        .await?;

        Ok(OverviewRow {
            pageviews: row.try_get("pageviews")?,
            visitors: row.try_get("visitors")?,
            sessions: row.try_get("sessions")?,
        })
    }

    /// Per-pathname aggregates for exactly one partition, ordered by
    /// pathname for stable staging writes.
    #[instrument(skip(self), fields(repo = "event", operation = "aggregate_pathnames"))]
    pub async fn aggregate_pathnames(
        &self,
        key: &PartitionKey,
    ) -> anyhow::Result<Vec<PathnameRow>> {
        let rows = sqlx::query(
            "SELECT pathname, COUNT(*) AS pageviews, COUNT(DISTINCT visitor_id) AS visitors
             FROM events
             WHERE team_id = $1 AND occurred_at >= $2 AND occurred_at < $3
             GROUP BY pathname
             ORDER BY pathname ASC",
        )
        .bind(key.team_id.0)
        .bind(key.bucket_start)
        .bind(key.bucket_end())
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(PathnameRow {
                pathname: row.try_get("pathname")?,
                pageviews: row.try_get("pageviews")?,
                visitors: row.try_get("visitors")?,
            });
        }
        Ok(out)
    }
}
