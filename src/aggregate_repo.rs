// Aggregate tables + staging + swap. Two co-located tables per team
// (overview scalars, pathname breakdown); a partition is consistent only
// when both tables carry it. Staging rows are keyed by job id and are
// never read by the serving layer. The swap publishes one partition per
// transaction, so a crash leaves each partition fully old or fully new.

use std::collections::{BTreeMap, BTreeSet};

use sqlx::Row;
use sqlx::sqlite::SqlitePool;
use tracing::instrument;

use crate::event_repo::{OverviewRow, PathnameRow};
use crate::models::{Granularity, PartitionKey, TeamId};

pub struct AggregateRepo {
    pool: SqlitePool,
}

impl AggregateRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agg_overview_daily (
                team_id INTEGER NOT NULL,
                bucket_start INTEGER NOT NULL,
                granularity_secs INTEGER NOT NULL,
                pageviews INTEGER NOT NULL,
                visitors INTEGER NOT NULL,
                sessions INTEGER NOT NULL,
                PRIMARY KEY (team_id, bucket_start, granularity_secs)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS agg_pathname_daily (
                team_id INTEGER NOT NULL,
                bucket_start INTEGER NOT NULL,
                granularity_secs INTEGER NOT NULL,
                pathname TEXT NOT NULL,
                pageviews INTEGER NOT NULL,
                visitors INTEGER NOT NULL,
                PRIMARY KEY (team_id, bucket_start, granularity_secs, pathname)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS staging_overview (
                job_id TEXT NOT NULL,
                team_id INTEGER NOT NULL,
                bucket_start INTEGER NOT NULL,
                granularity_secs INTEGER NOT NULL,
                pageviews INTEGER NOT NULL,
                visitors INTEGER NOT NULL,
                sessions INTEGER NOT NULL,
                PRIMARY KEY (job_id, team_id, bucket_start, granularity_secs)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS staging_pathname (
                job_id TEXT NOT NULL,
                team_id INTEGER NOT NULL,
                bucket_start INTEGER NOT NULL,
                granularity_secs INTEGER NOT NULL,
                pathname TEXT NOT NULL,
                pageviews INTEGER NOT NULL,
                visitors INTEGER NOT NULL,
                PRIMARY KEY (job_id, team_id, bucket_start, granularity_secs, pathname)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Materialized bucket starts per table for one team inside
    /// [window_start, window_end). One reconciliation query per table;
    /// round trips stay O(1) in the partition count. Overview buckets come
    /// with their pageview count so the detector can accept a zero-traffic
    /// partition that legitimately has no breakdown rows. Returns sqlx
    /// errors unwrapped so the detector can classify them as
    /// unavailability.
    #[instrument(skip(self), fields(repo = "aggregate", operation = "present_partitions"))]
    pub async fn present_partitions(
        &self,
        team_id: TeamId,
        window_start: i64,
        window_end: i64,
        granularity: Granularity,
    ) -> Result<(BTreeMap<i64, i64>, BTreeSet<i64>), sqlx::Error> {
        let rows = sqlx::query(
            "SELECT bucket_start, pageviews FROM agg_overview_daily
             WHERE team_id = $1 AND bucket_start >= $2 AND bucket_start < $3
               AND granularity_secs = $4",
        )
        .bind(team_id.0)
        .bind(window_start)
        .bind(window_end)
        .bind(granularity.secs())
        .fetch_all(&self.pool)
        .await?;

        let mut overview = BTreeMap::new();
        for row in rows {
            overview.insert(
                row.try_get::<i64, _>("bucket_start")?,
                row.try_get::<i64, _>("pageviews")?,
            );
        }

        let rows = sqlx::query(
            "SELECT DISTINCT bucket_start FROM agg_pathname_daily
             WHERE team_id = $1 AND bucket_start >= $2 AND bucket_start < $3
               AND granularity_secs = $4",
        )
        .bind(team_id.0)
        .bind(window_start)
        .bind(window_end)
        .bind(granularity.secs())
        .fetch_all(&self.pool)
        .await?;

        let mut pathname = BTreeSet::new();
        for row in rows {
            pathname.insert(row.try_get::<i64, _>("bucket_start")?);
        }

        Ok((overview, pathname))
    }

    /// Stage the overview row for one partition. Live tables untouched.
    #[instrument(skip(self, row), fields(repo = "aggregate", operation = "stage_overview"))]
    pub async fn stage_overview(
        &self,
        job_id: &str,
        key: &PartitionKey,
        row: &OverviewRow,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO staging_overview
             (job_id, team_id, bucket_start, granularity_secs, pageviews, visitors, sessions)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(job_id)
        .bind(key.team_id.0)
        .bind(key.bucket_start)
        .bind(key.granularity.secs())
        .bind(row.pageviews)
        .bind(row.visitors)
        .bind(row.sessions)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Stage the pathname breakdown for one partition in one transaction.
    #[instrument(skip(self, rows), fields(repo = "aggregate", operation = "stage_pathnames", rows_count = rows.len()))]
    pub async fn stage_pathnames(
        &self,
        job_id: &str,
        key: &PartitionKey,
        rows: &[PathnameRow],
    ) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        for r in rows {
            sqlx::query(
                "INSERT OR REPLACE INTO staging_pathname
                 (job_id, team_id, bucket_start, granularity_secs, pathname, pageviews, visitors)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)",
            )
            .bind(job_id)
            .bind(key.team_id.0)
            .bind(key.bucket_start)
            .bind(key.granularity.secs())
            .bind(&r.pathname)
            .bind(r.pageviews)
            .bind(r.visitors)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Atomically publish one partition: replace any live rows for the key
    /// in both tables with the staged rows, in a single transaction.
    #[instrument(skip(self), fields(repo = "aggregate", operation = "swap_partition"))]
    pub async fn swap_partition(&self, job_id: &str, key: &PartitionKey) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM agg_overview_daily
             WHERE team_id = $1 AND bucket_start = $2 AND granularity_secs = $3",
        )
        .bind(key.team_id.0)
        .bind(key.bucket_start)
        .bind(key.granularity.secs())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "DELETE FROM agg_pathname_daily
             WHERE team_id = $1 AND bucket_start = $2 AND granularity_secs = $3",
        )
        .bind(key.team_id.0)
        .bind(key.bucket_start)
        .bind(key.granularity.secs())
        .execute(&mut *tx)
        .await?;

        let inserted = sqlx::query(
            "INSERT INTO agg_overview_daily
             (team_id, bucket_start, granularity_secs, pageviews, visitors, sessions)
             SELECT team_id, bucket_start, granularity_secs, pageviews, visitors, sessions
             FROM staging_overview
             WHERE job_id = $1 AND team_id = $2 AND bucket_start = $3 AND granularity_secs = $4",
        )
        .bind(job_id)
        .bind(key.team_id.0)
        .bind(key.bucket_start)
        .bind(key.granularity.secs())
        .execute(&mut *tx)
        .await?;

        // A swap without a staged overview row would publish a partition
        // detection can never see as consistent; fail it instead.
        anyhow::ensure!(
            inserted.rows_affected() == 1,
            "no staged overview row for {} (job {})",
            key,
            job_id
        );

        sqlx::query(
            "INSERT INTO agg_pathname_daily
             (team_id, bucket_start, granularity_secs, pathname, pageviews, visitors)
             SELECT team_id, bucket_start, granularity_secs, pathname, pageviews, visitors
             FROM staging_pathname
             WHERE job_id = $1 AND team_id = $2 AND bucket_start = $3 AND granularity_secs = $4",
        )
        .bind(job_id)
        .bind(key.team_id.0)
        .bind(key.bucket_start)
        .bind(key.granularity.secs())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Delete all staging rows owned by a job. Runs on success and on
    /// failure; staging is never reused across jobs.
    #[instrument(skip(self), fields(repo = "aggregate", operation = "cleanup_staging"))]
    pub async fn cleanup_staging(&self, job_id: &str) -> anyhow::Result<u64> {
        let mut deleted = 0u64;
        let r = sqlx::query("DELETE FROM staging_overview WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        deleted += r.rows_affected();
        let r = sqlx::query("DELETE FROM staging_pathname WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        deleted += r.rows_affected();
        Ok(deleted)
    }

    /// Overview row for one live partition (test and inspection helper).
    pub async fn get_overview(
        &self,
        key: &PartitionKey,
    ) -> anyhow::Result<Option<OverviewRow>> {
        let row = sqlx::query(
            "SELECT pageviews, visitors, sessions FROM agg_overview_daily
             WHERE team_id = $1 AND bucket_start = $2 AND granularity_secs = $3",
        )
        .bind(key.team_id.0)
        .bind(key.bucket_start)
        .bind(key.granularity.secs())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(OverviewRow {
                pageviews: row.try_get("pageviews")?,
                visitors: row.try_get("visitors")?,
                sessions: row.try_get("sessions")?,
            })
        })
        .transpose()
    }

    /// Pathname rows for one live partition, ordered by pathname.
    pub async fn get_pathnames(&self, key: &PartitionKey) -> anyhow::Result<Vec<PathnameRow>> {
        let rows = sqlx::query(
            "SELECT pathname, pageviews, visitors FROM agg_pathname_daily
             WHERE team_id = $1 AND bucket_start = $2 AND granularity_secs = $3
             ORDER BY pathname ASC",
        )
        .bind(key.team_id.0)
        .bind(key.bucket_start)
        .bind(key.granularity.secs())
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
