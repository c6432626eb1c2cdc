// Tenant leases: at most one in-flight backfill per team, system-wide.
// Backed by a table rather than an in-memory mutex so a lease left behind
// by a crashed worker expires by TTL and is reclaimable. Acquisition is a
// single CAS-style upsert: the conflict branch only fires when the held
// lease has expired.

use sqlx::sqlite::SqlitePool;
use tracing::instrument;

use crate::calendar::epoch_ms_now;
use crate::models::TeamId;

pub struct LeaseRepo {
    pool: SqlitePool,
}

impl LeaseRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tenant_leases (
                team_id INTEGER PRIMARY KEY,
                holder TEXT NOT NULL,
                acquired_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Non-blocking try-acquire. Returns false when another holder has a
    /// live lease. Expired leases are taken over in the same statement.
    #[instrument(skip(self), fields(repo = "lease", operation = "try_acquire"))]
    pub async fn try_acquire(
        &self,
        team_id: TeamId,
        holder: &str,
        ttl_ms: i64,
    ) -> anyhow::Result<bool> {
        let now = epoch_ms_now();
        let r = sqlx::query(
            "INSERT INTO tenant_leases (team_id, holder, acquired_at, expires_at)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT(team_id) DO UPDATE
             SET holder = excluded.holder,
                 acquired_at = excluded.acquired_at,
                 expires_at = excluded.expires_at
             WHERE tenant_leases.expires_at <= $3",
        )
        .bind(team_id.0)
        .bind(holder)
        .bind(now)
        .bind(now + ttl_ms)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() == 1)
    }

    /// Extend a lease this holder already owns. A lease that was lost
    /// (expired and taken over) is not touched.
    #[instrument(skip(self), fields(repo = "lease", operation = "renew"))]
    pub async fn renew(&self, team_id: TeamId, holder: &str, ttl_ms: i64) -> anyhow::Result<()> {
        let now = epoch_ms_now();
        sqlx::query(
            "UPDATE tenant_leases SET expires_at = $3
             WHERE team_id = $1 AND holder = $2",
        )
        .bind(team_id.0)
        .bind(holder)
        .bind(now + ttl_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Release only if still held by `holder`; an expired-and-taken-over
    /// lease must not be deleted out from under the new holder.
    #[instrument(skip(self), fields(repo = "lease", operation = "release"))]
    pub async fn release(&self, team_id: TeamId, holder: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM tenant_leases WHERE team_id = $1 AND holder = $2")
            .bind(team_id.0)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Current live holder, if any (test and inspection helper).
    pub async fn current_holder(&self, team_id: TeamId) -> anyhow::Result<Option<String>> {
        let now = epoch_ms_now();
        let holder = sqlx::query_scalar::<_, String>(
            "SELECT holder FROM tenant_leases WHERE team_id = $1 AND expires_at > $2",
        )
        .bind(team_id.0)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(holder)
    }
}
