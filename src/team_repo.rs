// Tenant configuration store (read-only to the engine). The `teams` table
// is owned by the surrounding product; the engine only reads the enabled
// flag and the lookback override. Test helpers create and populate it.

use sqlx::Row;
use sqlx::sqlite::SqlitePool;
use tracing::instrument;

use crate::models::{TeamId, TeamRecord};

pub struct TeamRepo {
    pool: SqlitePool,
}

impl TeamRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates the teams table if the deployment does not provide one.
    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS teams (
                team_id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                preagg_enabled INTEGER,
                lookback_days INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All team records, ordered by team_id for deterministic downstream
    /// policy evaluation.
    #[instrument(skip(self), fields(repo = "team", operation = "list_teams"))]
    pub async fn list_teams(&self) -> anyhow::Result<Vec<TeamRecord>> {
        let rows = sqlx::query(
            "SELECT team_id, name, preagg_enabled, lookback_days FROM teams ORDER BY team_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(Self::parse_row(&row)?);
        }
        Ok(out)
    }

    pub async fn get_team(&self, team_id: TeamId) -> anyhow::Result<Option<TeamRecord>> {
        let row = sqlx::query(
            "SELECT team_id, name, preagg_enabled, lookback_days FROM teams WHERE team_id = $1",
        )
        .bind(team_id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::parse_row).transpose()
    }

    fn parse_row(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<TeamRecord> {
        let team_id: i64 = row.try_get("team_id")?;
        let name: String = row.try_get("name")?;
        let preagg_enabled: Option<i64> = row.try_get("preagg_enabled")?;
        let lookback_days: Option<i64> = row.try_get("lookback_days")?;
        Ok(TeamRecord {
            team_id: TeamId(team_id),
            name,
            preagg_enabled: preagg_enabled.map(|v| v != 0),
            lookback_days: lookback_days.map(|v| v as u32),
        })
    }
}
