// Tenant identity and the slice of team configuration the engine reads.

use serde::{Deserialize, Serialize};

/// Opaque tenant identifier. Row key of the external `teams` table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TeamId(pub i64);

impl std::fmt::Display for TeamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One row of the tenant configuration store, as read by the engine.
/// `preagg_enabled` is tri-state: NULL in the store means "not set".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamRecord {
    pub team_id: TeamId,
    pub name: String,
    pub preagg_enabled: Option<bool>,
    /// Per-team lookback override (days). None = engine default.
    pub lookback_days: Option<u32>,
}
