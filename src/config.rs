use serde::Deserialize;

use crate::models::Granularity;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub selection: SelectionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_pool_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Rolling window to keep consistent, in days.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    /// Gap counts below this are normal pipeline lag, not a backfill
    /// trigger.
    #[serde(default = "default_noise_threshold")]
    pub noise_threshold: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_base_secs")]
    pub retry_backoff_base_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Optional cron expression for sweeps (e.g. "0 0 * * * *" = hourly).
    /// Uses local time; overrides sweep_interval_secs.
    pub sweep_schedule: Option<String>,
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    #[serde(default = "default_job_deadline_secs")]
    pub job_deadline_secs: u64,
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
    #[serde(default = "default_degraded_cooldown_secs")]
    pub degraded_cooldown_secs: u64,
    #[serde(default = "default_enablement_poll_secs")]
    pub enablement_poll_secs: u64,
    /// How often to log engine stats (jobs, degraded gauge) at INFO level.
    #[serde(default = "default_stats_log_interval_secs")]
    pub stats_log_interval_secs: u64,
    #[serde(default = "default_granularity")]
    pub granularity: Granularity,
    #[serde(default = "default_dispatch_capacity")]
    pub dispatch_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SelectionConfig {
    #[serde(default = "default_heuristic_cap")]
    pub heuristic_cap: usize,
    /// Trailing window for the median-activity ranking, in days.
    #[serde(default = "default_heuristic_window_days")]
    pub heuristic_window_days: u32,
    /// Operator allow-list of team ids.
    #[serde(default)]
    pub allow_list: Vec<i64>,
    /// Static fallback team ids, used only when no other policy selects
    /// anyone.
    #[serde(default)]
    pub fallback_teams: Vec<i64>,
}

fn default_lookback_days() -> u32 {
    7
}

fn default_noise_threshold() -> usize {
    3
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_base_secs() -> u64 {
    30
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

fn default_max_concurrent_jobs() -> usize {
    4
}

fn default_job_deadline_secs() -> u64 {
    600
}

fn default_lease_ttl_secs() -> u64 {
    900
}

fn default_degraded_cooldown_secs() -> u64 {
    3600
}

fn default_enablement_poll_secs() -> u64 {
    15
}

fn default_stats_log_interval_secs() -> u64 {
    300
}

fn default_granularity() -> Granularity {
    Granularity::Day
}

fn default_dispatch_capacity() -> usize {
    64
}

fn default_heuristic_cap() -> usize {
    30
}

fn default_heuristic_window_days() -> u32 {
    14
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );
        anyhow::ensure!(
            self.engine.lookback_days > 0,
            "engine.lookback_days must be > 0, got {}",
            self.engine.lookback_days
        );
        anyhow::ensure!(
            self.engine.noise_threshold > 0,
            "engine.noise_threshold must be > 0, got {}",
            self.engine.noise_threshold
        );
        anyhow::ensure!(
            self.engine.max_attempts > 0,
            "engine.max_attempts must be > 0, got {}",
            self.engine.max_attempts
        );
        anyhow::ensure!(
            self.engine.sweep_interval_secs > 0,
            "engine.sweep_interval_secs must be > 0, got {}",
            self.engine.sweep_interval_secs
        );
        anyhow::ensure!(
            self.engine.max_concurrent_jobs > 0,
            "engine.max_concurrent_jobs must be > 0, got {}",
            self.engine.max_concurrent_jobs
        );
        anyhow::ensure!(
            self.engine.job_deadline_secs > 0,
            "engine.job_deadline_secs must be > 0, got {}",
            self.engine.job_deadline_secs
        );
        anyhow::ensure!(
            self.engine.lease_ttl_secs > 0,
            "engine.lease_ttl_secs must be > 0, got {}",
            self.engine.lease_ttl_secs
        );
        anyhow::ensure!(
            self.selection.heuristic_cap > 0,
            "selection.heuristic_cap must be > 0, got {}",
            self.selection.heuristic_cap
        );
        anyhow::ensure!(
            self.selection.heuristic_window_days > 0,
            "selection.heuristic_window_days must be > 0, got {}",
            self.selection.heuristic_window_days
        );
        if let Some(ref cron_str) = self.engine.sweep_schedule {
            use std::str::FromStr;
            anyhow::ensure!(
                cron::Schedule::from_str(cron_str).is_ok(),
                "engine.sweep_schedule is not a valid cron expression: {}",
                cron_str
            );
        }
        Ok(())
    }
}
