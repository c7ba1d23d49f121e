//! Purge scheduler for old events.
//!
//! Two modes: a cron expression (seconds-granularity, `schedule`) or a fixed
//! interval (`@every <duration>`). The schedule wins when both are set;
//! neither falls back to `@every 1m` with a warning. Runs are sequential, so
//! a slow purge can never overlap the next one; a per-run timeout guards
//! against a runaway delete.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use cron::Schedule;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::CronConfig;
use crate::db::DbPool;
use crate::repo::events;
use crate::utils::sleep_with_cancel;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
const JOB_TIMEOUT: Duration = Duration::from_secs(55 * 60);

pub enum PurgeSchedule {
    Cron(Schedule),
    Every(Duration),
}

impl PurgeSchedule {
    pub fn from_config(config: &CronConfig) -> Result<Self> {
        if let Some(expr) = &config.schedule {
            let schedule =
                Schedule::from_str(expr).with_context(|| format!("invalid cron schedule: {expr}"))?;
            info!(schedule = %expr, "purge job registered on cron schedule");
            return Ok(PurgeSchedule::Cron(schedule));
        }

        if let Some(interval) = &config.interval {
            let every = parse_every(interval)?;
            info!(interval = %interval, "purge job registered on interval");
            return Ok(PurgeSchedule::Every(every));
        }

        warn!("no purge schedule configured, defaulting to @every 1m");
        Ok(PurgeSchedule::Every(DEFAULT_INTERVAL))
    }

    fn next_delay(&self) -> Duration {
        match self {
            PurgeSchedule::Every(interval) => *interval,
            PurgeSchedule::Cron(schedule) => schedule
                .upcoming(Utc)
                .next()
                .and_then(|next| (next - Utc::now()).to_std().ok())
                .unwrap_or(DEFAULT_INTERVAL),
        }
    }
}

/// Parses an `@every <duration>` spec such as `@every 30s`, `@every 5m`,
/// `@every 1h`.
pub fn parse_every(spec: &str) -> Result<Duration> {
    let rest = spec
        .strip_prefix("@every")
        .with_context(|| format!("interval must start with @every: {spec}"))?
        .trim();

    if rest.len() < 2 {
        anyhow::bail!("invalid interval: {spec}");
    }

    let (value, unit) = rest.split_at(rest.len() - 1);
    let value: u64 = value
        .trim()
        .parse()
        .with_context(|| format!("invalid interval value: {spec}"))?;
    let seconds = match unit {
        "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        _ => anyhow::bail!("invalid interval unit (expected s, m or h): {spec}"),
    };

    if seconds == 0 {
        anyhow::bail!("interval must be positive: {spec}");
    }
    Ok(Duration::from_secs(seconds))
}

/// Runs the purge job until cancellation.
pub async fn run_purge_job(
    pool: DbPool,
    config: CronConfig,
    schedule: PurgeSchedule,
    cancel: CancellationToken,
) {
    info!(days_to_delete = config.days_to_delete, "purge scheduler started");

    loop {
        let delay = schedule.next_delay();
        if !sleep_with_cancel(&cancel, delay).await {
            info!("purge scheduler stopping");
            return;
        }

        let purge = events::delete_old_events(&pool, Some(config.days_to_delete));
        match tokio::time::timeout(JOB_TIMEOUT, purge).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => error!(error = %err, "purge of old events failed"),
            Err(_) => error!(timeout = ?JOB_TIMEOUT, "purge of old events timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_seconds_minutes_hours() {
        assert_eq!(parse_every("@every 30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_every("@every 5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_every("@every 1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn rejects_malformed_intervals() {
        assert!(parse_every("every 1m").is_err());
        assert!(parse_every("@every").is_err());
        assert!(parse_every("@every 1d").is_err());
        assert!(parse_every("@every 0s").is_err());
    }

    #[test]
    fn schedule_wins_over_interval() {
        let config = CronConfig {
            days_to_delete: 365,
            schedule: Some("0 0 16 * * *".to_string()),
            interval: Some("@every 1m".to_string()),
        };
        assert!(matches!(
            PurgeSchedule::from_config(&config).unwrap(),
            PurgeSchedule::Cron(_)
        ));
    }

    #[test]
    fn missing_both_defaults_to_one_minute() {
        let config = CronConfig {
            days_to_delete: 365,
            schedule: None,
            interval: None,
        };
        match PurgeSchedule::from_config(&config).unwrap() {
            PurgeSchedule::Every(interval) => assert_eq!(interval, DEFAULT_INTERVAL),
            PurgeSchedule::Cron(_) => panic!("expected interval mode"),
        }
    }

    #[test]
    fn invalid_cron_expression_rejected() {
        let config = CronConfig {
            days_to_delete: 365,
            schedule: Some("not a schedule".to_string()),
            interval: None,
        };
        assert!(PurgeSchedule::from_config(&config).is_err());
    }
}
