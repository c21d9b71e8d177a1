use crate::config::AlertConfig;
use crate::dashboard::Dashboard;
use anyhow::{Result, anyhow};
use chrono::{DateTime, Days, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::run_daily_routine;

/// Next occurrence of `hour:minute` local time strictly after `now`.
/// A local time skipped by a DST jump resolves to the following day.
pub fn next_run(now: DateTime<Utc>, tz: Tz, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
    let at = NaiveTime::from_hms_opt(hour, minute, 0)?;
    let today = now.with_timezone(&tz).date_naive();

    (0..=2u64)
        .filter_map(|offset| today.checked_add_days(Days::new(offset)))
        .filter_map(|day| tz.from_local_datetime(&day.and_time(at)).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .find(|dt| *dt > now)
}

/// Run the alert routine every day at the configured local time.
/// The first run happens at the next occurrence, never at startup.
pub fn spawn_daily(dashboard: Arc<Dashboard>, config: AlertConfig) -> Result<JoinHandle<()>> {
    let tz: Tz = config
        .timezone
        .parse()
        .map_err(|e| anyhow!("invalid alerts.timezone {:?}: {}", config.timezone, e))?;
    NaiveTime::from_hms_opt(config.hour, config.minute, 0)
        .ok_or_else(|| anyhow!("invalid alert time {}:{}", config.hour, config.minute))?;

    info!(
        "Running with active routines (daily at {:02}:{:02} {})",
        config.hour, config.minute, tz
    );

    Ok(tokio::spawn(async move {
        loop {
            let now = Utc::now();
            let Some(next) = next_run(now, tz, config.hour, config.minute) else {
                warn!("Could not compute next alert run, stopping scheduler");
                return;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            info!("Next alert routine at {}", next.with_timezone(&tz));
            tokio::time::sleep(wait).await;

            run_daily_routine(&dashboard, &config, Utc::now()).await;
        }
    }))
}
