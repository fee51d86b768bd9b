//! Daily ingestion schedule.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};
use tracing::{error, info, warn};

use super::{IngestReport, IngestRunner, Trigger, TriggerOutcome};
use crate::retry::Clock;

/// A time of day (UTC) at which ingestion fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    at: NaiveTime,
}

impl DailySchedule {
    pub fn new(at: NaiveTime) -> Self {
        Self { at }
    }

    /// First firing strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = now.date_naive().and_time(self.at).and_utc();
        if today > now {
            today
        } else {
            today + chrono::Duration::days(1)
        }
    }

    /// How long to wait from `now` until the next firing.
    pub fn until_next(&self, now: DateTime<Utc>) -> Duration {
        (self.next_after(now) - now).to_std().unwrap_or_default()
    }
}

impl Default for DailySchedule {
    fn default() -> Self {
        Self::new(NaiveTime::from_hms_opt(2, 0, 0).unwrap_or(NaiveTime::MIN))
    }
}

impl FromStr for DailySchedule {
    type Err = String;

    /// Parse `HH:MM` (24-hour, UTC).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveTime::parse_from_str(s.trim(), "%H:%M")
            .map(Self::new)
            .map_err(|_| format!("Invalid schedule time '{}', expected HH:MM", s))
    }
}

impl fmt::Display for DailySchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} UTC", self.at.format("%H:%M"))
    }
}

/// Fires the runner once a day.
pub struct Scheduler {
    schedule: DailySchedule,
    runner: IngestRunner,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn new(schedule: DailySchedule, runner: IngestRunner, clock: Arc<dyn Clock>) -> Self {
        Self {
            schedule,
            runner,
            clock,
        }
    }

    /// Trigger one run and wait for it. `None` if nothing ran.
    pub async fn fire(&self) -> Option<IngestReport> {
        match self.runner.trigger(Trigger::Schedule).await {
            TriggerOutcome::Started { run_id, handle } => match handle.await {
                Ok(Ok(report)) => Some(report),
                Ok(Err(e)) => {
                    error!(%run_id, "Scheduled ingestion failed: {}", e);
                    None
                }
                Err(e) => {
                    error!(%run_id, "Scheduled ingestion task aborted: {}", e);
                    None
                }
            },
            TriggerOutcome::AlreadyRunning => {
                warn!("Skipping scheduled ingestion, a run is already in progress");
                None
            }
        }
    }

    /// Loop forever, firing at the scheduled time each day.
    pub async fn run(self) {
        info!("Ingestion scheduled daily at {}", self.schedule);
        loop {
            let wait = self.schedule.until_next(Utc::now());
            info!("Next scheduled ingestion in {:?}", wait);
            self.clock.sleep(wait).await;
            self.fire().await;
        }
    }
}
