//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Runtime helpers supporting the energy manager."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, Utc};
use ems_common::time::{duration_to_millis, now_ms};
use ems_common::ConfigurationError;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::debug;

const DAY_MS: i64 = 86_400_000;

/// Firing plan for a periodic calculation aligned to the UTC day.
///
/// Firings land `lead` before each multiple of `interval` counted from
/// midnight, so upstream sensors have settled by the boundary itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignedSchedule {
    interval: Duration,
    lead: Duration,
}

impl AlignedSchedule {
    pub fn new(interval: Duration, lead: Duration) -> Result<Self, ConfigurationError> {
        if duration_to_millis(interval) == 0 {
            return Err(ConfigurationError::invalid(
                "interval",
                "must be at least one millisecond",
            ));
        }
        Ok(Self { interval, lead })
    }

    /// Interval and lead given in whole minutes.
    pub fn minutes(interval: u64, lead: u64) -> Result<Self, ConfigurationError> {
        Self::new(
            Duration::from_secs(interval.saturating_mul(60)),
            Duration::from_secs(lead.saturating_mul(60)),
        )
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn lead(&self) -> Duration {
        self.lead
    }

    /// Epoch milliseconds of the first firing strictly after `now_ms`.
    pub fn first_firing(&self, now_ms: i64) -> i64 {
        let interval = i64::try_from(duration_to_millis(self.interval)).unwrap_or(DAY_MS);
        let lead = i64::try_from(duration_to_millis(self.lead)).unwrap_or(0);
        let midnight = now_ms - now_ms.rem_euclid(DAY_MS);
        let of_day = now_ms.rem_euclid(DAY_MS);
        let mut firing = midnight + (of_day / interval + 1) * interval - lead;
        while firing <= now_ms {
            firing += interval;
        }
        firing
    }

    /// First firing as a UTC timestamp, for logging and display.
    pub fn first_firing_utc(&self, now_ms: i64) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.first_firing(now_ms))
    }

    /// Delay from `now_ms` until the first firing.
    pub fn first_delay(&self, now_ms: i64) -> Duration {
        let firing = self.first_firing(now_ms);
        Duration::from_millis(u64::try_from(firing - now_ms).unwrap_or(0))
    }
}

/// Async ticker following an [`AlignedSchedule`].
#[derive(Debug)]
pub struct AlignedTicker {
    interval: Interval,
}

impl AlignedTicker {
    /// Ticker whose first tick follows the schedule relative to the wall clock.
    pub fn start(schedule: &AlignedSchedule) -> Self {
        Self::start_at(schedule, now_ms())
    }

    /// Ticker whose first tick follows the schedule relative to `now_ms`.
    pub fn start_at(schedule: &AlignedSchedule, now_ms: i64) -> Self {
        let delay = schedule.first_delay(now_ms);
        debug!(
            first_firing = ?schedule.first_firing_utc(now_ms),
            first_delay_ms = duration_to_millis(delay),
            interval_ms = duration_to_millis(schedule.interval()),
            "aligned ticker armed"
        );
        let mut interval = tokio::time::interval_at(Instant::now() + delay, schedule.interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2024-05-01T10:07:00Z
    const TEN_OH_SEVEN: i64 = 1_714_558_020_000;

    fn minutes(m: i64) -> i64 {
        m * 60_000
    }

    #[test]
    fn fires_lead_before_next_boundary() {
        let schedule = AlignedSchedule::minutes(15, 5).unwrap();
        assert_eq!(schedule.first_delay(TEN_OH_SEVEN), Duration::from_secs(3 * 60));
    }

    #[test]
    fn first_firing_is_reported_in_utc() {
        use chrono::Timelike;

        let schedule = AlignedSchedule::minutes(15, 5).unwrap();
        let firing = schedule.first_firing_utc(TEN_OH_SEVEN).unwrap();
        assert_eq!((firing.hour(), firing.minute(), firing.second()), (10, 10, 0));
    }

    #[test]
    fn rolls_forward_when_lead_instant_has_passed() {
        let schedule = AlignedSchedule::minutes(15, 5).unwrap();
        let now = TEN_OH_SEVEN + minutes(5);
        assert_eq!(schedule.first_firing(now), TEN_OH_SEVEN + minutes(18));
        // Exactly on the lead instant waits a full interval.
        let now = TEN_OH_SEVEN + minutes(3);
        assert_eq!(schedule.first_delay(now), Duration::from_secs(15 * 60));
    }

    #[test]
    fn crosses_midnight() {
        let schedule = AlignedSchedule::minutes(15, 0).unwrap();
        let last_minute = TEN_OH_SEVEN - minutes(10 * 60 + 7) + minutes(24 * 60 - 1);
        assert_eq!(schedule.first_delay(last_minute), Duration::from_secs(60));
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(AlignedSchedule::new(Duration::ZERO, Duration::ZERO).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_follows_schedule() {
        let schedule = AlignedSchedule::minutes(15, 5).unwrap();
        let start = Instant::now();
        let mut ticker = AlignedTicker::start_at(&schedule, TEN_OH_SEVEN);
        ticker.tick().await;
        assert_eq!(start.elapsed(), Duration::from_secs(3 * 60));
        ticker.tick().await;
        assert_eq!(start.elapsed(), Duration::from_secs(18 * 60));
    }
}
