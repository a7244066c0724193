//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the core runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::Utc;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Elapsed time between two millisecond timestamps, zero when `to` is not after `from`.
pub fn elapsed_between(from_ms: i64, to_ms: i64) -> Duration {
    match u64::try_from(to_ms.saturating_sub(from_ms)) {
        Ok(ms) => Duration::from_millis(ms),
        Err(_) => Duration::ZERO,
    }
}

/// Convert a duration into milliseconds, saturating at `u64::MAX`.
pub fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_is_zero_for_reversed_range() {
        assert_eq!(elapsed_between(1_000, 500), Duration::ZERO);
        assert_eq!(elapsed_between(0, 900_000), Duration::from_secs(900));
    }
}
