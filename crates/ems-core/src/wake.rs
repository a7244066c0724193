//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Primary orchestration and lifecycle management."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use strum::Display;

/// Why the supervisor thread woke up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum WakeReason {
    Interval,
    ScheduleProposed,
    RegistryChanged,
    MaintenanceToggled,
    Reconfigured,
    Shutdown,
}

#[derive(Default)]
struct WakeState {
    reasons: Vec<WakeReason>,
    shutdown: bool,
}

#[derive(Default)]
struct WakeShared {
    state: Mutex<WakeState>,
    cv: Condvar,
}

/// Reason-carrying wake-up channel for the supervisor thread.
///
/// Raised reasons coalesce until the next [`WakeSignal::wait`] drains them.
/// Shutdown is sticky: once raised, every later wait returns immediately.
#[derive(Clone, Default)]
pub struct WakeSignal {
    shared: Arc<WakeShared>,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self, reason: WakeReason) {
        let mut state = self.shared.state.lock();
        if reason == WakeReason::Shutdown {
            state.shutdown = true;
        }
        if !state.reasons.contains(&reason) {
            state.reasons.push(reason);
        }
        self.shared.cv.notify_all();
    }

    /// Block until a reason is raised or `timeout` elapses.
    ///
    /// Returns the drained reasons in raise order, or `[Interval]` on timeout.
    pub fn wait(&self, timeout: Duration) -> Vec<WakeReason> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.reasons.is_empty() && !state.shutdown {
            if self.shared.cv.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        let mut reasons = std::mem::take(&mut state.reasons);
        if state.shutdown && !reasons.contains(&WakeReason::Shutdown) {
            reasons.push(WakeReason::Shutdown);
        }
        if reasons.is_empty() {
            reasons.push(WakeReason::Interval);
        }
        reasons
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock().shutdown
    }
}

impl std::fmt::Debug for WakeSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("WakeSignal")
            .field("pending", &state.reasons)
            .field("shutdown", &state.shutdown)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn timeout_reports_interval() {
        let wake = WakeSignal::new();
        assert_eq!(wake.wait(Duration::from_millis(10)), vec![WakeReason::Interval]);
    }

    #[test]
    fn reasons_coalesce_in_raise_order() {
        let wake = WakeSignal::new();
        wake.raise(WakeReason::RegistryChanged);
        wake.raise(WakeReason::ScheduleProposed);
        wake.raise(WakeReason::RegistryChanged);
        assert_eq!(
            wake.wait(Duration::from_secs(5)),
            vec![WakeReason::RegistryChanged, WakeReason::ScheduleProposed]
        );
    }

    #[test]
    fn raise_from_other_thread_wakes_waiter() {
        let wake = WakeSignal::new();
        let raiser = wake.clone();
        let started = Instant::now();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            raiser.raise(WakeReason::MaintenanceToggled);
        });
        let reasons = wake.wait(Duration::from_secs(10));
        handle.join().unwrap();
        assert_eq!(reasons, vec![WakeReason::MaintenanceToggled]);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn shutdown_is_sticky() {
        let wake = WakeSignal::new();
        wake.raise(WakeReason::Shutdown);
        assert_eq!(wake.wait(Duration::from_secs(5)), vec![WakeReason::Shutdown]);
        assert_eq!(wake.wait(Duration::from_secs(5)), vec![WakeReason::Shutdown]);
        assert!(wake.is_shutdown());
    }
}
