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

use ems_bus::Value;
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::wake::{WakeReason, WakeSignal};

/// Ordered setpoints for one component. Each setpoint's timestamp is its start time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schedule {
    setpoints: Vec<Value>,
}

impl Schedule {
    pub fn new(setpoints: Vec<Value>) -> Self {
        Self { setpoints }
    }

    pub fn setpoints(&self) -> &[Value] {
        &self.setpoints
    }

    pub fn len(&self) -> usize {
        self.setpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.setpoints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.setpoints.iter()
    }

    /// Setpoint in force at `timestamp`: the last one starting at or before it.
    pub fn setpoint_at(&self, timestamp: i64) -> Option<&Value> {
        self.setpoints
            .iter()
            .filter(|value| value.timestamp() <= timestamp)
            .max_by_key(|value| value.timestamp())
    }
}

impl FromIterator<Value> for Schedule {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Immutable, timestamped mapping from component id to its [`Schedule`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlSchedule {
    timestamp: i64,
    #[serde(default)]
    entries: IndexMap<String, Schedule>,
}

impl ControlSchedule {
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            entries: IndexMap::new(),
        }
    }

    /// Builder-style insertion, used while assembling a schedule before proposal.
    pub fn with_entry(mut self, component: impl Into<String>, schedule: Schedule) -> Self {
        self.entries.insert(component.into(), schedule);
        self
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn get(&self, component: &str) -> Option<&Schedule> {
        self.entries.get(component)
    }

    pub fn contains(&self, component: &str) -> bool {
        self.entries.contains_key(component)
    }

    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

struct Slots {
    active: Arc<ControlSchedule>,
    pending: Option<Arc<ControlSchedule>>,
}

/// Active schedule plus a single pending slot.
///
/// The active timestamp never decreases: [`ScheduleStore::adopt`] only
/// promotes a pending schedule that is strictly newer.
pub struct ScheduleStore {
    slots: Mutex<Slots>,
    wake: WakeSignal,
}

impl ScheduleStore {
    pub fn new(wake: WakeSignal) -> Self {
        Self {
            slots: Mutex::new(Slots {
                active: Arc::new(ControlSchedule::default()),
                pending: None,
            }),
            wake,
        }
    }

    /// Park `schedule` for the next pass, replacing any un-adopted proposal.
    pub fn propose(&self, schedule: ControlSchedule) {
        let timestamp = schedule.timestamp();
        let replaced = self.slots.lock().pending.replace(Arc::new(schedule));
        debug!(
            timestamp,
            replaced = replaced.map(|s| s.timestamp()),
            "control schedule proposed"
        );
        self.wake.raise(WakeReason::ScheduleProposed);
    }

    pub fn active(&self) -> Arc<ControlSchedule> {
        self.slots.lock().active.clone()
    }

    pub fn pending(&self) -> Option<Arc<ControlSchedule>> {
        self.slots.lock().pending.clone()
    }

    /// Take the pending slot and promote it when strictly newer than the active schedule.
    pub fn adopt(&self) -> Option<Arc<ControlSchedule>> {
        let mut slots = self.slots.lock();
        let pending = slots.pending.take()?;
        if pending.timestamp() > slots.active.timestamp() {
            slots.active = pending.clone();
            info!(
                timestamp = pending.timestamp(),
                components = pending.len(),
                "control schedule adopted"
            );
            Some(pending)
        } else {
            info!(
                timestamp = pending.timestamp(),
                active = slots.active.timestamp(),
                "discarding control schedule not newer than the active one"
            );
            None
        }
    }
}

impl std::fmt::Debug for ScheduleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slots = self.slots.lock();
        f.debug_struct("ScheduleStore")
            .field("active", &slots.active.timestamp())
            .field("pending", &slots.pending.as_ref().map(|s| s.timestamp()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ScheduleStore {
        ScheduleStore::new(WakeSignal::new())
    }

    #[test]
    fn initial_active_schedule_is_empty() {
        let store = store();
        assert_eq!(store.active().timestamp(), 0);
        assert!(store.active().is_empty());
        assert!(store.adopt().is_none());
    }

    #[test]
    fn only_strictly_newer_schedules_are_adopted() {
        let store = store();
        store.propose(ControlSchedule::new(100));
        assert_eq!(store.adopt().map(|s| s.timestamp()), Some(100));

        store.propose(ControlSchedule::new(100));
        assert!(store.adopt().is_none());
        assert!(store.pending().is_none());

        store.propose(ControlSchedule::new(50));
        assert!(store.adopt().is_none());
        assert_eq!(store.active().timestamp(), 100);
    }

    #[test]
    fn later_proposal_overwrites_pending() {
        let store = store();
        store.propose(ControlSchedule::new(300));
        store.propose(ControlSchedule::new(200));
        assert_eq!(store.pending().map(|s| s.timestamp()), Some(200));
        assert_eq!(store.adopt().map(|s| s.timestamp()), Some(200));
    }

    #[test]
    fn proposal_raises_wake_reason() {
        let wake = WakeSignal::new();
        let store = ScheduleStore::new(wake.clone());
        store.propose(ControlSchedule::new(1));
        assert_eq!(
            wake.wait(std::time::Duration::from_secs(1)),
            vec![WakeReason::ScheduleProposed]
        );
    }

    #[test]
    fn setpoint_lookup_uses_start_times() {
        let schedule: Schedule = [Value::double(1.0, 0), Value::double(2.0, 900_000)]
            .into_iter()
            .collect();
        assert_eq!(schedule.setpoint_at(899_999), Some(&Value::double(1.0, 0)));
        assert_eq!(schedule.setpoint_at(900_000), Some(&Value::double(2.0, 900_000)));
        assert_eq!(schedule.setpoint_at(-1), None);
    }

    #[test]
    fn control_schedule_deserializes_from_json() {
        let json = r#"{
            "timestamp": 1700000000000,
            "entries": {
                "chp-1": [{"timestamp": 1700000000000, "payload": {"type": "double", "value": 5.5}}]
            }
        }"#;
        let schedule: ControlSchedule = serde_json::from_str(json).unwrap();
        assert_eq!(schedule.timestamp(), 1_700_000_000_000);
        assert_eq!(schedule.get("chp-1").map(Schedule::len), Some(1));
        assert!(!schedule.contains("hp-1"));
    }
}
