//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Primary orchestration and lifecycle management."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use ems_common::ComponentError;
use ems_core::{
    Component, ComponentRegistry, ComponentStatus, ComponentType, Schedule, WakeReason,
    WakeSignal,
};

struct Stub {
    id: String,
}

impl Stub {
    fn shared(id: impl Into<String>) -> Arc<dyn Component> {
        Arc::new(Self { id: id.into() })
    }
}

impl Component for Stub {
    fn id(&self) -> &str {
        &self.id
    }

    fn component_type(&self) -> ComponentType {
        ComponentType::Ventilation
    }

    fn status(&self) -> ComponentStatus {
        ComponentStatus::Enabled
    }

    fn set_status(&self, _status: ComponentStatus) -> Result<(), ComponentError> {
        Ok(())
    }

    fn apply_schedule(&self, _schedule: &Schedule) -> Result<(), ComponentError> {
        Ok(())
    }
}

#[test]
fn duplicate_bind_is_a_no_op() {
    let wake = WakeSignal::new();
    let registry = ComponentRegistry::new(wake.clone());
    assert!(registry.bind(Stub::shared("vent-1")));
    assert_eq!(wake.wait(Duration::from_millis(10)), vec![WakeReason::RegistryChanged]);

    assert!(!registry.bind(Stub::shared("vent-1")));
    assert_eq!(wake.wait(Duration::from_millis(10)), vec![WakeReason::Interval]);
    assert_eq!(registry.len(), 1);
}

#[test]
fn unbind_removes_and_preserves_order() {
    let registry = ComponentRegistry::new(WakeSignal::new());
    for id in ["a", "b", "c"] {
        registry.bind(Stub::shared(id));
    }
    assert!(registry.unbind("b").is_some());
    assert!(registry.unbind("b").is_none());
    assert_eq!(registry.ids(), vec!["a".to_string(), "c".to_string()]);
    let snapshot: Vec<String> = registry
        .snapshot()
        .iter()
        .map(|c| c.id().to_owned())
        .collect();
    assert_eq!(snapshot, registry.ids());
    assert!(registry.get("c").is_some());
    assert!(registry.get("b").is_none());
}

#[test]
fn concurrent_bind_and_unbind_never_duplicates() {
    let registry = Arc::new(ComponentRegistry::new(WakeSignal::new()));
    let workers: Vec<_> = (0..8)
        .map(|worker| {
            let registry = registry.clone();
            thread::spawn(move || {
                for round in 0..200 {
                    let id = format!("cmp-{}", (worker + round) % 16);
                    registry.bind(Stub::shared(id.clone()));
                    let snapshot = registry.snapshot();
                    let unique: HashSet<&str> = snapshot.iter().map(|c| c.id()).collect();
                    assert_eq!(unique.len(), snapshot.len());
                    if round % 3 == 0 {
                        registry.unbind(&id);
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    let ids = registry.ids();
    let unique: HashSet<&String> = ids.iter().collect();
    assert_eq!(unique.len(), ids.len());
    assert!(registry.len() <= 16);
}
