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

use ems_bus::{ChannelBus, Value};
use ems_common::{
    ComponentError, ConfigRecord, ConfigurationError, EnergyManagementError, FromConfig,
};
use ems_core::{
    Component, ComponentStatus, ComponentType, ControlSchedule, EmsContext, EnergyManager,
    LoopState, ManagerConfig, PassReport, Schedule, WakeReason, WakeSignal,
};
use parking_lot::Mutex;

enum Behaviour {
    Normal,
    FailStatus,
    Panic,
    ShutdownOnStatus(WakeSignal),
}

struct TestComponent {
    id: String,
    status: Mutex<ComponentStatus>,
    applied: Mutex<Vec<Schedule>>,
    status_calls: Mutex<usize>,
    behaviour: Behaviour,
}

impl TestComponent {
    fn new(id: &str, status: ComponentStatus) -> Arc<Self> {
        Self::with_behaviour(id, status, Behaviour::Normal)
    }

    fn with_behaviour(id: &str, status: ComponentStatus, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_owned(),
            status: Mutex::new(status),
            applied: Mutex::new(Vec::new()),
            status_calls: Mutex::new(0),
            behaviour,
        })
    }

    fn applied(&self) -> usize {
        self.applied.lock().len()
    }

    fn status_calls(&self) -> usize {
        *self.status_calls.lock()
    }
}

impl Component for TestComponent {
    fn id(&self) -> &str {
        &self.id
    }

    fn component_type(&self) -> ComponentType {
        ComponentType::HeatPump
    }

    fn status(&self) -> ComponentStatus {
        *self.status.lock()
    }

    fn set_status(&self, status: ComponentStatus) -> Result<(), ComponentError> {
        *self.status_calls.lock() += 1;
        match &self.behaviour {
            Behaviour::FailStatus => return Err(ComponentError::unavailable(&self.id, "offline")),
            Behaviour::Panic => panic!("driver bug"),
            Behaviour::ShutdownOnStatus(wake) => wake.raise(WakeReason::Shutdown),
            Behaviour::Normal => {}
        }
        *self.status.lock() = status;
        Ok(())
    }

    fn apply_schedule(&self, schedule: &Schedule) -> Result<(), ComponentError> {
        self.applied.lock().push(schedule.clone());
        Ok(())
    }
}

fn context() -> EmsContext {
    EmsContext::new(Arc::new(ChannelBus::new()))
}

fn config(maintenance: bool) -> ManagerConfig {
    ManagerConfig {
        interval: Duration::from_secs(60),
        maintenance,
    }
}

fn wait_for(manager: &EnergyManager, mut predicate: impl FnMut(&PassReport) -> bool) -> PassReport {
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut seen = 0;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        assert!(!remaining.is_zero(), "condition not reached within deadline");
        if let Some(report) = manager.wait_for_pass(seen, remaining) {
            seen = report.pass;
            if predicate(&report) {
                return report;
            }
        }
    }
}

#[test]
fn first_pass_enables_registered_components() {
    let ctx = context();
    let heat_pump = TestComponent::new("hp-1", ComponentStatus::Disabled);
    ctx.registry().bind(heat_pump.clone());

    let manager = EnergyManager::start(&ctx, config(false)).unwrap();
    wait_for(&manager, |_| heat_pump.status() == ComponentStatus::Enabled);
    assert_eq!(manager.state(), LoopState::Running);
    manager.shutdown().unwrap();
}

#[test]
fn maintenance_overrides_and_clears() {
    let ctx = context();
    let a = TestComponent::new("a", ComponentStatus::Enabled);
    let b = TestComponent::new("b", ComponentStatus::Disabled);
    ctx.registry().bind(a.clone());
    ctx.registry().bind(b.clone());

    let manager = EnergyManager::start(&ctx, config(false)).unwrap();
    wait_for(&manager, |_| b.status() == ComponentStatus::Enabled);

    manager.set_maintenance(true);
    ctx.schedules().propose(
        ControlSchedule::new(10).with_entry("a", Schedule::new(vec![Value::double(1.0, 10)])),
    );
    let report = wait_for(&manager, |_| {
        a.status() == ComponentStatus::Maintenance && b.status() == ComponentStatus::Maintenance
    });
    assert!(report.maintenance);
    assert_eq!(a.applied(), 0);

    manager.set_maintenance(false);
    wait_for(&manager, |_| {
        a.status() == ComponentStatus::Enabled && b.status() == ComponentStatus::Enabled
    });
    manager.shutdown().unwrap();
}

#[test]
fn maintenance_from_config_applies_on_first_pass() {
    let ctx = context();
    let storage = TestComponent::new("tes", ComponentStatus::Enabled);
    ctx.registry().bind(storage.clone());
    let manager = EnergyManager::start(&ctx, config(true)).unwrap();
    wait_for(&manager, |_| storage.status() == ComponentStatus::Maintenance);
    assert!(manager.maintenance());
}

#[test]
fn newer_schedule_is_applied_and_stale_one_ignored() {
    let ctx = context();
    let chp = TestComponent::new("chp", ComponentStatus::Enabled);
    let hp = TestComponent::new("hp", ComponentStatus::Enabled);
    ctx.registry().bind(chp.clone());
    ctx.registry().bind(hp.clone());
    let manager = EnergyManager::start(&ctx, config(false)).unwrap();

    ctx.schedules().propose(
        ControlSchedule::new(100)
            .with_entry("chp", Schedule::new(vec![Value::double(5.0, 100)]))
            .with_entry("hp", Schedule::new(vec![Value::double(2.0, 100)])),
    );
    wait_for(&manager, |_| chp.applied() == 1 && hp.applied() == 1);
    assert_eq!(ctx.schedules().active().timestamp(), 100);

    ctx.schedules().propose(
        ControlSchedule::new(100).with_entry("chp", Schedule::new(vec![Value::double(9.0, 100)])),
    );
    wait_for(&manager, |_| ctx.schedules().pending().is_none());
    ctx.schedules().propose(
        ControlSchedule::new(40).with_entry("chp", Schedule::new(vec![Value::double(9.0, 40)])),
    );
    wait_for(&manager, |_| ctx.schedules().pending().is_none());
    assert_eq!(ctx.schedules().active().timestamp(), 100);
    assert_eq!(chp.applied(), 1);

    // Unmapped components keep their previous schedule.
    ctx.schedules().propose(
        ControlSchedule::new(200).with_entry("hp", Schedule::new(vec![Value::double(3.0, 200)])),
    );
    wait_for(&manager, |_| hp.applied() == 2);
    assert_eq!(chp.applied(), 1);
    assert_eq!(manager.last_pass().and_then(|report| report.adopted), Some(200));
    manager.shutdown().unwrap();
}

#[test]
fn failing_components_do_not_block_others() {
    let ctx = context();
    let broken = TestComponent::with_behaviour("broken", ComponentStatus::Disabled, Behaviour::FailStatus);
    let buggy = TestComponent::with_behaviour("buggy", ComponentStatus::Disabled, Behaviour::Panic);
    let healthy = TestComponent::new("healthy", ComponentStatus::Disabled);
    ctx.registry().bind(broken);
    ctx.registry().bind(buggy);
    ctx.registry().bind(healthy.clone());

    let manager = EnergyManager::start(&ctx, config(false)).unwrap();
    let report = wait_for(&manager, |report| report.visited == 3);
    assert_eq!(report.failures, vec!["broken".to_string(), "buggy".to_string()]);
    assert_eq!(healthy.status(), ComponentStatus::Enabled);
    assert_eq!(manager.state(), LoopState::Running);
    manager.shutdown().unwrap();
}

#[test]
fn shutdown_abandons_rest_of_pass() {
    let ctx = context();
    let first = TestComponent::with_behaviour(
        "first",
        ComponentStatus::Disabled,
        Behaviour::ShutdownOnStatus(ctx.wake().clone()),
    );
    let second = TestComponent::new("second", ComponentStatus::Disabled);
    ctx.registry().bind(first);
    ctx.registry().bind(second.clone());

    let manager = EnergyManager::start(&ctx, config(false)).unwrap();
    let report = wait_for(&manager, |_| true);
    assert!(report.abandoned);
    assert_eq!(report.visited, 1);
    assert_eq!(second.status(), ComponentStatus::Disabled);
    manager.shutdown().unwrap();
    assert_eq!(manager.state(), LoopState::Stopped);
}

#[test]
fn shutdown_is_idempotent() {
    let ctx = context();
    let manager = EnergyManager::start(&ctx, config(false)).unwrap();
    manager.shutdown().unwrap();
    manager.shutdown().unwrap();
    assert_eq!(manager.state(), LoopState::Stopped);
}

#[test]
fn reconfigure_updates_interval_and_maintenance() {
    let ctx = context();
    let storage = TestComponent::new("tes", ComponentStatus::Enabled);
    ctx.registry().bind(storage.clone());
    let manager = EnergyManager::start(&ctx, config(false)).unwrap();

    manager
        .reconfigure(ManagerConfig {
            interval: Duration::from_millis(20),
            maintenance: true,
        })
        .unwrap();
    wait_for(&manager, |_| storage.status() == ComponentStatus::Maintenance);
    assert_eq!(manager.interval(), Duration::from_millis(20));

    // Short interval keeps passes coming without explicit wakes.
    let before = manager.passes();
    wait_for(&manager, |report| {
        report.pass > before + 2 && report.reasons == vec![WakeReason::Interval]
    });
    manager.shutdown().unwrap();
}

#[test]
fn manager_config_requires_maintenance_field() {
    let err = ManagerConfig::from_record(&ConfigRecord::new()).unwrap_err();
    assert!(matches!(err, ConfigurationError::MissingField { field } if field == "maintenance"));

    let config = ManagerConfig::from_record(&ConfigRecord::new().with("maintenance", false)).unwrap();
    assert_eq!(config.interval, Duration::from_millis(1000));

    let err = ManagerConfig::from_record(
        &ConfigRecord::new().with("maintenance", false).with("interval", "fast"),
    )
    .unwrap_err();
    assert!(matches!(err, ConfigurationError::InvalidType { .. }));
}

#[test]
fn maintenance_is_reasserted_every_pass() {
    let ctx = context();
    let ventilation = TestComponent::new("vent", ComponentStatus::Maintenance);
    ctx.registry().bind(ventilation.clone());
    let manager = EnergyManager::start(
        &ctx,
        ManagerConfig {
            interval: Duration::from_millis(20),
            maintenance: true,
        },
    )
    .unwrap();

    wait_for(&manager, |report| report.pass >= 3);
    assert!(ventilation.status_calls() >= 3);
    assert_eq!(ventilation.status(), ComponentStatus::Maintenance);
    manager.shutdown().unwrap();
}

#[test]
fn zero_interval_is_rejected() {
    let zero = ManagerConfig {
        interval: Duration::ZERO,
        maintenance: false,
    };
    let ctx = context();
    assert!(matches!(
        EnergyManager::start(&ctx, zero),
        Err(EnergyManagementError::Configuration(ConfigurationError::InvalidValue { .. }))
    ));

    let manager = EnergyManager::start(&ctx, config(false)).unwrap();
    assert!(manager.reconfigure(zero).is_err());
    assert_eq!(manager.interval(), Duration::from_secs(60));
    manager.shutdown().unwrap();

    let err = ManagerConfig::from_record(
        &ConfigRecord::new().with("maintenance", false).with("interval", 0_i64),
    )
    .unwrap_err();
    assert!(matches!(err, ConfigurationError::InvalidValue { .. }));
}
