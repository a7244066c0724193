//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Primary orchestration and lifecycle management."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ems_common::{
    ComponentError, ConfigurationError, EnergyManagementError, FieldSpec, FromConfig,
    ResolvedConfig,
};
use ems_metrics::ManagerMetrics;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use strum::Display;
use tracing::{debug, error, info, warn};

use crate::component::{Component, ComponentStatus};
use crate::context::EmsContext;
use crate::registry::ComponentRegistry;
use crate::schedule::{ControlSchedule, ScheduleStore};
use crate::wake::{WakeReason, WakeSignal};

const THREAD_NAME: &str = "ems-manager";
const DEFAULT_INTERVAL_MS: i64 = 1000;

/// Settings of the supervisor loop, read from the `[manager]` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfig {
    pub interval: Duration,
    pub maintenance: bool,
}

impl FromConfig for ManagerConfig {
    fn fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec::optional("interval", DEFAULT_INTERVAL_MS),
            FieldSpec::mandatory("maintenance"),
        ]
    }

    fn from_resolved(config: &ResolvedConfig) -> Result<Self, ConfigurationError> {
        let config = Self {
            interval: Duration::from_millis(config.get_u64("interval")?),
            maintenance: config.get_bool("maintenance")?,
        };
        config.validate()?;
        Ok(config)
    }
}

impl ManagerConfig {
    /// The loop needs an interval of at least one millisecond.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.interval < Duration::from_millis(1) {
            return Err(ConfigurationError::invalid(
                "interval",
                "must be at least one millisecond",
            ));
        }
        Ok(())
    }
}

/// Lifecycle of the supervisor thread. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum LoopState {
    Running,
    Stopping,
    Stopped,
}

/// Summary of one evaluation pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PassReport {
    pub pass: u64,
    /// Reasons that triggered the pass; empty for the pass run on start.
    pub reasons: Vec<WakeReason>,
    pub visited: usize,
    pub failures: Vec<String>,
    /// Timestamp of the schedule adopted during this pass.
    pub adopted: Option<i64>,
    pub maintenance: bool,
    /// Whether a shutdown request cut the pass short.
    pub abandoned: bool,
}

struct Passes {
    count: u64,
    last: Option<PassReport>,
}

struct Shared {
    registry: Arc<ComponentRegistry>,
    schedules: Arc<ScheduleStore>,
    wake: WakeSignal,
    metrics: Option<ManagerMetrics>,
    maintenance: AtomicBool,
    interval: Mutex<Duration>,
    state: Mutex<LoopState>,
    passes: Mutex<Passes>,
    pass_done: Condvar,
}

/// Control authority deciding the status and schedule of every registered component.
///
/// Runs its evaluation passes on a dedicated OS thread. Dropping the manager
/// shuts the thread down.
pub struct EnergyManager {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl EnergyManager {
    /// Spawn the supervisor thread and run the first pass immediately.
    pub fn start(context: &EmsContext, config: ManagerConfig) -> Result<Self, EnergyManagementError> {
        config.validate()?;
        let shared = Arc::new(Shared {
            registry: context.registry().clone(),
            schedules: context.schedules().clone(),
            wake: context.wake().clone(),
            metrics: context.manager_metrics().cloned(),
            maintenance: AtomicBool::new(config.maintenance),
            interval: Mutex::new(config.interval),
            state: Mutex::new(LoopState::Running),
            passes: Mutex::new(Passes {
                count: 0,
                last: None,
            }),
            pass_done: Condvar::new(),
        });
        if let Some(metrics) = &shared.metrics {
            metrics.set_maintenance(config.maintenance);
        }

        let worker = shared.clone();
        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_owned())
            .spawn(move || worker.run())
            .map_err(|source| EnergyManagementError::Spawn {
                name: THREAD_NAME.to_owned(),
                source,
            })?;

        info!(
            interval_ms = config.interval.as_millis() as u64,
            maintenance = config.maintenance,
            "energy manager started"
        );
        Ok(Self {
            shared,
            thread: Mutex::new(Some(handle)),
        })
    }

    pub fn set_maintenance(&self, enabled: bool) {
        self.shared.maintenance.store(enabled, Ordering::SeqCst);
        if let Some(metrics) = &self.shared.metrics {
            metrics.set_maintenance(enabled);
        }
        if enabled {
            info!("enabling maintenance mode");
        } else {
            info!("disabling maintenance mode");
        }
        self.shared.wake.raise(WakeReason::MaintenanceToggled);
    }

    pub fn maintenance(&self) -> bool {
        self.shared.maintenance.load(Ordering::SeqCst)
    }

    /// Apply new loop settings and trigger a pass. Invalid settings leave the loop untouched.
    pub fn reconfigure(&self, config: ManagerConfig) -> Result<(), EnergyManagementError> {
        config.validate()?;
        *self.shared.interval.lock() = config.interval;
        self.shared.maintenance.store(config.maintenance, Ordering::SeqCst);
        if let Some(metrics) = &self.shared.metrics {
            metrics.set_maintenance(config.maintenance);
        }
        info!(
            interval_ms = config.interval.as_millis() as u64,
            maintenance = config.maintenance,
            "energy manager reconfigured"
        );
        self.shared.wake.raise(WakeReason::Reconfigured);
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        *self.shared.interval.lock()
    }

    pub fn state(&self) -> LoopState {
        *self.shared.state.lock()
    }

    pub fn passes(&self) -> u64 {
        self.shared.passes.lock().count
    }

    pub fn last_pass(&self) -> Option<PassReport> {
        self.shared.passes.lock().last.clone()
    }

    /// Block until a pass numbered above `after` completes, or `timeout` elapses.
    pub fn wait_for_pass(&self, after: u64, timeout: Duration) -> Option<PassReport> {
        let deadline = Instant::now() + timeout;
        let mut passes = self.shared.passes.lock();
        while passes.count <= after {
            if self.shared.pass_done.wait_until(&mut passes, deadline).timed_out() {
                break;
            }
        }
        if passes.count > after {
            passes.last.clone()
        } else {
            None
        }
    }

    /// Stop the loop and join its thread. Later calls return immediately.
    pub fn shutdown(&self) -> Result<(), EnergyManagementError> {
        let handle = self.thread.lock().take();
        let Some(handle) = handle else {
            return Ok(());
        };
        {
            let mut state = self.shared.state.lock();
            if *state == LoopState::Running {
                *state = LoopState::Stopping;
            }
        }
        info!("stopping energy manager");
        self.shared.wake.raise(WakeReason::Shutdown);
        let joined = handle.join();
        *self.shared.state.lock() = LoopState::Stopped;
        // Release anyone still waiting for a pass.
        self.shared.pass_done.notify_all();
        joined.map_err(|_| {
            EnergyManagementError::Inconsistent("energy manager thread panicked".to_owned())
        })
    }
}

impl Drop for EnergyManager {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            error!(error = %err, "energy manager shutdown failed");
        }
    }
}

impl std::fmt::Debug for EnergyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnergyManager")
            .field("state", &self.state())
            .field("maintenance", &self.maintenance())
            .field("passes", &self.passes())
            .finish()
    }
}

impl Shared {
    fn run(&self) {
        info!("starting energy management loop");
        let mut reasons = Vec::new();
        while !self.wake.is_shutdown() {
            self.evaluate(reasons);
            let interval = *self.interval.lock();
            reasons = self.wake.wait(interval);
            if reasons.contains(&WakeReason::Shutdown) {
                break;
            }
            debug!(?reasons, "energy manager woke");
        }
        *self.state.lock() = LoopState::Stopped;
        info!("energy management loop stopped");
    }

    fn evaluate(&self, reasons: Vec<WakeReason>) {
        let started = Instant::now();
        let adopted = self.schedules.adopt();
        let active = self.schedules.active();
        let schedule_changed = adopted.is_some();
        let maintenance = self.maintenance.load(Ordering::SeqCst);
        let components = self.registry.snapshot();

        let mut visited = 0;
        let mut failures = Vec::new();
        let mut abandoned = false;
        for component in &components {
            if self.wake.is_shutdown() {
                abandoned = true;
                break;
            }
            visited += 1;
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                evaluate_component(component.as_ref(), maintenance, schedule_changed, &active)
            }));
            let id = component.id();
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(component = %id, error = %err, "error while handling component");
                    failures.push(id.to_owned());
                }
                Err(_) => {
                    error!(component = %id, "component panicked during evaluation");
                    failures.push(id.to_owned());
                }
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.observe_pass(started.elapsed().as_secs_f64());
            metrics.set_registered(components.len());
            metrics.set_active_schedule(active.timestamp());
            for id in &failures {
                metrics.record_failure(id);
            }
        }

        let mut passes = self.passes.lock();
        passes.count += 1;
        let report = PassReport {
            pass: passes.count,
            reasons,
            visited,
            failures,
            adopted: adopted.map(|schedule| schedule.timestamp()),
            maintenance,
            abandoned,
        };
        debug!(
            pass = report.pass,
            visited = report.visited,
            failures = report.failures.len(),
            abandoned = report.abandoned,
            "evaluation pass complete"
        );
        passes.last = Some(report);
        self.pass_done.notify_all();
    }
}

fn evaluate_component(
    component: &dyn Component,
    maintenance: bool,
    schedule_changed: bool,
    active: &ControlSchedule,
) -> Result<(), ComponentError> {
    // Maintenance is reasserted on every pass, whatever the component reports.
    if maintenance {
        component.set_status(ComponentStatus::Maintenance)?;
        return Ok(());
    }
    if component.status() != ComponentStatus::Enabled {
        component.set_status(ComponentStatus::Enabled)?;
    }
    if schedule_changed {
        if let Some(schedule) = active.get(component.id()) {
            component.apply_schedule(schedule)?;
        }
    }
    Ok(())
}
