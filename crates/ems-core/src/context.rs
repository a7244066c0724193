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

use ems_bus::ChannelBus;
use ems_common::EnergyManagementError;
use ems_metrics::{CalculatorMetrics, ManagerMetrics, SharedRegistry};

use crate::registry::ComponentRegistry;
use crate::schedule::ScheduleStore;
use crate::wake::WakeSignal;

/// Shared services handed to the manager, the loader and every component.
///
/// Built once by the entry point; cloning shares the same underlying state.
#[derive(Clone, Debug)]
pub struct EmsContext {
    bus: Arc<ChannelBus>,
    registry: Arc<ComponentRegistry>,
    schedules: Arc<ScheduleStore>,
    wake: WakeSignal,
    metrics: Option<ContextMetrics>,
}

#[derive(Clone, Debug)]
struct ContextMetrics {
    registry: SharedRegistry,
    manager: ManagerMetrics,
    calculator: CalculatorMetrics,
}

impl EmsContext {
    pub fn new(bus: Arc<ChannelBus>) -> Self {
        let wake = WakeSignal::new();
        Self {
            bus,
            registry: Arc::new(ComponentRegistry::new(wake.clone())),
            schedules: Arc::new(ScheduleStore::new(wake.clone())),
            wake,
            metrics: None,
        }
    }

    /// Register manager and calculator metrics on `registry`.
    pub fn with_metrics(mut self, registry: SharedRegistry) -> Result<Self, EnergyManagementError> {
        let manager = ManagerMetrics::new(registry.clone())
            .map_err(|err| EnergyManagementError::Metrics(err.to_string()))?;
        let calculator = CalculatorMetrics::new(registry.clone())
            .map_err(|err| EnergyManagementError::Metrics(err.to_string()))?;
        self.metrics = Some(ContextMetrics {
            registry,
            manager,
            calculator,
        });
        Ok(self)
    }

    pub fn bus(&self) -> &Arc<ChannelBus> {
        &self.bus
    }

    pub fn registry(&self) -> &Arc<ComponentRegistry> {
        &self.registry
    }

    pub fn schedules(&self) -> &Arc<ScheduleStore> {
        &self.schedules
    }

    pub fn wake(&self) -> &WakeSignal {
        &self.wake
    }

    pub fn metrics_registry(&self) -> Option<SharedRegistry> {
        self.metrics.as_ref().map(|m| m.registry.clone())
    }

    pub fn manager_metrics(&self) -> Option<&ManagerMetrics> {
        self.metrics.as_ref().map(|m| &m.manager)
    }

    pub fn calculator_metrics(&self) -> Option<&CalculatorMetrics> {
        self.metrics.as_ref().map(|m| &m.calculator)
    }
}
