//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Derived-value calculations for energy components."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ems_bus::{Channel, ChannelBus, ListenerHandle, Value};
use ems_common::{
    ComponentError, ConfigRecord, ConfigurationError, FieldSpec, FromConfig, ResolvedConfig,
};
use ems_core::{Component, ComponentStatus, ComponentType, Schedule};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

/// Channel names wired into a [`VirtualPowerRelay`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualPowerConfig {
    pub enabled: String,
    pub pv_power: String,
    pub actual_power: String,
    pub virtual_power: String,
}

impl FromConfig for VirtualPowerConfig {
    fn fields() -> Vec<FieldSpec> {
        vec![
            FieldSpec::mandatory("enabled"),
            FieldSpec::mandatory("pv_power"),
            FieldSpec::mandatory("actual_power"),
            FieldSpec::mandatory("virtual_power"),
        ]
    }

    fn from_resolved(config: &ResolvedConfig) -> Result<Self, ConfigurationError> {
        Ok(Self {
            enabled: config.get_str("enabled")?.to_owned(),
            pv_power: config.get_str("pv_power")?.to_owned(),
            actual_power: config.get_str("actual_power")?.to_owned(),
            virtual_power: config.get_str("virtual_power")?.to_owned(),
        })
    }
}

struct RelayState {
    enabled: AtomicBool,
    pv: RwLock<Value>,
    enabled_channel: Arc<Channel>,
    virtual_channel: Arc<Channel>,
}

/// Listener-driven calculator publishing `actual − pv` as a virtual grid power.
///
/// Runs on the publishing thread of the actual power channel. While disabled,
/// actual power samples are ignored.
pub struct VirtualPowerRelay {
    id: String,
    bus: Arc<ChannelBus>,
    status: Mutex<ComponentStatus>,
    state: Mutex<Option<Arc<RelayState>>>,
    listeners: Mutex<Vec<ListenerHandle>>,
}

impl VirtualPowerRelay {
    pub fn new(id: impl Into<String>, bus: Arc<ChannelBus>) -> Self {
        Self {
            id: id.into(),
            bus,
            status: Mutex::new(ComponentStatus::Starting),
            state: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Resolve the channels and register the listeners. The relay starts enabled.
    pub fn activate(&self, config: &VirtualPowerConfig) -> Result<(), ComponentError> {
        let mut current = self.state.lock();
        if current.is_some() {
            return Err(ComponentError::rejected(&self.id, "already activated"));
        }
        let enabled_channel = self.bus.channel(&config.enabled)?;
        let pv_channel = self.bus.channel(&config.pv_power)?;
        let actual_channel = self.bus.channel(&config.actual_power)?;
        let virtual_channel = self.bus.channel(&config.virtual_power)?;

        let state = Arc::new(RelayState {
            enabled: AtomicBool::new(true),
            pv: RwLock::new(pv_channel.latest()),
            enabled_channel: enabled_channel.clone(),
            virtual_channel,
        });

        let mut handles = Vec::with_capacity(3);
        let flag = state.clone();
        handles.push(enabled_channel.subscribe(move |value| {
            if let Some(enabled) = value.as_bool() {
                flag.enabled.store(enabled, Ordering::SeqCst);
            }
            Ok(())
        }));
        let pv = state.clone();
        handles.push(pv_channel.subscribe(move |value| {
            *pv.pv.write() = value.clone();
            Ok(())
        }));
        let relay = state.clone();
        let id = self.id.clone();
        handles.push(actual_channel.subscribe(move |value| {
            if !relay.enabled.load(Ordering::SeqCst) {
                return Ok(());
            }
            let Some(actual) = value.as_f64() else {
                return Ok(());
            };
            let pv = relay.pv.read().as_f64().unwrap_or(0.0);
            let virtual_power = Value::double(actual - pv, value.timestamp());
            debug!(component = %id, value = %virtual_power, "virtual power updated");
            relay.virtual_channel.publish(virtual_power);
            Ok(())
        }));

        *self.listeners.lock() = handles;
        enabled_channel.publish(Value::boolean_now(true));
        *current = Some(state);
        info!(component = %self.id, "virtual power relay activated");
        Ok(())
    }

    pub fn deactivate(&self) {
        for handle in self.listeners.lock().drain(..) {
            handle.deregister();
        }
        if self.state.lock().take().is_some() {
            info!(component = %self.id, "virtual power relay deactivated");
        }
    }

    /// Publish the flag on the enabled channel; the relay follows it.
    pub fn set_enabled(&self, enabled: bool) -> Result<(), ComponentError> {
        let state = self
            .state
            .lock()
            .clone()
            .ok_or_else(|| ComponentError::unavailable(&self.id, "relay is not activated"))?;
        state.enabled.store(enabled, Ordering::SeqCst);
        state.enabled_channel.publish(Value::boolean_now(enabled));
        Ok(())
    }

    pub fn is_enabled(&self) -> bool {
        self.state
            .lock()
            .as_ref()
            .map(|state| state.enabled.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Latest PV power seen by the relay.
    pub fn pv(&self) -> Value {
        self.state
            .lock()
            .as_ref()
            .map(|state| state.pv.read().clone())
            .unwrap_or_default()
    }
}

impl Component for VirtualPowerRelay {
    fn id(&self) -> &str {
        &self.id
    }

    fn component_type(&self) -> ComponentType {
        ComponentType::Inverter
    }

    fn status(&self) -> ComponentStatus {
        *self.status.lock()
    }

    /// Only `Enabled` lets the relay publish; every other status pauses it.
    fn set_status(&self, status: ComponentStatus) -> Result<(), ComponentError> {
        self.set_enabled(status == ComponentStatus::Enabled)?;
        *self.status.lock() = status;
        Ok(())
    }

    fn apply_schedule(&self, schedule: &Schedule) -> Result<(), ComponentError> {
        debug!(component = %self.id, setpoints = schedule.len(), "schedule received");
        Ok(())
    }

    fn on_activate(&self, record: &ConfigRecord) -> Result<(), ComponentError> {
        let config = VirtualPowerConfig::from_record(record)?;
        self.activate(&config)
    }

    fn on_deactivate(&self) -> Result<(), ComponentError> {
        self.deactivate();
        Ok(())
    }
}

impl Drop for VirtualPowerRelay {
    fn drop(&mut self) {
        self.deactivate();
    }
}
