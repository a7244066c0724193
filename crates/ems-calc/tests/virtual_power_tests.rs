//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Derived-value calculations for energy components."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use ems_bus::{ChannelBus, Value};
use ems_calc::{VirtualPowerConfig, VirtualPowerRelay};
use ems_common::{ComponentError, ConfigRecord};
use ems_core::{Component, ComponentStatus};

fn bus() -> Arc<ChannelBus> {
    let bus = Arc::new(ChannelBus::new());
    bus.declare_all(["ext_enabled", "pv_power", "grid_power", "virtual_power"]);
    bus
}

fn record() -> ConfigRecord {
    ConfigRecord::new()
        .with("enabled", "ext_enabled")
        .with("pv_power", "pv_power")
        .with("actual_power", "grid_power")
        .with("virtual_power", "virtual_power")
}

#[test]
fn publishes_actual_minus_pv_while_enabled() {
    let bus = bus();
    let relay = VirtualPowerRelay::new("inv-1", bus.clone());
    relay.on_activate(&record()).unwrap();
    assert_eq!(bus.latest("ext_enabled").unwrap().as_bool(), Some(true));

    bus.publish("pv_power", Value::double(1500.0, 10)).unwrap();
    bus.publish("grid_power", Value::double(4000.0, 20)).unwrap();
    assert_eq!(bus.latest("virtual_power").unwrap(), Value::double(2500.0, 20));
    assert_eq!(relay.pv(), Value::double(1500.0, 10));
}

#[test]
fn pv_defaults_to_zero_until_reported() {
    let bus = bus();
    let relay = VirtualPowerRelay::new("inv-1", bus.clone());
    relay.on_activate(&record()).unwrap();
    bus.publish("grid_power", Value::double(800.0, 5)).unwrap();
    assert_eq!(bus.latest("virtual_power").unwrap(), Value::double(800.0, 5));
}

#[test]
fn disabled_flag_pauses_relay() {
    let bus = bus();
    let relay = VirtualPowerRelay::new("inv-1", bus.clone());
    relay.on_activate(&record()).unwrap();

    bus.publish("ext_enabled", Value::boolean(false, 1)).unwrap();
    assert!(!relay.is_enabled());
    bus.publish("grid_power", Value::double(100.0, 2)).unwrap();
    assert!(bus.latest("virtual_power").unwrap().is_unknown());

    relay.set_status(ComponentStatus::Enabled).unwrap();
    assert!(relay.is_enabled());
    bus.publish("grid_power", Value::double(100.0, 3)).unwrap();
    assert_eq!(bus.latest("virtual_power").unwrap(), Value::double(100.0, 3));

    relay.set_status(ComponentStatus::Maintenance).unwrap();
    assert_eq!(bus.latest("ext_enabled").unwrap().as_bool(), Some(false));
}

#[test]
fn deactivation_deregisters_listeners() {
    let bus = bus();
    let relay = VirtualPowerRelay::new("inv-1", bus.clone());
    relay.on_activate(&record()).unwrap();
    assert_eq!(bus.channel("grid_power").unwrap().listener_count(), 1);

    relay.on_deactivate().unwrap();
    assert_eq!(bus.channel("grid_power").unwrap().listener_count(), 0);
    bus.publish("grid_power", Value::double(100.0, 2)).unwrap();
    assert!(bus.latest("virtual_power").unwrap().is_unknown());
    assert!(matches!(
        relay.set_status(ComponentStatus::Enabled),
        Err(ComponentError::Unavailable { .. })
    ));
}

#[test]
fn undeclared_channel_fails_activation() {
    let bus = Arc::new(ChannelBus::new());
    bus.declare("ext_enabled");
    let relay = VirtualPowerRelay::new("inv-1", bus);
    let config = VirtualPowerConfig {
        enabled: "ext_enabled".into(),
        pv_power: "pv_power".into(),
        actual_power: "grid_power".into(),
        virtual_power: "virtual_power".into(),
    };
    let err = relay.activate(&config).unwrap_err();
    assert!(matches!(err, ComponentError::Channel(ref missing) if missing.name == "pv_power"));
}
