//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Derived-value calculations for energy components."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Derived-value calculators: periodic ones driven by an aligned timer, such as
//! the thermal storage energy balance, and listener-driven relays.

pub mod calculator;
pub mod errors;
pub mod heat_source;
pub mod thermal_storage;
pub mod virtual_power;

pub use calculator::{Calculator, CalculatorTask, SampleStep, SampleTracker};
pub use errors::{CalculationError, Result};
pub use heat_source::{ChannelHeatSource, HeatSource, HeatSources};
pub use thermal_storage::{ThermalEnergyCalculator, ThermalEnergyStorage, ThermalStorageConfig};
pub use virtual_power::{VirtualPowerConfig, VirtualPowerRelay};
