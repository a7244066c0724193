//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Primary orchestration and lifecycle management."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use ems_common::{ComponentError, ConfigRecord};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::schedule::Schedule;

/// Operating status assigned to a component.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Enabled,
    Disabled,
    Maintenance,
    Starting,
    Error,
}

/// Device category of a component.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ComponentType {
    Inverter,
    ElectricalEnergyStorage,
    ThermalEnergyStorage,
    Cogenerator,
    HeatPump,
    Ventilation,
    General,
}

impl ComponentType {
    /// Stable short name, e.g. `thermal-energy-storage`.
    pub fn name(self) -> &'static str {
        self.into()
    }

    /// Human readable name used in log lines.
    pub fn full_name(self) -> &'static str {
        match self {
            ComponentType::Inverter => "Inverter",
            ComponentType::ElectricalEnergyStorage => "Electrical Energy Storage",
            ComponentType::ThermalEnergyStorage => "Thermal Energy Storage",
            ComponentType::Cogenerator => "Cogenerator",
            ComponentType::HeatPump => "Heat Pump",
            ComponentType::Ventilation => "Ventilation",
            ComponentType::General => "General Component",
        }
    }
}

/// Contract every pluggable device-control unit fulfils.
///
/// Implementations are shared between the registry and the supervisor thread,
/// so status and schedule handling must use interior mutability.
pub trait Component: Send + Sync {
    fn id(&self) -> &str;

    fn component_type(&self) -> ComponentType;

    fn status(&self) -> ComponentStatus;

    fn set_status(&self, status: ComponentStatus) -> Result<(), ComponentError>;

    fn apply_schedule(&self, schedule: &Schedule) -> Result<(), ComponentError>;

    /// Called by the loader with the component's configuration record.
    fn on_activate(&self, _config: &ConfigRecord) -> Result<(), ComponentError> {
        Ok(())
    }

    /// Called by the loader before the component is dropped.
    fn on_deactivate(&self) -> Result<(), ComponentError> {
        Ok(())
    }
}
