//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Primary orchestration and lifecycle management."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Orchestration core of the energy manager: the component contract and
//! registry, the timestamp-versioned schedule store, and the supervisor loop
//! that reconciles component status and schedules on every wake.

pub mod component;
pub mod context;
pub mod manager;
pub mod registry;
pub mod schedule;
pub mod wake;

pub use component::{Component, ComponentStatus, ComponentType};
pub use context::EmsContext;
pub use manager::{EnergyManager, LoopState, ManagerConfig, PassReport};
pub use registry::ComponentRegistry;
pub use schedule::{ControlSchedule, Schedule, ScheduleStore};
pub use wake::{WakeReason, WakeSignal};
