//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Runtime helpers supporting the energy manager."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Wall-clock aligned scheduling helpers for the EMS runtime.

pub mod scheduling;

pub use scheduling::{AlignedSchedule, AlignedTicker};
