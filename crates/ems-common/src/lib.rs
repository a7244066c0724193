//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the core runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Core shared primitives for the energy management workspace.
//! This crate exposes the error taxonomy, configuration records and their
//! field-spec validation, logging setup, and time helpers consumed across
//! the workspace.

pub mod config;
pub mod error;
pub mod logging;
pub mod time;

pub use config::{
    validate, AppConfig, ConfigRecord, ConfigValue, FieldSpec, FromConfig, LoggingConfig,
    MetricsConfig, ResolvedConfig,
};
pub use error::{ComponentError, ConfigurationError, EnergyManagementError, UnknownChannelError};
pub use logging::{init_tracing, LogFormat};
