//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the core runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;

use thiserror::Error;

/// Malformed or missing configuration. Fatal for the unit being constructed.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("missing mandatory configuration field '{field}'")]
    MissingField { field: String },
    #[error("configuration field '{field}' expected {expected}, found {found}")]
    InvalidType {
        field: String,
        expected: &'static str,
        found: &'static str,
    },
    #[error("invalid value for configuration field '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
    #[error("unable to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("no configuration files found. inspected: {0}")]
    NotFound(String),
}

impl ConfigurationError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Reference to a channel name that was never declared on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown channel '{name}'")]
pub struct UnknownChannelError {
    pub name: String,
}

impl UnknownChannelError {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Failure raised by a component while changing status or accepting a schedule.
#[derive(Debug, Error)]
pub enum ComponentError {
    #[error("component {id} rejected the request: {reason}")]
    Rejected { id: String, reason: String },
    #[error("component {id} is unavailable: {reason}")]
    Unavailable { id: String, reason: String },
    #[error(transparent)]
    Channel(#[from] UnknownChannelError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
}

impl ComponentError {
    pub fn rejected(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn unavailable(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            id: id.into(),
            reason: reason.into(),
        }
    }
}

/// General failure at the orchestration boundary, surfaced to the immediate caller.
#[derive(Debug, Error)]
pub enum EnergyManagementError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Channel(#[from] UnknownChannelError),
    #[error(transparent)]
    Component(#[from] ComponentError),
    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
    #[error("metrics registration failed: {0}")]
    Metrics(String),
    #[error("{0}")]
    Inconsistent(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_error_wraps_channel_error() {
        let err: ComponentError = UnknownChannelError::new("temp_top").into();
        assert_eq!(err.to_string(), "unknown channel 'temp_top'");
        let top: EnergyManagementError = err.into();
        assert!(matches!(
            top,
            EnergyManagementError::Component(ComponentError::Channel(_))
        ));
    }

    #[test]
    fn missing_field_message_names_the_field() {
        let err = ConfigurationError::MissingField {
            field: "capacity".into(),
        };
        assert_eq!(
            err.to_string(),
            "missing mandatory configuration field 'capacity'"
        );
    }
}
