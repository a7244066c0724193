//! ---
//! ems_section: "08-energy-models-optimization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Derived-value calculations for energy components."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use ems_bus::CollectionError;
use ems_common::{ComponentError, UnknownChannelError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CalculationError>;

#[derive(Debug, Error)]
pub enum CalculationError {
    #[error("source read failed: {0}")]
    Source(#[from] CollectionError),
    #[error(transparent)]
    Channel(#[from] UnknownChannelError),
    #[error("heat source {id} unavailable: {source}")]
    HeatSource {
        id: String,
        #[source]
        source: ComponentError,
    },
    #[error("channel '{0}' holds no numeric value")]
    NotNumeric(String),
}
