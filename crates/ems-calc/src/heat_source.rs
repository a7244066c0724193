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

use ems_bus::{Channel, Value};
use ems_common::ComponentError;
use ems_core::ComponentType;
use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::info;

/// Auxiliary generator feeding heat into a storage, such as a cogenerator or heat pump.
pub trait HeatSource: Send + Sync {
    fn id(&self) -> &str;

    fn component_type(&self) -> ComponentType;

    /// Cumulative thermal energy produced so far, in kWh.
    fn thermal_energy(&self) -> Result<Value, ComponentError>;
}

/// Heat source backed by a cumulative energy channel.
pub struct ChannelHeatSource {
    id: String,
    kind: ComponentType,
    channel: Arc<Channel>,
}

impl ChannelHeatSource {
    pub fn new(id: impl Into<String>, kind: ComponentType, channel: Arc<Channel>) -> Self {
        Self {
            id: id.into(),
            kind,
            channel,
        }
    }
}

impl HeatSource for ChannelHeatSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn component_type(&self) -> ComponentType {
        self.kind
    }

    fn thermal_energy(&self) -> Result<Value, ComponentError> {
        let value = self.channel.latest();
        if value.as_f64().is_none() {
            return Err(ComponentError::unavailable(
                &self.id,
                format!("channel '{}' has no energy reading", self.channel.name()),
            ));
        }
        Ok(value)
    }
}

/// Heat sources currently bound to a storage, keyed by id.
///
/// Sources join and leave at runtime while the storage's timer reads them.
#[derive(Clone, Default)]
pub struct HeatSources {
    sources: Arc<RwLock<IndexMap<String, Arc<dyn HeatSource>>>>,
}

impl HeatSources {
    pub fn bind(&self, source: Arc<dyn HeatSource>) -> bool {
        let id = source.id().to_owned();
        let mut sources = self.sources.write();
        if sources.contains_key(&id) {
            return false;
        }
        info!(
            source = %id,
            "binding {} heat source",
            source.component_type().full_name()
        );
        sources.insert(id, source);
        true
    }

    pub fn unbind(&self, id: &str) -> Option<Arc<dyn HeatSource>> {
        let removed = self.sources.write().shift_remove(id);
        if removed.is_some() {
            info!(source = %id, "unbinding heat source");
        }
        removed
    }

    pub fn snapshot(&self) -> Vec<Arc<dyn HeatSource>> {
        self.sources.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.read().is_empty()
    }
}

impl std::fmt::Debug for HeatSources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.sources.read().keys()).finish()
    }
}
