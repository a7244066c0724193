//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Component activation for the EMS daemon."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use ems_calc::{ChannelHeatSource, ThermalEnergyStorage, VirtualPowerRelay};
use ems_common::{
    AppConfig, ConfigRecord, ConfigurationError, FieldSpec, FromConfig, ResolvedConfig,
};
use ems_core::{Component, ComponentType, EmsContext};
use indexmap::IndexMap;
use tokio::runtime::Handle;
use tracing::{info, warn};

/// Cumulative energy channel of an auxiliary generator and the storage it heats.
#[derive(Debug, Clone, PartialEq, Eq)]
struct HeatSourceConfig {
    energy: String,
    storage: String,
}

impl FromConfig for HeatSourceConfig {
    fn fields() -> Vec<FieldSpec> {
        vec![FieldSpec::mandatory("energy"), FieldSpec::mandatory("storage")]
    }

    fn from_resolved(config: &ResolvedConfig) -> Result<Self, ConfigurationError> {
        Ok(Self {
            energy: config.get_str("energy")?.to_owned(),
            storage: config.get_str("storage")?.to_owned(),
        })
    }
}

/// Components activated from the `[components]` section.
#[derive(Default)]
pub struct LoadedComponents {
    storages: IndexMap<String, Arc<ThermalEnergyStorage>>,
    relays: IndexMap<String, Arc<VirtualPowerRelay>>,
    heat_sources: Vec<(String, String)>,
}

impl LoadedComponents {
    pub fn len(&self) -> usize {
        self.storages.len() + self.relays.len()
    }

    /// Activate every configured component and bind it to the registry.
    ///
    /// Storages come first so that heat sources can attach to them. On error,
    /// whatever was already activated is unbound and deactivated again.
    pub fn activate(config: &AppConfig, context: &EmsContext, runtime: Handle) -> Result<Self> {
        let mut loaded = Self::default();
        if let Err(err) = loaded.activate_all(config, context, runtime) {
            loaded.abandon(context);
            return Err(err);
        }
        Ok(loaded)
    }

    fn activate_all(
        &mut self,
        config: &AppConfig,
        context: &EmsContext,
        runtime: Handle,
    ) -> Result<()> {
        let mut deferred = Vec::new();

        for (id, record) in &config.components {
            let kind = component_kind(config, id)?;
            match kind {
                ComponentType::ThermalEnergyStorage => {
                    let storage = Arc::new(ThermalEnergyStorage::new(id, context, runtime.clone()));
                    storage
                        .on_activate(record)
                        .with_context(|| format!("activating thermal storage '{id}'"))?;
                    self.storages.insert(id.clone(), storage.clone());
                    self.bind(context, storage)?;
                }
                ComponentType::Inverter => {
                    let relay = Arc::new(VirtualPowerRelay::new(id, context.bus().clone()));
                    relay
                        .on_activate(record)
                        .with_context(|| format!("activating virtual power relay '{id}'"))?;
                    self.relays.insert(id.clone(), relay.clone());
                    self.bind(context, relay)?;
                }
                ComponentType::Cogenerator | ComponentType::HeatPump => {
                    deferred.push((id, kind, record));
                }
                other => {
                    warn!(component = %id, kind = %other, "no loader for component type; skipping");
                }
            }
        }

        for (id, kind, record) in deferred {
            self.attach_heat_source(context, id, kind, record)?;
        }
        Ok(())
    }

    fn abandon(self, context: &EmsContext) {
        for (storage, source) in &self.heat_sources {
            if let Some(storage) = self.storages.get(storage) {
                storage.unbind_heat_source(source);
            }
        }
        for (id, relay) in &self.relays {
            context.registry().unbind(id);
            relay.deactivate();
        }
        for (id, storage) in &self.storages {
            context.registry().unbind(id);
            if let Err(err) = storage.on_deactivate() {
                warn!(component = %id, error = %err, "storage deactivation failed");
            }
        }
        warn!("component activation abandoned");
    }

    fn bind(&self, context: &EmsContext, component: Arc<dyn Component>) -> Result<()> {
        let id = component.id().to_owned();
        if !context.registry().bind(component) {
            bail!("component '{id}' is already registered");
        }
        Ok(())
    }

    fn attach_heat_source(
        &mut self,
        context: &EmsContext,
        id: &str,
        kind: ComponentType,
        record: &ConfigRecord,
    ) -> Result<()> {
        let config = HeatSourceConfig::from_record(record)
            .with_context(|| format!("configuring heat source '{id}'"))?;
        let storage = self.storages.get(&config.storage).ok_or_else(|| {
            anyhow!("heat source '{id}' refers to unknown storage '{}'", config.storage)
        })?;
        let channel = context.bus().channel(&config.energy)?;
        if !storage.bind_heat_source(Arc::new(ChannelHeatSource::new(id, kind, channel))) {
            bail!("heat source '{id}' is already bound to '{}'", config.storage);
        }
        self.heat_sources.push((config.storage, id.to_owned()));
        Ok(())
    }

    /// Unbind and deactivate everything in reverse activation order.
    pub async fn shutdown(self, context: &EmsContext) {
        for (storage, source) in self.heat_sources.iter().rev() {
            if let Some(storage) = self.storages.get(storage) {
                storage.unbind_heat_source(source);
            }
        }
        for (id, relay) in self.relays.iter().rev() {
            context.registry().unbind(id);
            if let Err(err) = relay.on_deactivate() {
                warn!(component = %id, error = %err, "relay deactivation failed");
            }
        }
        for (id, storage) in self.storages.iter().rev() {
            context.registry().unbind(id);
            storage.shutdown().await;
        }
        info!("components deactivated");
    }
}

fn component_kind(config: &AppConfig, id: &str) -> Result<ComponentType> {
    let name = config
        .component_type(id)
        .ok_or_else(|| anyhow!("component '{id}' has no type"))?;
    ComponentType::from_str(name)
        .map_err(|_| anyhow!("component '{id}' has unknown type '{name}'"))
}
