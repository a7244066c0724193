//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Primary orchestration and lifecycle management."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::component::Component;
use crate::wake::{WakeReason, WakeSignal};

/// Components currently known to the energy manager, keyed by id in bind order.
pub struct ComponentRegistry {
    components: RwLock<IndexMap<String, Arc<dyn Component>>>,
    wake: WakeSignal,
}

impl ComponentRegistry {
    pub fn new(wake: WakeSignal) -> Self {
        Self {
            components: RwLock::new(IndexMap::new()),
            wake,
        }
    }

    /// Insert `component` unless its id is already bound. Returns whether it was inserted.
    pub fn bind(&self, component: Arc<dyn Component>) -> bool {
        let id = component.id().to_owned();
        {
            let mut components = self.components.write();
            if components.contains_key(&id) {
                debug!(component = %id, "component already registered");
                return false;
            }
            info!(
                component = %id,
                kind = component.component_type().name(),
                "registering {}: {}",
                component.component_type().full_name(),
                id
            );
            components.insert(id, component);
        }
        self.wake.raise(WakeReason::RegistryChanged);
        true
    }

    pub fn unbind(&self, id: &str) -> Option<Arc<dyn Component>> {
        let removed = self.components.write().shift_remove(id);
        if let Some(component) = &removed {
            info!(
                component = %id,
                kind = component.component_type().name(),
                "deregistering {}: {}",
                component.component_type().full_name(),
                id
            );
        }
        removed
    }

    /// Point-in-time copy in bind order.
    pub fn snapshot(&self) -> Vec<Arc<dyn Component>> {
        self.components.read().values().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Component>> {
        self.components.read().get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        self.components.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.components.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.read().is_empty()
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("components", &self.ids())
            .finish()
    }
}
