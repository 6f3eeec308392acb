//! Watches source system abilities and restarts their components on death

use meshware_components::ComponentLoader;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

use crate::component_manager::ComponentManager;

pub struct ComponentMonitor {
    loader: Arc<ComponentLoader>,
    components: Weak<ComponentManager>,
    watched: Mutex<HashSet<i32>>,
}

impl ComponentMonitor {
    pub fn new(loader: Arc<ComponentLoader>, components: Weak<ComponentManager>) -> Self {
        Self {
            loader,
            components,
            watched: Mutex::new(HashSet::new()),
        }
    }

    pub fn add_sa_monitor(&self, sa_id: i32) {
        debug!("Watching system ability {}", sa_id);
        self.watched.lock().insert(sa_id);
    }

    pub fn remove_sa_monitor(&self, sa_id: i32) {
        self.watched.lock().remove(&sa_id);
    }

    pub fn is_monitored(&self, sa_id: i32) -> bool {
        self.watched.lock().contains(&sa_id)
    }

    pub(crate) fn clear(&self) {
        self.watched.lock().clear();
    }

    /// Schedule recovery of the component type behind `sa_id`.
    ///
    /// Returns false when the id is not watched or maps to no loaded type.
    pub fn on_system_ability_died(&self, sa_id: i32) -> bool {
        if !self.is_monitored(sa_id) {
            debug!("System ability {} died but is not watched", sa_id);
            return false;
        }
        let Some(dh_type) = self.loader.get_dh_type_by_source_sa_id(sa_id) else {
            warn!("No component type for system ability {}", sa_id);
            return false;
        };
        let Some(components) = self.components.upgrade() else {
            return false;
        };
        info!("Source {} (sa {}) died, recovering", dh_type, sa_id);
        tokio::spawn(async move {
            if let Err(e) = components.recover(dh_type).await {
                error!("Recovering {} failed: {}", dh_type, e);
            }
        });
        true
    }
}
