//! Application state management

use anyhow::Result;
use meshware_components::DylibLoader;
use meshware_core::{DeviceInfo, EventBus};
use meshware_fwk::{DistributedHardwareManagerFactory, ManagerOptions};
use meshware_store::MemoryStoreProvider;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;

/// Shared application state
pub struct AppState {
    /// Online/offline façade over the framework
    pub factory: DistributedHardwareManagerFactory,
    /// Store partitions; replication ingress writes remote changes here
    pub store: Arc<MemoryStoreProvider>,
    /// Event bus shared with the framework
    pub bus: Arc<EventBus>,
    /// Configuration
    pub config: Config,
}

impl AppState {
    /// Create new application state. Must run inside the Tokio runtime.
    pub fn new(config: Config) -> Result<Arc<Self>> {
        let local = local_device(&config);
        info!(
            device_id = %meshware_core::anonymize(&local.device_id),
            name = %local.device_name,
            "Local device"
        );

        let store = Arc::new(MemoryStoreProvider::new());
        let bus = EventBus::start();
        let options = ManagerOptions {
            config: config.to_fwk_config(),
            local,
            manifest_path: config.components.manifest.clone(),
            modules: Arc::new(DylibLoader::new(config.components.module_dir.clone())),
            store: store.clone(),
        };
        let factory = DistributedHardwareManagerFactory::new(options, bus.clone());

        Ok(Arc::new(Self {
            factory,
            store,
            bus,
            config,
        }))
    }
}

fn local_device(config: &Config) -> DeviceInfo {
    let uuid = if config.local_device.uuid.is_empty() {
        let generated = uuid::Uuid::new_v4().to_string();
        warn!("No local uuid configured, using a random one for this run");
        generated
    } else {
        config.local_device.uuid.clone()
    };
    DeviceInfo::new(uuid, config.local_device.name.clone(), config.local_device.device_type)
}
