//! Registry of the local device and the peers currently online

use meshware_core::{anonymize, device_id_from_uuid, DeviceInfo, EventBus};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
struct OnlineDevice {
    network_id: String,
    device_id: String,
}

/// uuid <-> networkId <-> deviceId of online peers, plus the local identity
pub struct DhContext {
    local: DeviceInfo,
    online: RwLock<HashMap<String, OnlineDevice>>,
    bus: Arc<EventBus>,
}

impl DhContext {
    pub fn new(local: DeviceInfo, bus: Arc<EventBus>) -> Self {
        Self {
            local,
            online: RwLock::new(HashMap::new()),
            bus,
        }
    }

    pub fn local_device(&self) -> &DeviceInfo {
        &self.local
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn add_online_device(&self, uuid: &str, network_id: &str) {
        info!(
            "Device online, uuid: {}, networkId: {}",
            anonymize(uuid),
            anonymize(network_id)
        );
        self.online.write().insert(
            uuid.to_string(),
            OnlineDevice {
                network_id: network_id.to_string(),
                device_id: device_id_from_uuid(uuid),
            },
        );
    }

    pub fn remove_online_device(&self, uuid: &str) {
        info!("Device offline, uuid: {}", anonymize(uuid));
        self.online.write().remove(uuid);
    }

    pub fn is_device_online(&self, uuid: &str) -> bool {
        self.online.read().contains_key(uuid)
    }

    pub fn online_count(&self) -> usize {
        self.online.read().len()
    }

    pub fn get_network_id_by_uuid(&self, uuid: &str) -> Option<String> {
        self.online.read().get(uuid).map(|d| d.network_id.clone())
    }

    pub fn get_uuid_by_network_id(&self, network_id: &str) -> Option<String> {
        self.online
            .read()
            .iter()
            .find(|(_, d)| d.network_id == network_id)
            .map(|(uuid, _)| uuid.clone())
    }

    /// Resolve the uuid of an online peer from its hashed device id
    pub fn get_uuid_by_device_id(&self, device_id: &str) -> Option<String> {
        self.online
            .read()
            .iter()
            .find(|(_, d)| d.device_id == device_id)
            .map(|(uuid, _)| uuid.clone())
    }
}
