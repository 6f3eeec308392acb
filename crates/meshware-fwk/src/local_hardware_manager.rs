//! Publishes the local device's hardware as capabilities

use meshware_components::{ComponentLoader, DhItem, HardwareHandler, PluginListener};
use meshware_core::{anonymize, capability_key, CapabilityInfo, DeviceInfo, DhType};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::capability_info_manager::CapabilityInfoManager;

pub struct LocalHardwareManager {
    loader: Arc<ComponentLoader>,
    capabilities: Arc<CapabilityInfoManager>,
    local: DeviceInfo,
    plugged: Mutex<BTreeMap<DhType, Arc<dyn HardwareHandler>>>,
}

impl LocalHardwareManager {
    pub fn new(
        loader: Arc<ComponentLoader>,
        capabilities: Arc<CapabilityInfoManager>,
        local: DeviceInfo,
    ) -> Self {
        Self {
            loader,
            capabilities,
            local,
            plugged: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn init(&self) {
        info!("LocalHardwareManager init");
        for dh_type in self.loader.get_all_comp_types() {
            let Some(handler) = self.loader.get_hardware_handler(dh_type) else {
                continue;
            };
            if let Err(e) = handler.initialize() {
                error!("Hardware handler of {} failed to initialize: {}", dh_type, e);
                continue;
            }
            let items = handler.query();
            info!("{} reports {} local items", dh_type, items.len());
            add_local_capabilities(&self.capabilities, &self.local, dh_type, items);

            if handler.is_support_plugin() {
                let listener = Arc::new(HardwarePlugListener {
                    dh_type,
                    local: self.local.clone(),
                    capabilities: self.capabilities.clone(),
                });
                handler.register_plugin_listener(listener);
                self.plugged.lock().insert(dh_type, handler);
            }
        }
    }

    pub fn uninit(&self) {
        info!("LocalHardwareManager uninit");
        let handlers = std::mem::take(&mut *self.plugged.lock());
        for handler in handlers.values() {
            handler.unregister_plugin_listener();
        }
    }
}

fn local_capability(local: &DeviceInfo, dh_type: DhType, dh_id: &str, attrs: &str) -> CapabilityInfo {
    CapabilityInfo::new(
        dh_id,
        local.device_id.clone(),
        local.device_name.clone(),
        local.device_type,
        dh_type,
        attrs,
    )
}

fn add_local_capabilities(
    capabilities: &CapabilityInfoManager,
    local: &DeviceInfo,
    dh_type: DhType,
    items: Vec<DhItem>,
) {
    let caps: Vec<CapabilityInfo> = items
        .iter()
        .map(|item| local_capability(local, dh_type, &item.dh_id, &item.attrs))
        .collect();
    if let Err(e) = capabilities.add_capability(caps) {
        error!("Publishing local {} capabilities failed: {}", dh_type, e);
    }
}

/// Mirrors hot-plug events of one handler into the capability registry
struct HardwarePlugListener {
    dh_type: DhType,
    local: DeviceInfo,
    capabilities: Arc<CapabilityInfoManager>,
}

impl PluginListener for HardwarePlugListener {
    fn plugin_hardware(&self, dh_id: &str, attrs: &str) {
        info!("Plugged {} {}", self.dh_type, anonymize(dh_id));
        let cap = local_capability(&self.local, self.dh_type, dh_id, attrs);
        if let Err(e) = self.capabilities.add_capability(vec![cap]) {
            warn!("Adding plugged hardware failed: {}", e);
        }
    }

    fn unplug_hardware(&self, dh_id: &str) {
        info!("Unplugged {} {}", self.dh_type, anonymize(dh_id));
        let key = capability_key(&self.local.device_id, dh_id);
        if let Err(e) = self.capabilities.remove_capability_info_by_key(&key) {
            warn!("Removing unplugged hardware failed: {}", e);
        }
    }
}
