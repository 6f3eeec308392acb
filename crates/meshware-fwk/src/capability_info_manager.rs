//! Capability registry: in-memory cache mirrored in the `dh_capability` partition
//!
//! Remote inserts become Enable tasks and remote deletes become Disable
//! tasks. Updates only refresh the cache.

use meshware_core::{
    anonymize, capability_key, is_key_of_device, BusEvent, CapabilityInfo, DhType, EventBus,
    TaskParam, TaskType,
};
use meshware_store::{
    ChangeNotification, DbAdapter, DbAdapterConfig, Entry, StoreError, StoreObserver,
    StoreProvider,
};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::context::DhContext;
use crate::error::{FwkError, Result};
use crate::task_executor::TaskDispatcher;

pub const APP_ID: &str = "dtbhardware_manager_service";
pub const CAPABILITY_STORE_ID: &str = "dh_capability";

pub struct CapabilityInfoManager {
    context: Arc<DhContext>,
    dispatcher: Arc<TaskDispatcher>,
    provider: Arc<dyn StoreProvider>,
    store_config: DbAdapterConfig,
    infos: RwLock<BTreeMap<String, CapabilityInfo>>,
    adapter: RwLock<Option<Arc<DbAdapter>>>,
    recover_listener: Mutex<Option<JoinHandle<()>>>,
    me: Weak<CapabilityInfoManager>,
}

impl CapabilityInfoManager {
    pub fn new(
        context: Arc<DhContext>,
        dispatcher: Arc<TaskDispatcher>,
        provider: Arc<dyn StoreProvider>,
        store_config: DbAdapterConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            context,
            dispatcher,
            provider,
            store_config,
            infos: RwLock::new(BTreeMap::new()),
            adapter: RwLock::new(None),
            recover_listener: Mutex::new(None),
            me: me.clone(),
        })
    }

    fn bus(&self) -> &Arc<EventBus> {
        self.context.bus()
    }

    fn adapter(&self) -> Result<Arc<DbAdapter>> {
        self.adapter
            .read()
            .clone()
            .ok_or(FwkError::Store(StoreError::NotOpen))
    }

    pub async fn init(&self) -> Result<()> {
        info!("CapabilityInfoManager init");
        let listener: Weak<dyn StoreObserver> = self.me.clone();
        let adapter = DbAdapter::new(
            APP_ID,
            CAPABILITY_STORE_ID,
            self.provider.clone(),
            listener,
            self.bus().clone(),
            self.store_config.clone(),
        );
        adapter.init().await?;
        *self.adapter.write() = Some(adapter);

        let mut events = self.bus().subscribe();
        let me = self.me.clone();
        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(BusEvent::StoreRecovered { store_id }) if store_id == CAPABILITY_STORE_ID => {
                        let Some(manager) = me.upgrade() else { break };
                        if let Err(e) = manager.sync_remote_capability_infos() {
                            warn!("Resync capabilities after store recovery failed: {}", e);
                        }
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        });
        *self.recover_listener.lock() = Some(handle);
        Ok(())
    }

    pub fn uninit(&self) {
        info!("CapabilityInfoManager uninit");
        if let Some(handle) = self.recover_listener.lock().take() {
            handle.abort();
        }
        if let Some(adapter) = self.adapter.write().take() {
            adapter.uninit();
        }
        self.infos.write().clear();
    }

    /// Load the records under `prefix` from the store into the cache
    pub fn sync_device_info_from_db(&self, prefix: &str) -> Result<()> {
        let values = self.adapter()?.get_data_by_key_prefix(prefix)?;
        let mut infos = self.infos.write();
        for value in values {
            match CapabilityInfo::from_json_str(&value) {
                Ok(cap) => {
                    infos.insert(cap.key(), cap);
                }
                Err(e) => warn!("Skipping bad capability record: {}", e),
            }
        }
        debug!("Synced capabilities under {} from store", anonymize(prefix));
        Ok(())
    }

    /// Reload every peer record from the store
    pub fn sync_remote_capability_infos(&self) -> Result<()> {
        let values = self.adapter()?.get_data_by_key_prefix("")?;
        let local_device_id = &self.context.local_device().device_id;
        let mut infos = self.infos.write();
        for value in values {
            let cap = match CapabilityInfo::from_json_str(&value) {
                Ok(cap) => cap,
                Err(e) => {
                    warn!("Skipping bad capability record: {}", e);
                    continue;
                }
            };
            if &cap.device_id == local_device_id {
                continue;
            }
            infos.insert(cap.key(), cap);
        }
        Ok(())
    }

    /// Upsert the cache and write changed records to the store in one batch
    pub fn add_capability(&self, caps: Vec<CapabilityInfo>) -> Result<()> {
        if caps.is_empty() {
            return Ok(());
        }
        let adapter = self.adapter()?;
        let mut keys = Vec::new();
        let mut values = Vec::new();
        {
            let mut infos = self.infos.write();
            for cap in caps {
                let key = cap.key();
                let unchanged = is_key_of_device(&key, &cap.device_id)
                    && adapter
                        .get_data_by_key(&key)
                        .is_ok_and(|stored| cap.matches_json(&stored));
                if unchanged {
                    debug!("Capability {} unchanged", cap.anonymous_key());
                } else {
                    keys.push(key.clone());
                    values.push(cap.to_json_string());
                }
                infos.insert(key, cap);
            }
        }
        if keys.is_empty() {
            return Ok(());
        }
        info!("Writing {} capability records", keys.len());
        adapter.put_data_batch(&keys, &values)?;
        Ok(())
    }

    pub fn add_capability_in_mem(&self, caps: Vec<CapabilityInfo>) {
        let mut infos = self.infos.write();
        for cap in caps {
            infos.insert(cap.key(), cap);
        }
    }

    /// Drop every record of a device, memory first
    pub fn remove_capability_info_in_db(&self, device_id: &str) -> Result<()> {
        self.remove_capability_info_in_mem(device_id);
        self.adapter()?.remove_device_data(device_id)?;
        Ok(())
    }

    pub fn remove_capability_info_by_key(&self, key: &str) -> Result<()> {
        info!("Remove capability {}", anonymize(key));
        self.infos.write().remove(key);
        self.adapter()?.remove_data_by_key(key)?;
        Ok(())
    }

    pub fn remove_capability_info_in_mem(&self, device_id: &str) {
        let mut infos = self.infos.write();
        let before = infos.len();
        infos.retain(|key, _| !is_key_of_device(key, device_id));
        debug!(
            "Removed {} cached capabilities of {}",
            before - infos.len(),
            anonymize(device_id)
        );
    }

    pub fn has_capability(&self, device_id: &str, dh_id: &str) -> bool {
        self.infos
            .read()
            .contains_key(&capability_key(device_id, dh_id))
    }

    pub fn get_capability(&self, device_id: &str, dh_id: &str) -> Result<CapabilityInfo> {
        let key = capability_key(device_id, dh_id);
        self.infos
            .read()
            .get(&key)
            .cloned()
            .ok_or_else(|| FwkError::NotFound(format!("capability {}", anonymize(&key))))
    }

    /// Store lookup, bypassing the cache
    pub fn get_data_by_key(&self, key: &str) -> Result<CapabilityInfo> {
        let value = self.adapter()?.get_data_by_key(key)?;
        CapabilityInfo::from_json_str(&value)
            .map_err(|e| FwkError::Store(StoreError::InvalidData(e.to_string())))
    }

    /// Store prefix lookup, bypassing the cache
    pub fn get_data_by_key_prefix(&self, prefix: &str) -> Result<Vec<CapabilityInfo>> {
        let values = self.adapter()?.get_data_by_key_prefix(prefix)?;
        Ok(values
            .iter()
            .filter_map(|v| CapabilityInfo::from_json_str(v).ok())
            .collect())
    }

    pub fn get_capabilities_by_device_id(&self, device_id: &str) -> Vec<CapabilityInfo> {
        self.infos
            .read()
            .iter()
            .filter(|(key, _)| is_key_of_device(key, device_id))
            .map(|(_, cap)| cap.clone())
            .collect()
    }

    pub fn get_data_by_dh_type(&self, dh_type: DhType) -> Vec<CapabilityInfo> {
        self.infos
            .read()
            .values()
            .filter(|cap| cap.dh_type == dh_type)
            .cloned()
            .collect()
    }

    pub fn dump_capability_infos(&self) -> Vec<CapabilityInfo> {
        self.infos.read().values().cloned().collect()
    }

    pub fn manual_sync(&self, network_id: &str) -> Result<()> {
        self.adapter()?.manual_sync(network_id)?;
        Ok(())
    }

    pub fn create_manual_sync_count(&self, network_id: &str) {
        if let Ok(adapter) = self.adapter() {
            adapter.create_manual_sync_count(network_id);
        }
    }

    pub fn remove_manual_sync_count(&self, network_id: &str) {
        if let Ok(adapter) = self.adapter() {
            adapter.remove_manual_sync_count(network_id);
        }
    }

    /// Resolve the task addressing of a peer capability
    fn task_param_of(&self, cap: &CapabilityInfo) -> Option<TaskParam> {
        let Some(uuid) = self.context.get_uuid_by_device_id(&cap.device_id) else {
            debug!("Device of {} is not online", cap.anonymous_key());
            return None;
        };
        let network_id = self.context.get_network_id_by_uuid(&uuid)?;
        Some(TaskParam {
            network_id,
            uuid,
            dh_id: cap.dh_id.clone(),
            dh_type: cap.dh_type,
        })
    }

    fn parse_entries(entries: &[Entry]) -> Vec<CapabilityInfo> {
        entries
            .iter()
            .filter_map(|e| match CapabilityInfo::from_json_str(&e.value) {
                Ok(cap) => Some(cap),
                Err(err) => {
                    warn!("Skipping bad capability change {}: {}", anonymize(&e.key), err);
                    None
                }
            })
            .collect()
    }

    fn handle_capability_add(&self, entries: &[Entry]) {
        for cap in Self::parse_entries(entries) {
            self.infos.write().insert(cap.key(), cap.clone());
            let Some(param) = self.task_param_of(&cap) else {
                continue;
            };
            if let Err(e) = self.dispatcher.dispatch(TaskType::Enable, param, None) {
                error!("Dispatch enable of {} failed: {}", cap.anonymous_key(), e);
            }
        }
    }

    fn handle_capability_update(&self, entries: &[Entry]) {
        let mut infos = self.infos.write();
        for cap in Self::parse_entries(entries) {
            infos.insert(cap.key(), cap);
        }
    }

    fn handle_capability_delete(&self, entries: &[Entry]) {
        for cap in Self::parse_entries(entries) {
            if let Some(param) = self.task_param_of(&cap) {
                if let Err(e) = self.dispatcher.dispatch(TaskType::Disable, param, None) {
                    error!("Dispatch disable of {} failed: {}", cap.anonymous_key(), e);
                }
            }
            self.infos.write().remove(&cap.key());
        }
    }
}

impl StoreObserver for CapabilityInfoManager {
    fn on_change(&self, change: &ChangeNotification) {
        info!(
            "Capability change: {} insert, {} update, {} delete",
            change.insert.len(),
            change.update.len(),
            change.delete.len()
        );
        self.handle_capability_add(&change.insert);
        self.handle_capability_update(&change.update);
        self.handle_capability_delete(&change.delete);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestStack;
    use meshware_core::device_id_from_uuid;
    use meshware_store::KvStore;

    fn cap(device_id: &str, dh_id: &str, dh_type: DhType) -> CapabilityInfo {
        CapabilityInfo::new(dh_id, device_id, "peer", 0x0E, dh_type, r#"{"k":1}"#)
    }

    #[tokio::test]
    async fn test_add_then_has_and_get() {
        let stack = TestStack::start().await;
        let caps = &stack.manager.capabilities;
        let original = cap("dev-a", "camera_0", DhType::Camera);

        caps.add_capability(vec![original.clone()]).unwrap();
        assert!(caps.has_capability("dev-a", "camera_0"));
        assert_eq!(caps.get_capability("dev-a", "camera_0").unwrap(), original);
        assert_eq!(caps.get_data_by_key(&original.key()).unwrap(), original);
    }

    #[tokio::test]
    async fn test_unchanged_records_are_not_rewritten() {
        let stack = TestStack::start().await;
        let caps = &stack.manager.capabilities;
        let store = stack.provider.store(CAPABILITY_STORE_ID);
        let original = cap("dev-a", "camera_0", DhType::Camera);

        caps.add_capability(vec![original.clone()]).unwrap();
        let writes = store.writes();
        caps.add_capability(vec![original.clone()]).unwrap();
        assert_eq!(store.writes(), writes);

        let mut changed = original.clone();
        changed.dh_attrs = "{}".to_string();
        caps.add_capability(vec![changed.clone()]).unwrap();
        assert_eq!(store.writes(), writes + 1);
        assert_eq!(store.get(&original.key()).unwrap(), changed.to_json_string());
    }

    #[tokio::test]
    async fn test_remove_by_key_then_readd() {
        let stack = TestStack::start().await;
        let caps = &stack.manager.capabilities;
        let original = cap("dev-a", "camera_0", DhType::Camera);
        let key = original.key();

        caps.add_capability(vec![original.clone()]).unwrap();
        caps.remove_capability_info_by_key(&key).unwrap();
        assert!(!caps.has_capability("dev-a", "camera_0"));
        assert!(matches!(
            caps.get_data_by_key(&key),
            Err(FwkError::Store(StoreError::NotFound(_)))
        ));

        caps.add_capability(vec![original]).unwrap();
        assert!(caps.has_capability("dev-a", "camera_0"));
    }

    #[tokio::test]
    async fn test_device_scoped_queries() {
        let stack = TestStack::start().await;
        let caps = &stack.manager.capabilities;
        caps.add_capability_in_mem(vec![
            cap("dev-a", "camera_0", DhType::Camera),
            cap("dev-a", "mic_0", DhType::Audio),
            cap("dev-ab", "camera_0", DhType::Camera),
        ]);

        assert_eq!(caps.get_capabilities_by_device_id("dev-a").len(), 2);
        assert_eq!(caps.get_data_by_dh_type(DhType::Camera).len(), 2);

        caps.remove_capability_info_in_mem("dev-a");
        assert_eq!(caps.get_capabilities_by_device_id("dev-a").len(), 0);
        assert_eq!(caps.get_capabilities_by_device_id("dev-ab").len(), 1);
    }

    #[tokio::test]
    async fn test_remote_changes_drive_tasks() {
        let stack = TestStack::start().await;
        let mut events = stack.bus.subscribe();
        stack.context.add_online_device("peer-uuid", "net-1");
        let device_id = device_id_from_uuid("peer-uuid");
        let remote = cap(&device_id, "camera_0", DhType::Camera);
        let offline = cap("not-online", "camera_0", DhType::Camera);
        let store = stack.provider.store(CAPABILITY_STORE_ID);

        store.apply_remote(&ChangeNotification {
            insert: vec![
                Entry::new(remote.key(), remote.to_json_string()),
                Entry::new(offline.key(), offline.to_json_string()),
            ],
            ..Default::default()
        });
        let caps = &stack.manager.capabilities;
        assert!(caps.has_capability(&device_id, "camera_0"));
        assert!(caps.has_capability("not-online", "camera_0"));
        assert_eq!(stack.next_created(&mut events).await, TaskType::Enable);

        let mut updated = remote.clone();
        updated.dh_attrs = "{}".to_string();
        store.apply_remote(&ChangeNotification {
            update: vec![Entry::new(updated.key(), updated.to_json_string())],
            ..Default::default()
        });
        assert_eq!(caps.get_capability(&device_id, "camera_0").unwrap(), updated);

        store.apply_remote(&ChangeNotification {
            delete: vec![Entry::new(remote.key(), remote.to_json_string())],
            ..Default::default()
        });
        assert!(!caps.has_capability(&device_id, "camera_0"));
        assert_eq!(stack.next_created(&mut events).await, TaskType::Disable);
    }

    #[tokio::test]
    async fn test_resync_after_store_recovery() {
        let stack = TestStack::start().await;
        let caps = &stack.manager.capabilities;
        let store = stack.provider.store(CAPABILITY_STORE_ID);
        let remote = cap("dev-remote", "camera_0", DhType::Camera);
        store.put(&remote.key(), &remote.to_json_string()).unwrap();
        assert!(!caps.has_capability("dev-remote", "camera_0"));

        stack.provider.kill(CAPABILITY_STORE_ID);
        for _ in 0..100 {
            if caps.has_capability("dev-remote", "camera_0") {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(caps.has_capability("dev-remote", "camera_0"));
    }
}
