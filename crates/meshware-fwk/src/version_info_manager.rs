//! Version registry backed by the `dh_version` partition
//!
//! Records are keyed by device id in the store and mirrored into the
//! uuid-keyed [`VersionManager`] cache.

use meshware_components::VersionManager;
use meshware_core::{anonymize, BusEvent, EventBus, VersionInfo};
use meshware_store::{
    ChangeNotification, DbAdapter, DbAdapterConfig, Entry, StoreError, StoreObserver,
    StoreProvider,
};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::capability_info_manager::APP_ID;
use crate::context::DhContext;
use crate::error::{FwkError, Result};

pub const VERSION_STORE_ID: &str = "dh_version";

pub struct VersionInfoManager {
    context: Arc<DhContext>,
    versions: Arc<VersionManager>,
    provider: Arc<dyn StoreProvider>,
    store_config: DbAdapterConfig,
    adapter: RwLock<Option<Arc<DbAdapter>>>,
    recover_listener: Mutex<Option<JoinHandle<()>>>,
    me: Weak<VersionInfoManager>,
}

impl VersionInfoManager {
    pub fn new(
        context: Arc<DhContext>,
        versions: Arc<VersionManager>,
        provider: Arc<dyn StoreProvider>,
        store_config: DbAdapterConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            context,
            versions,
            provider,
            store_config,
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
        info!("VersionInfoManager init");
        let listener: Weak<dyn StoreObserver> = self.me.clone();
        let adapter = DbAdapter::new(
            APP_ID,
            VERSION_STORE_ID,
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
                    Ok(BusEvent::StoreRecovered { store_id }) if store_id == VERSION_STORE_ID => {
                        let Some(manager) = me.upgrade() else { break };
                        if let Err(e) = manager.sync_remote_version_infos() {
                            warn!("Resync versions after store recovery failed: {}", e);
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
        info!("VersionInfoManager uninit");
        if let Some(handle) = self.recover_listener.lock().take() {
            handle.abort();
        }
        if let Some(adapter) = self.adapter.write().take() {
            adapter.uninit();
        }
    }

    /// Publish a version record, skipping the write when nothing changed
    pub fn add_version(&self, info: &VersionInfo) -> Result<()> {
        let adapter = self.adapter()?;
        let json = info.to_json_string();
        if adapter
            .get_data_by_key(&info.device_id)
            .is_ok_and(|stored| stored == json)
        {
            debug!("Version of {} unchanged", anonymize(&info.device_id));
            return Ok(());
        }
        adapter.put_data(&info.device_id, &json)?;
        Ok(())
    }

    pub fn get_version_info_by_device_id(&self, device_id: &str) -> Result<VersionInfo> {
        let value = self.adapter()?.get_data_by_key(device_id)?;
        VersionInfo::from_json_str(&value)
            .map_err(|e| FwkError::Store(StoreError::InvalidData(e.to_string())))
    }

    /// Load one device's record into the version cache
    pub fn sync_version_info_from_db(&self, device_id: &str) -> Result<()> {
        let info = self.get_version_info_by_device_id(device_id)?;
        let uuid = self
            .context
            .get_uuid_by_device_id(device_id)
            .ok_or_else(|| FwkError::NotFound(format!("uuid of {}", anonymize(device_id))))?;
        self.versions.add_dh_version(&uuid, info.to_dh_version(&uuid));
        Ok(())
    }

    /// Load every online peer's record into the version cache
    pub fn sync_remote_version_infos(&self) -> Result<()> {
        let values = self.adapter()?.get_data_by_key_prefix("")?;
        let local_device_id = &self.context.local_device().device_id;
        for value in values {
            let info = match VersionInfo::from_json_str(&value) {
                Ok(info) => info,
                Err(e) => {
                    warn!("Skipping bad version record: {}", e);
                    continue;
                }
            };
            if &info.device_id == local_device_id {
                continue;
            }
            if let Some(uuid) = self.context.get_uuid_by_device_id(&info.device_id) {
                self.versions.add_dh_version(&uuid, info.to_dh_version(&uuid));
            }
        }
        Ok(())
    }

    pub fn remove_version_info_by_device_id(&self, device_id: &str) -> Result<()> {
        if let Some(uuid) = self.context.get_uuid_by_device_id(device_id) {
            let _ = self.versions.remove_dh_version(&uuid);
        }
        self.adapter()?.remove_data_by_key(device_id)?;
        Ok(())
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

    fn parse_entries(entries: &[Entry]) -> Vec<VersionInfo> {
        entries
            .iter()
            .filter_map(|e| VersionInfo::from_json_str(&e.value).ok())
            .collect()
    }
}

impl StoreObserver for VersionInfoManager {
    fn on_change(&self, change: &ChangeNotification) {
        for info in Self::parse_entries(&change.insert)
            .into_iter()
            .chain(Self::parse_entries(&change.update))
        {
            match self.context.get_uuid_by_device_id(&info.device_id) {
                Some(uuid) => self.versions.add_dh_version(&uuid, info.to_dh_version(&uuid)),
                None => debug!("Version of {} ignored, not online", anonymize(&info.device_id)),
            }
        }
        for info in Self::parse_entries(&change.delete) {
            if let Some(uuid) = self.context.get_uuid_by_device_id(&info.device_id) {
                let _ = self.versions.remove_dh_version(&uuid);
            }
        }
    }
}
