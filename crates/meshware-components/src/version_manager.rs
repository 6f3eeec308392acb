//! In-memory cache of per-device component versions

use meshware_core::{anonymize, CompVersion, DhType, DhVersion, DH_LOCAL_VERSION};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::error::LoaderError;
use crate::loader::ComponentLoader;

/// uuid -> [`DhVersion`]
#[derive(Default)]
pub struct VersionManager {
    versions: RwLock<HashMap<String, DhVersion>>,
}

impl VersionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the cache with the local device's manifest versions
    pub fn init(&self, loader: &ComponentLoader, local_uuid: &str) {
        let local = DhVersion {
            uuid: local_uuid.to_string(),
            dh_version: DH_LOCAL_VERSION.to_string(),
            comp_versions: loader.get_local_comp_versions(),
        };
        info!(
            "Local version {} with {} components",
            local.dh_version,
            local.comp_versions.len()
        );
        self.add_dh_version(local_uuid, local);
    }

    pub fn uninit(&self) {
        self.versions.write().clear();
    }

    pub fn add_dh_version(&self, uuid: &str, version: DhVersion) {
        debug!("Add version of uuid {}", anonymize(uuid));
        self.versions.write().insert(uuid.to_string(), version);
    }

    pub fn remove_dh_version(&self, uuid: &str) -> Result<(), LoaderError> {
        self.versions
            .write()
            .remove(uuid)
            .map(|_| ())
            .ok_or_else(|| LoaderError::UnknownDevice(anonymize(uuid)))
    }

    pub fn get_dh_version(&self, uuid: &str) -> Result<DhVersion, LoaderError> {
        self.versions
            .read()
            .get(uuid)
            .cloned()
            .ok_or_else(|| LoaderError::UnknownDevice(anonymize(uuid)))
    }

    pub fn get_comp_version(&self, uuid: &str, dh_type: DhType) -> Result<CompVersion, LoaderError> {
        let versions = self.versions.read();
        let version = versions
            .get(uuid)
            .ok_or_else(|| LoaderError::UnknownDevice(anonymize(uuid)))?;
        version
            .comp_versions
            .get(&dh_type)
            .cloned()
            .ok_or(LoaderError::TypeNotExist(dh_type))
    }

    pub fn get_local_device_version(&self) -> &'static str {
        DH_LOCAL_VERSION
    }
}
