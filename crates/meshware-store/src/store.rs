//! Surface of the external replicated key-value store

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store is not open")]
    NotOpen,
    #[error("Key not found: {0}")]
    NotFound(String),
    #[error("Store operation failed: {0}")]
    Operation(String),
    #[error("Invalid store data: {0}")]
    InvalidData(String),
    #[error("Store could not be opened after {0} attempts")]
    InitFailed(u32),
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// One key/value record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,
    pub value: String,
}

impl Entry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Records changed by another device, delivered to subscribers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotification {
    #[serde(default)]
    pub insert: Vec<Entry>,
    #[serde(default)]
    pub update: Vec<Entry>,
    #[serde(default)]
    pub delete: Vec<Entry>,
}

impl ChangeNotification {
    pub fn is_empty(&self) -> bool {
        self.insert.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }
}

/// Per-device outcome of a pull sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Success,
    Failed,
}

/// Receives changes that originated on other devices
pub trait StoreObserver: Send + Sync {
    fn on_change(&self, change: &ChangeNotification);
}

/// Notified when the store process dies
pub trait StoreDeathRecipient: Send + Sync {
    fn on_store_died(&self);
}

/// An open store partition
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<String>;

    /// All entries whose key starts with `prefix` (empty prefix = everything)
    fn entries(&self, prefix: &str) -> StoreResult<Vec<Entry>>;

    fn put(&self, key: &str, value: &str) -> StoreResult<()>;

    fn put_batch(&self, entries: &[Entry]) -> StoreResult<()>;

    fn delete(&self, key: &str) -> StoreResult<()>;

    /// Drop every record replicated from the given device
    fn remove_device_data(&self, device_id: &str) -> StoreResult<()>;

    /// Pull records from the given devices
    fn sync_pull(&self, devices: &[String]) -> StoreResult<HashMap<String, SyncStatus>>;

    /// Subscribe to remote changes, returning a subscription id
    fn subscribe_remote(&self, observer: Arc<dyn StoreObserver>) -> StoreResult<u64>;

    fn unsubscribe_remote(&self, subscription: u64) -> StoreResult<()>;
}

/// Opens store partitions and tracks the store process lifecycle
pub trait StoreProvider: Send + Sync {
    fn open(&self, app_id: &str, store_id: &str) -> StoreResult<Arc<dyn KvStore>>;

    fn register_death_recipient(&self, store_id: &str, recipient: Weak<dyn StoreDeathRecipient>);

    fn unregister_death_recipient(&self, store_id: &str);
}
