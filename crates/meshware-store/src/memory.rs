//! In-process store provider
//!
//! Backs the daemon when no replicated store is wired in and doubles as the
//! test fake: opens, syncs and the store process itself can be made to fail.

use meshware_core::is_key_of_device;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use crate::store::{
    ChangeNotification, Entry, KvStore, StoreDeathRecipient, StoreError, StoreObserver,
    StoreProvider, StoreResult, SyncStatus,
};

/// One in-memory store partition
#[derive(Default)]
pub struct MemoryKvStore {
    data: Mutex<BTreeMap<String, String>>,
    observers: Mutex<HashMap<u64, Arc<dyn StoreObserver>>>,
    next_subscription: AtomicU64,
    dead: AtomicBool,
    sync_failures: AtomicU32,
    sync_requests: AtomicU32,
    writes: AtomicU32,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_alive(&self) -> StoreResult<()> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(StoreError::Operation("store process died".to_string()));
        }
        Ok(())
    }

    /// Make the next `count` sync requests report failure
    pub fn fail_next_syncs(&self, count: u32) {
        self.sync_failures.store(count, Ordering::SeqCst);
    }

    /// Number of sync requests received so far
    pub fn sync_requests(&self) -> u32 {
        self.sync_requests.load(Ordering::SeqCst)
    }

    /// Number of put and batch-put calls so far
    pub fn writes(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.observers.lock().len()
    }

    /// Apply changes as if replicated from a peer, then notify subscribers
    pub fn apply_remote(&self, change: &ChangeNotification) {
        {
            let mut data = self.data.lock();
            for entry in change.insert.iter().chain(change.update.iter()) {
                data.insert(entry.key.clone(), entry.value.clone());
            }
            for entry in &change.delete {
                data.remove(&entry.key);
            }
        }

        let observers: Vec<_> = self.observers.lock().values().cloned().collect();
        debug!(
            "Delivering remote change to {} subscribers ({} insert, {} update, {} delete)",
            observers.len(),
            change.insert.len(),
            change.update.len(),
            change.delete.len()
        );
        for observer in observers {
            observer.on_change(change);
        }
    }

    fn kill(&self) {
        self.dead.store(true, Ordering::SeqCst);
        self.observers.lock().clear();
    }

    fn revive(&self) {
        self.dead.store(false, Ordering::SeqCst);
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> StoreResult<String> {
        self.check_alive()?;
        self.data
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    fn entries(&self, prefix: &str) -> StoreResult<Vec<Entry>> {
        self.check_alive()?;
        Ok(self
            .data
            .lock()
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| Entry::new(k.clone(), v.clone()))
            .collect())
    }

    fn put(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check_alive()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.data.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn put_batch(&self, entries: &[Entry]) -> StoreResult<()> {
        self.check_alive()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut data = self.data.lock();
        for entry in entries {
            data.insert(entry.key.clone(), entry.value.clone());
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        self.check_alive()?;
        self.data.lock().remove(key);
        Ok(())
    }

    fn remove_device_data(&self, device_id: &str) -> StoreResult<()> {
        self.check_alive()?;
        self.data
            .lock()
            .retain(|k, _| k.as_str() != device_id && !is_key_of_device(k, device_id));
        Ok(())
    }

    fn sync_pull(&self, devices: &[String]) -> StoreResult<HashMap<String, SyncStatus>> {
        self.check_alive()?;
        self.sync_requests.fetch_add(1, Ordering::SeqCst);

        let failed = self
            .sync_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let status = if failed {
            SyncStatus::Failed
        } else {
            SyncStatus::Success
        };
        Ok(devices.iter().map(|d| (d.clone(), status)).collect())
    }

    fn subscribe_remote(&self, observer: Arc<dyn StoreObserver>) -> StoreResult<u64> {
        self.check_alive()?;
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        self.observers.lock().insert(id, observer);
        Ok(id)
    }

    fn unsubscribe_remote(&self, subscription: u64) -> StoreResult<()> {
        self.observers.lock().remove(&subscription);
        Ok(())
    }
}

/// Provider handing out [`MemoryKvStore`] partitions by store id
#[derive(Default)]
pub struct MemoryStoreProvider {
    stores: Mutex<HashMap<String, Arc<MemoryKvStore>>>,
    failing_opens: Mutex<HashMap<String, u32>>,
    recipients: Mutex<HashMap<String, Weak<dyn StoreDeathRecipient>>>,
}

impl MemoryStoreProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// The partition for `store_id`, created on first use
    pub fn store(&self, store_id: &str) -> Arc<MemoryKvStore> {
        self.stores
            .lock()
            .entry(store_id.to_string())
            .or_insert_with(|| Arc::new(MemoryKvStore::new()))
            .clone()
    }

    /// Make the next `count` opens of `store_id` fail
    pub fn fail_next_opens(&self, store_id: &str, count: u32) {
        self.failing_opens.lock().insert(store_id.to_string(), count);
    }

    /// Simulate the store process dying: data survives, subscriptions do not
    pub fn kill(&self, store_id: &str) {
        info!("Killing store {}", store_id);
        self.store(store_id).kill();
        let recipient = self.recipients.lock().get(store_id).cloned();
        if let Some(recipient) = recipient.and_then(|r| r.upgrade()) {
            recipient.on_store_died();
        }
    }
}

impl StoreProvider for MemoryStoreProvider {
    fn open(&self, _app_id: &str, store_id: &str) -> StoreResult<Arc<dyn KvStore>> {
        {
            let mut failing = self.failing_opens.lock();
            if let Some(remaining) = failing.get_mut(store_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(StoreError::Operation(format!(
                        "open {} refused",
                        store_id
                    )));
                }
            }
        }
        let store = self.store(store_id);
        store.revive();
        Ok(store)
    }

    fn register_death_recipient(&self, store_id: &str, recipient: Weak<dyn StoreDeathRecipient>) {
        self.recipients.lock().insert(store_id.to_string(), recipient);
    }

    fn unregister_death_recipient(&self, store_id: &str) {
        self.recipients.lock().remove(store_id);
    }
}
