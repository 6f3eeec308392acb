//! Store adapter: one open partition plus retry and recovery policy

use meshware_core::{anonymize, BusEvent, EventBus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::store::{
    ChangeNotification, Entry, KvStore, StoreDeathRecipient, StoreError, StoreObserver,
    StoreProvider, StoreResult, SyncStatus,
};

/// Upper bound on records returned by a prefix query
pub const MAX_DB_RECORD_SIZE: usize = 10000;

/// Retry policy of a [`DbAdapter`]
#[derive(Debug, Clone)]
pub struct DbAdapterConfig {
    pub init_retry_times: u32,
    pub init_retry_interval: Duration,
    pub died_check_max_times: u32,
    pub died_check_interval: Duration,
    pub manual_sync_max_times: u32,
    pub manual_sync_interval: Duration,
}

impl Default for DbAdapterConfig {
    fn default() -> Self {
        Self {
            init_retry_times: 20,
            init_retry_interval: Duration::from_millis(200),
            died_check_max_times: 300,
            died_check_interval: Duration::from_millis(100),
            manual_sync_max_times: 6,
            manual_sync_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Default)]
struct Connection {
    store: Option<Arc<dyn KvStore>>,
    subscription: Option<u64>,
}

/// Forwards store notifications without keeping the listener alive
struct ListenerProxy(Weak<dyn StoreObserver>);

impl StoreObserver for ListenerProxy {
    fn on_change(&self, change: &ChangeNotification) {
        if let Some(listener) = self.0.upgrade() {
            listener.on_change(change);
        }
    }
}

/// Wraps one store partition
///
/// Store calls are serialized by a single mutex. Death of the store process
/// triggers a background re-open loop which, once it succeeds, publishes
/// [`BusEvent::StoreRecovered`] so the owning manager can resync.
pub struct DbAdapter {
    app_id: String,
    store_id: String,
    provider: Arc<dyn StoreProvider>,
    listener: Weak<dyn StoreObserver>,
    bus: Arc<EventBus>,
    config: DbAdapterConfig,
    conn: Mutex<Connection>,
    manual_sync_counts: Mutex<HashMap<String, u32>>,
    me: Weak<DbAdapter>,
}

impl DbAdapter {
    pub fn new(
        app_id: impl Into<String>,
        store_id: impl Into<String>,
        provider: Arc<dyn StoreProvider>,
        listener: Weak<dyn StoreObserver>,
        bus: Arc<EventBus>,
        config: DbAdapterConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            app_id: app_id.into(),
            store_id: store_id.into(),
            provider,
            listener,
            bus,
            config,
            conn: Mutex::new(Connection::default()),
            manual_sync_counts: Mutex::new(HashMap::new()),
            me: me.clone(),
        })
    }

    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    /// Open the partition, retrying on failure, then subscribe to changes
    pub async fn init(&self) -> StoreResult<()> {
        info!("Init store adapter, storeId: {}", self.store_id);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.provider.open(&self.app_id, &self.store_id) {
                Ok(store) => {
                    self.conn.lock().store = Some(store);
                    break;
                }
                Err(e) if attempt < self.config.init_retry_times => {
                    debug!("Open store {} failed (attempt {}): {}", self.store_id, attempt, e);
                    tokio::time::sleep(self.config.init_retry_interval).await;
                }
                Err(e) => {
                    error!("Open store {} failed after {} attempts: {}", self.store_id, attempt, e);
                    return Err(StoreError::InitFailed(attempt));
                }
            }
        }

        self.register_death_recipient();
        if let Err(e) = self.register_change_listener() {
            warn!("Register change listener for {} failed: {}", self.store_id, e);
        }
        Ok(())
    }

    pub fn uninit(&self) {
        info!("UnInit store adapter, storeId: {}", self.store_id);
        self.unregister_change_listener();
        self.provider.unregister_death_recipient(&self.store_id);
        self.conn.lock().store = None;
    }

    /// Single re-open attempt used by the recovery loop
    pub fn reinit(&self) -> StoreResult<()> {
        let store = self.provider.open(&self.app_id, &self.store_id)?;
        self.conn.lock().store = Some(store);
        self.register_death_recipient();
        Ok(())
    }

    fn register_death_recipient(&self) {
        let me: Weak<dyn StoreDeathRecipient> = self.me.clone();
        self.provider.register_death_recipient(&self.store_id, me);
    }

    fn register_change_listener(&self) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let store = conn.store.clone().ok_or(StoreError::NotOpen)?;
        if let Some(old) = conn.subscription.take() {
            let _ = store.unsubscribe_remote(old);
        }
        let proxy = Arc::new(ListenerProxy(self.listener.clone()));
        conn.subscription = Some(store.subscribe_remote(proxy)?);
        Ok(())
    }

    fn unregister_change_listener(&self) {
        let mut conn = self.conn.lock();
        if let (Some(store), Some(id)) = (conn.store.clone(), conn.subscription.take()) {
            if let Err(e) = store.unsubscribe_remote(id) {
                warn!("Unsubscribe from {} failed: {}", self.store_id, e);
            }
        }
    }

    fn with_store<T>(&self, f: impl FnOnce(&dyn KvStore) -> StoreResult<T>) -> StoreResult<T> {
        let conn = self.conn.lock();
        let store = conn.store.as_ref().ok_or(StoreError::NotOpen)?;
        f(store.as_ref())
    }

    pub fn get_data_by_key(&self, key: &str) -> StoreResult<String> {
        self.with_store(|s| s.get(key))
    }

    /// Values of all records under `prefix`; empty or oversized results are invalid
    pub fn get_data_by_key_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let entries = self.with_store(|s| s.entries(prefix))?;
        if entries.is_empty() || entries.len() > MAX_DB_RECORD_SIZE {
            return Err(StoreError::InvalidData(format!(
                "{} records under prefix {}",
                entries.len(),
                anonymize(prefix)
            )));
        }
        Ok(entries.into_iter().map(|e| e.value).collect())
    }

    pub fn put_data(&self, key: &str, value: &str) -> StoreResult<()> {
        self.with_store(|s| s.put(key, value))
    }

    pub fn put_data_batch(&self, keys: &[String], values: &[String]) -> StoreResult<()> {
        if keys.is_empty() || keys.len() != values.len() {
            return Err(StoreError::InvalidParam(format!(
                "{} keys, {} values",
                keys.len(),
                values.len()
            )));
        }
        let entries: Vec<Entry> = keys
            .iter()
            .zip(values)
            .map(|(k, v)| Entry::new(k.clone(), v.clone()))
            .collect();
        self.with_store(|s| s.put_batch(&entries))
    }

    pub fn remove_device_data(&self, device_id: &str) -> StoreResult<()> {
        self.with_store(|s| s.remove_device_data(device_id))
    }

    pub fn remove_data_by_key(&self, key: &str) -> StoreResult<()> {
        self.with_store(|s| s.delete(key))
    }

    /// Start tracking sync retries for a peer
    pub fn create_manual_sync_count(&self, network_id: &str) {
        self.manual_sync_counts
            .lock()
            .insert(network_id.to_string(), 0);
    }

    pub fn remove_manual_sync_count(&self, network_id: &str) {
        self.manual_sync_counts.lock().remove(network_id);
    }

    pub fn manual_sync_count(&self, network_id: &str) -> Option<u32> {
        self.manual_sync_counts.lock().get(network_id).copied()
    }

    /// Pull the partition from one peer
    ///
    /// Failures are retried in the background while the peer still has a
    /// sync counter and the counter is below the configured limit.
    pub fn manual_sync(&self, network_id: &str) -> StoreResult<()> {
        info!("Manual sync {}, networkId: {}", self.store_id, anonymize(network_id));
        let devices = vec![network_id.to_string()];
        match self.with_store(|s| s.sync_pull(&devices)) {
            Ok(results) => {
                let failed = results.get(network_id) != Some(&SyncStatus::Success);
                self.sync_completed(results);
                if failed {
                    return Err(StoreError::Operation(format!(
                        "sync with {} failed",
                        anonymize(network_id)
                    )));
                }
                Ok(())
            }
            Err(e) => {
                error!("Manual sync {} failed: {}", self.store_id, e);
                self.sync_completed(HashMap::from([(network_id.to_string(), SyncStatus::Failed)]));
                Err(e)
            }
        }
    }

    /// Reset counters of successful peers, schedule retries for failed ones
    pub fn sync_completed(&self, results: HashMap<String, SyncStatus>) {
        for (network_id, status) in results {
            let mut counts = self.manual_sync_counts.lock();
            let Some(count) = counts.get_mut(&network_id) else {
                continue;
            };
            if status == SyncStatus::Success {
                *count = 0;
                continue;
            }
            if *count >= self.config.manual_sync_max_times {
                warn!(
                    "Manual sync {} with {} gave up after {} retries",
                    self.store_id,
                    anonymize(&network_id),
                    *count
                );
                continue;
            }
            *count += 1;
            debug!("Retry manual sync {} with {} ({})", self.store_id, anonymize(&network_id), *count);
            let me = self.me.clone();
            self.bus.post_delayed(self.config.manual_sync_interval, async move {
                if let Some(adapter) = me.upgrade() {
                    if let Err(e) = adapter.manual_sync(&network_id) {
                        warn!(
                            "Manual sync retry {} with {} failed: {}",
                            adapter.store_id,
                            anonymize(&network_id),
                            e
                        );
                    }
                }
            });
        }
    }

    async fn recover(self: Arc<Self>) {
        for attempt in 1..=self.config.died_check_max_times {
            match self.reinit() {
                Ok(()) => {
                    info!("Store {} reopened after {} attempts", self.store_id, attempt);
                    if let Err(e) = self.register_change_listener() {
                        warn!("Re-register change listener for {} failed: {}", self.store_id, e);
                    }
                    self.bus.publish(BusEvent::StoreRecovered {
                        store_id: self.store_id.clone(),
                    });
                    return;
                }
                Err(e) => {
                    debug!("Reopen store {} failed (attempt {}): {}", self.store_id, attempt, e);
                    tokio::time::sleep(self.config.died_check_interval).await;
                }
            }
        }
        error!(
            "Store {} not recovered after {} attempts",
            self.store_id, self.config.died_check_max_times
        );
    }
}

impl StoreDeathRecipient for DbAdapter {
    fn on_store_died(&self) {
        warn!("Store {} died, starting recovery", self.store_id);
        {
            let mut conn = self.conn.lock();
            conn.store = None;
            conn.subscription = None;
        }
        let me = self.me.clone();
        self.bus.post(async move {
            if let Some(adapter) = me.upgrade() {
                tokio::spawn(adapter.recover());
            }
        });
    }
}
