//! Source/sink lifecycle and the enable/disable protocol
//!
//! Enabling a remote capability means registering it with the local source
//! module of its type and waiting for the module's completion callback.
//! Calls on the same capability key are serialized.

use meshware_components::{
    ComponentLoader, EnableParam, ModuleResult, RegisterCallback, SinkModule, SourceModule,
    UnregisterCallback, VersionManager,
};
use meshware_core::{
    anonymize, capability_key, device_id_from_uuid, BusEvent, DhType, TaskParam, TaskType,
};
use meshware_store::StoreError;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::capability_info_manager::CapabilityInfoManager;
use crate::component_monitor::ComponentMonitor;
use crate::config::FwkConfig;
use crate::context::DhContext;
use crate::error::{FwkError, Result};
use crate::task_board::TaskBoard;
use crate::task_executor::TaskDispatcher;
use crate::version_info_manager::VersionInfoManager;

/// Completion callback of one register call
struct ComponentEnable {
    result: Mutex<Option<oneshot::Sender<i32>>>,
}

impl ComponentEnable {
    fn new() -> (Arc<Self>, oneshot::Receiver<i32>) {
        let (tx, rx) = oneshot::channel();
        let callback = Arc::new(Self {
            result: Mutex::new(Some(tx)),
        });
        (callback, rx)
    }
}

impl RegisterCallback for ComponentEnable {
    fn on_register_result(&self, network_id: &str, dh_id: &str, status: i32, _data: &str) {
        debug!(
            "Register result {} for networkId {}, dhId {}",
            status,
            anonymize(network_id),
            anonymize(dh_id)
        );
        if let Some(tx) = self.result.lock().take() {
            let _ = tx.send(status);
        }
    }
}

/// Completion callback of one unregister call
struct ComponentDisable {
    result: Mutex<Option<oneshot::Sender<i32>>>,
}

impl ComponentDisable {
    fn new() -> (Arc<Self>, oneshot::Receiver<i32>) {
        let (tx, rx) = oneshot::channel();
        let callback = Arc::new(Self {
            result: Mutex::new(Some(tx)),
        });
        (callback, rx)
    }
}

impl UnregisterCallback for ComponentDisable {
    fn on_unregister_result(&self, network_id: &str, dh_id: &str, status: i32, _data: &str) {
        debug!(
            "Unregister result {} for networkId {}, dhId {}",
            status,
            anonymize(network_id),
            anonymize(dh_id)
        );
        if let Some(tx) = self.result.lock().take() {
            let _ = tx.send(status);
        }
    }
}

pub struct ComponentManager {
    config: FwkConfig,
    context: Arc<DhContext>,
    loader: Arc<ComponentLoader>,
    versions: Arc<VersionManager>,
    version_infos: Arc<VersionInfoManager>,
    capabilities: Arc<CapabilityInfoManager>,
    board: Arc<TaskBoard>,
    dispatcher: Arc<TaskDispatcher>,
    monitor: ComponentMonitor,
    sources: RwLock<BTreeMap<DhType, Arc<dyn SourceModule>>>,
    sinks: RwLock<BTreeMap<DhType, Arc<dyn SinkModule>>>,
    key_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    status_monitor: Mutex<Option<JoinHandle<()>>>,
    me: Weak<ComponentManager>,
}

impl ComponentManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: FwkConfig,
        context: Arc<DhContext>,
        loader: Arc<ComponentLoader>,
        versions: Arc<VersionManager>,
        version_infos: Arc<VersionInfoManager>,
        capabilities: Arc<CapabilityInfoManager>,
        board: Arc<TaskBoard>,
        dispatcher: Arc<TaskDispatcher>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<ComponentManager>| Self {
            config,
            context,
            monitor: ComponentMonitor::new(loader.clone(), me.clone()),
            loader,
            versions,
            version_infos,
            capabilities,
            board,
            dispatcher,
            sources: RwLock::new(BTreeMap::new()),
            sinks: RwLock::new(BTreeMap::new()),
            key_locks: Mutex::new(HashMap::new()),
            status_monitor: Mutex::new(None),
            me: me.clone(),
        })
    }

    pub fn monitor(&self) -> &ComponentMonitor {
        &self.monitor
    }

    /// Start every loaded source and sink concurrently, then start monitoring
    pub async fn init(&self) -> Result<()> {
        info!("ComponentManager init");
        let mut sources = BTreeMap::new();
        let mut sinks = BTreeMap::new();
        for dh_type in self.loader.get_all_comp_types() {
            if let Some(source) = self.loader.get_source(dh_type) {
                sources.insert(dh_type, source);
            }
            if let Some(sink) = self.loader.get_sink(dh_type) {
                sinks.insert(dh_type, sink);
            }
        }
        if sources.is_empty() {
            return Err(FwkError::InitFailed("no source component loaded".to_string()));
        }
        if sinks.is_empty() {
            return Err(FwkError::InitFailed("no sink component loaded".to_string()));
        }

        let versions = self.loader.get_local_comp_versions();
        let mut starts = JoinSet::new();
        for (dh_type, source) in &sources {
            let source = source.clone();
            let (dh_type, version) = (*dh_type, source_version(&versions, *dh_type));
            starts.spawn_blocking(move || (dh_type, "source", source.init_source(&version)));
        }
        for (dh_type, sink) in &sinks {
            let sink = sink.clone();
            let (dh_type, version) = (*dh_type, sink_version(&versions, *dh_type));
            starts.spawn_blocking(move || (dh_type, "sink", sink.init_sink(&version)));
        }
        log_start_results(&mut starts).await;

        *self.sources.write() = sources;
        *self.sinks.write() = sinks;

        for dh_type in self.loader.get_all_comp_types() {
            if let Some(sa_id) = self.loader.get_source_sa_id(dh_type) {
                self.monitor.add_sa_monitor(sa_id);
            }
        }
        self.start_status_monitor();
        Ok(())
    }

    pub async fn uninit(&self) {
        info!("ComponentManager uninit");
        if let Some(handle) = self.status_monitor.lock().take() {
            handle.abort();
        }
        self.monitor.clear();

        let sources = std::mem::take(&mut *self.sources.write());
        let sinks = std::mem::take(&mut *self.sinks.write());
        let mut stops = JoinSet::new();
        for (dh_type, source) in sources {
            stops.spawn_blocking(move || (dh_type, "source", source.release_source()));
        }
        for (dh_type, sink) in sinks {
            stops.spawn_blocking(move || (dh_type, "sink", sink.release_sink()));
        }
        log_start_results(&mut stops).await;
        self.key_locks.lock().clear();
    }

    fn start_status_monitor(&self) {
        let me = self.me.clone();
        let period = self.config.monitor_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = me.upgrade() else { break };
                manager.check_enabled_inputs();
            }
        });
        if let Some(old) = self.status_monitor.lock().replace(handle) {
            old.abort();
        }
    }

    /// Disable every enabled input whose capability record left the store
    pub(crate) fn check_enabled_inputs(&self) {
        for (key, param) in self.board.get_enabled_devices() {
            if param.dh_type != DhType::Input {
                continue;
            }
            match self.capabilities.get_data_by_key(&key) {
                Ok(_) => continue,
                Err(FwkError::Store(StoreError::NotFound(_))) => {}
                Err(e) => {
                    warn!("Check of enabled input {} skipped: {}", anonymize(&key), e);
                    continue;
                }
            }
            warn!("Enabled input {} has no capability record, disabling", anonymize(&key));
            if let Err(e) = self.dispatcher.dispatch(TaskType::Disable, param, None) {
                error!("Dispatch disable of {} failed: {}", anonymize(&key), e);
            }
        }
    }

    fn get_source(&self, dh_type: DhType) -> Option<Arc<dyn SourceModule>> {
        self.sources.read().get(&dh_type).cloned()
    }

    fn get_sink(&self, dh_type: DhType) -> Option<Arc<dyn SinkModule>> {
        self.sinks.read().get(&dh_type).cloned()
    }

    /// Types with a running source and with a running sink
    pub fn dump_loaded_comps(&self) -> (Vec<DhType>, Vec<DhType>) {
        (
            self.sources.read().keys().copied().collect(),
            self.sinks.read().keys().copied().collect(),
        )
    }

    fn key_lock(&self, uuid: &str, dh_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let key = capability_key(&device_id_from_uuid(uuid), dh_id);
        self.key_locks.lock().entry(key).or_default().clone()
    }

    /// Drop the lock entry of a key nobody else is waiting on
    fn release_key_lock(&self, uuid: &str, dh_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let key = capability_key(&device_id_from_uuid(uuid), dh_id);
        let mut locks = self.key_locks.lock();
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&key);
        }
    }

    #[cfg(test)]
    pub(crate) fn key_lock_count(&self) -> usize {
        self.key_locks.lock().len()
    }

    pub async fn enable(
        &self,
        network_id: &str,
        uuid: &str,
        dh_id: &str,
        dh_type: DhType,
    ) -> Result<()> {
        info!(
            "Enable {} dhId {} of networkId {}",
            dh_type,
            anonymize(dh_id),
            anonymize(network_id)
        );
        let source = self
            .get_source(dh_type)
            .ok_or_else(|| FwkError::ParamInvalid(format!("no source for {}", dh_type)))?;
        let lock = self.key_lock(uuid, dh_id);
        let _guard = lock.lock().await;

        let param = self.resolve_enable_param(uuid, dh_id, dh_type).await?;

        let mut attempt = 0;
        loop {
            let result = self.enable_once(&source, network_id, dh_id, &param).await;
            match result {
                Ok(()) => {
                    self.context.bus().publish(BusEvent::ComponentEnabled {
                        network_id: network_id.to_string(),
                        dh_type,
                        dh_id: dh_id.to_string(),
                    });
                    return Ok(());
                }
                Err(FwkError::EnableTimeout) => {
                    error!("Enable of {} timed out", anonymize(dh_id));
                    return Err(FwkError::EnableTimeout);
                }
                Err(e) => {
                    if attempt >= self.config.retry_max_times {
                        error!("Enable of {} failed after {} retries: {}", anonymize(dh_id), attempt, e);
                        return Err(e);
                    }
                    if !self.context.is_device_online(uuid) {
                        warn!("Device went offline, stop enabling {}", anonymize(dh_id));
                        return Err(e);
                    }
                    attempt += 1;
                    debug!("Retry enable of {} ({}): {}", anonymize(dh_id), attempt, e);
                }
            }
        }
    }

    async fn enable_once(
        &self,
        source: &Arc<dyn SourceModule>,
        network_id: &str,
        dh_id: &str,
        param: &EnableParam,
    ) -> Result<()> {
        let (callback, result) = ComponentEnable::new();
        source
            .register_distributed_hardware(network_id, dh_id, param, callback)
            .map_err(|e| FwkError::EnableFailed(e.to_string()))?;

        match tokio::time::timeout(self.config.enable_timeout, result).await {
            Err(_) => Err(FwkError::EnableTimeout),
            Ok(Err(_)) => Err(FwkError::EnableFailed("callback dropped".to_string())),
            Ok(Ok(0)) => Ok(()),
            Ok(Ok(status)) => Err(FwkError::EnableFailed(format!("status {}", status))),
        }
    }

    pub async fn disable(
        &self,
        network_id: &str,
        uuid: &str,
        dh_id: &str,
        dh_type: DhType,
    ) -> Result<()> {
        info!(
            "Disable {} dhId {} of networkId {}",
            dh_type,
            anonymize(dh_id),
            anonymize(network_id)
        );
        let source = self
            .get_source(dh_type)
            .ok_or_else(|| FwkError::ParamInvalid(format!("no source for {}", dh_type)))?;
        let lock = self.key_lock(uuid, dh_id);
        let result = {
            let _guard = lock.lock().await;
            self.disable_with_retry(&source, network_id, uuid, dh_id, dh_type).await
        };
        self.release_key_lock(uuid, dh_id, lock);
        result
    }

    async fn disable_with_retry(
        &self,
        source: &Arc<dyn SourceModule>,
        network_id: &str,
        uuid: &str,
        dh_id: &str,
        dh_type: DhType,
    ) -> Result<()> {
        let mut attempt = 0;
        loop {
            let result = self.disable_once(source, network_id, dh_id).await;
            match result {
                Ok(()) => {
                    self.context.bus().publish(BusEvent::ComponentDisabled {
                        network_id: network_id.to_string(),
                        dh_type,
                        dh_id: dh_id.to_string(),
                    });
                    return Ok(());
                }
                Err(FwkError::DisableTimeout) => {
                    error!("Disable of {} timed out", anonymize(dh_id));
                    return Err(FwkError::DisableTimeout);
                }
                Err(e) => {
                    if attempt >= self.config.retry_max_times {
                        error!("Disable of {} failed after {} retries: {}", anonymize(dh_id), attempt, e);
                        return Err(e);
                    }
                    if self.context.is_device_online(uuid) {
                        warn!("Device back online, stop disabling {}", anonymize(dh_id));
                        return Err(e);
                    }
                    attempt += 1;
                    debug!("Retry disable of {} ({}): {}", anonymize(dh_id), attempt, e);
                }
            }
        }
    }

    async fn disable_once(
        &self,
        source: &Arc<dyn SourceModule>,
        network_id: &str,
        dh_id: &str,
    ) -> Result<()> {
        let (callback, result) = ComponentDisable::new();
        source
            .unregister_distributed_hardware(network_id, dh_id, callback)
            .map_err(|e| FwkError::DisableFailed(e.to_string()))?;

        match tokio::time::timeout(self.config.disable_timeout, result).await {
            Err(_) => Err(FwkError::DisableTimeout),
            Ok(Err(_)) => Err(FwkError::DisableFailed("callback dropped".to_string())),
            Ok(Ok(0)) => Ok(()),
            Ok(Ok(status)) => Err(FwkError::DisableFailed(format!("status {}", status))),
        }
    }

    /// Resolve the enable parameters, retrying while the device stays online
    async fn resolve_enable_param(
        &self,
        uuid: &str,
        dh_id: &str,
        dh_type: DhType,
    ) -> Result<EnableParam> {
        let mut attempt = 0;
        loop {
            match self.get_enable_param(uuid, dh_id, dh_type) {
                Ok(param) => return Ok(param),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.config.retry_max_times {
                        error!("Enable param of {} unresolved: {}", anonymize(dh_id), e);
                        return Err(e);
                    }
                    if !self.context.is_device_online(uuid) {
                        warn!("Device offline, stop resolving {}", anonymize(dh_id));
                        return Err(e);
                    }
                    debug!("Enable param of {} not ready ({}): {}", anonymize(dh_id), attempt, e);
                    tokio::time::sleep(self.config.param_retry_interval).await;
                }
            }
        }
    }

    fn get_enable_param(&self, uuid: &str, dh_id: &str, dh_type: DhType) -> Result<EnableParam> {
        let device_id = device_id_from_uuid(uuid);
        let cap = self.capabilities.get_capability(&device_id, dh_id)?;
        let version = self.get_sink_version(uuid, &device_id, dh_type)?;
        Ok(EnableParam {
            version,
            attrs: cap.dh_attrs,
        })
    }

    /// Sink version of the peer, from the cache or else from the store
    fn get_sink_version(&self, uuid: &str, device_id: &str, dh_type: DhType) -> Result<String> {
        if let Ok(comp) = self.versions.get_comp_version(uuid, dh_type) {
            if !comp.sink_version.is_empty() {
                return Ok(comp.sink_version);
            }
        }
        let info = self.version_infos.get_version_info_by_device_id(device_id)?;
        let sink_version = info
            .comp_versions
            .get(&dh_type)
            .map(|c| c.sink_version.clone())
            .filter(|v| !v.is_empty())
            .ok_or(FwkError::TypeNotExist(dh_type))?;
        self.versions.add_dh_version(uuid, info.to_dh_version(uuid));
        Ok(sink_version)
    }

    /// Restart the modules of a type after its system ability died
    pub async fn recover(&self, dh_type: DhType) -> Result<()> {
        info!("Recover component {}", dh_type);
        let versions = self.loader.get_local_comp_versions();
        if !versions.contains_key(&dh_type) {
            return Err(FwkError::TypeNotExist(dh_type));
        }

        let mut restarts = JoinSet::new();
        if let Some(source) = self.get_source(dh_type) {
            let version = source_version(&versions, dh_type);
            restarts.spawn_blocking(move || (dh_type, "source", source.init_source(&version)));
        }
        if let Some(sink) = self.get_sink(dh_type) {
            let version = sink_version(&versions, dh_type);
            restarts.spawn_blocking(move || (dh_type, "sink", sink.init_sink(&version)));
        }
        log_start_results(&mut restarts).await;

        for cap in self.capabilities.get_data_by_dh_type(dh_type) {
            let Some(uuid) = self.context.get_uuid_by_device_id(&cap.device_id) else {
                continue;
            };
            let Some(network_id) = self.context.get_network_id_by_uuid(&uuid) else {
                continue;
            };
            let param = TaskParam {
                network_id,
                uuid,
                dh_id: cap.dh_id.clone(),
                dh_type,
            };
            if let Err(e) = self.dispatcher.dispatch(TaskType::Enable, param, None) {
                error!("Dispatch re-enable of {} failed: {}", cap.anonymous_key(), e);
            }
        }
        self.context
            .bus()
            .publish(BusEvent::ComponentRecovered { dh_type });
        Ok(())
    }
}

fn source_version(versions: &BTreeMap<DhType, meshware_core::CompVersion>, dh_type: DhType) -> String {
    versions
        .get(&dh_type)
        .map(|c| c.source_version.clone())
        .unwrap_or_default()
}

fn sink_version(versions: &BTreeMap<DhType, meshware_core::CompVersion>, dh_type: DhType) -> String {
    versions
        .get(&dh_type)
        .map(|c| c.sink_version.clone())
        .unwrap_or_default()
}

async fn log_start_results(set: &mut JoinSet<(DhType, &'static str, ModuleResult<()>)>) {
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((dh_type, role, Ok(()))) => debug!("{} {} done", dh_type, role),
            Ok((dh_type, role, Err(e))) => error!("{} {} failed: {}", dh_type, role, e),
            Err(e) => error!("Component start task panicked: {}", e),
        }
    }
}
