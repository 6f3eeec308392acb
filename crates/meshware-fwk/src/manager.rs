//! Framework assembly and the device online/offline façade
//!
//! [`DistributedHardwareManager`] owns one initialized framework instance.
//! [`DistributedHardwareManagerFactory`] creates it lazily when the first
//! peer comes online and releases it when the last one leaves.

use meshware_components::{ComponentLoader, ModuleLoader, VersionManager};
use meshware_core::{anonymize, BusEvent, DeviceInfo, DhType, EventBus, TaskParam, TaskType};
use meshware_store::StoreProvider;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::capability_info_manager::CapabilityInfoManager;
use crate::component_manager::ComponentManager;
use crate::config::FwkConfig;
use crate::context::DhContext;
use crate::dump;
use crate::error::{FwkError, Result};
use crate::local_hardware_manager::LocalHardwareManager;
use crate::task::TaskEnv;
use crate::task_board::TaskBoard;
use crate::task_executor::{TaskDispatcher, TaskExecutor};
use crate::task_factory::TaskFactory;
use crate::version_info_manager::VersionInfoManager;

/// Upper bound on networkId and uuid length
pub const MAX_ID_LEN: usize = 256;

/// Everything needed to bring up a framework instance
#[derive(Clone)]
pub struct ManagerOptions {
    pub config: FwkConfig,
    pub local: DeviceInfo,
    pub manifest_path: PathBuf,
    pub modules: Arc<dyn ModuleLoader>,
    pub store: Arc<dyn StoreProvider>,
}

pub struct DistributedHardwareManager {
    pub(crate) config: FwkConfig,
    pub(crate) context: Arc<DhContext>,
    pub(crate) board: Arc<TaskBoard>,
    pub(crate) dispatcher: Arc<TaskDispatcher>,
    pub(crate) executor: Arc<TaskExecutor>,
    pub(crate) loader: Arc<ComponentLoader>,
    pub(crate) versions: Arc<VersionManager>,
    pub(crate) version_infos: Arc<VersionInfoManager>,
    pub(crate) capabilities: Arc<CapabilityInfoManager>,
    pub(crate) local_hardware: LocalHardwareManager,
    pub(crate) components: Arc<ComponentManager>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl DistributedHardwareManager {
    /// Build and initialize every subsystem, unwinding on failure
    pub async fn initialize(context: Arc<DhContext>, options: &ManagerOptions) -> Result<Arc<Self>> {
        info!("DistributedHardwareManager initialize");
        let config = options.config.clone();
        let bus = context.bus().clone();

        let board = Arc::new(TaskBoard::new(bus.clone()));
        let (executor, rx) = TaskExecutor::new(
            config.queue_capacity,
            config.max_workers,
            board.clone(),
            bus.clone(),
        );
        let executor = Arc::new(executor);
        let dispatcher = Arc::new(TaskDispatcher::new(
            TaskFactory::new(board.clone()),
            executor.clone(),
        ));
        let loader = Arc::new(ComponentLoader::new(
            options.manifest_path.clone(),
            options.modules.clone(),
        ));
        let versions = Arc::new(VersionManager::new());
        let version_infos = VersionInfoManager::new(
            context.clone(),
            versions.clone(),
            options.store.clone(),
            config.store.clone(),
        );
        let capabilities = CapabilityInfoManager::new(
            context.clone(),
            dispatcher.clone(),
            options.store.clone(),
            config.store.clone(),
        );
        let local_hardware = LocalHardwareManager::new(
            loader.clone(),
            capabilities.clone(),
            context.local_device().clone(),
        );
        let components = ComponentManager::new(
            config.clone(),
            context.clone(),
            loader.clone(),
            versions.clone(),
            version_infos.clone(),
            capabilities.clone(),
            board.clone(),
            dispatcher.clone(),
        );

        let manager = Arc::new(Self {
            config,
            context,
            board,
            dispatcher,
            executor,
            loader,
            versions,
            version_infos,
            capabilities,
            local_hardware,
            components,
            consumer: Mutex::new(None),
        });
        manager.start_executor(rx);

        if let Err(e) = manager.init_subsystems().await {
            error!("DistributedHardwareManager initialize failed: {}", e);
            manager.release().await;
            return Err(e);
        }
        info!("DistributedHardwareManager initialized");
        Ok(manager)
    }

    fn start_executor(&self, rx: tokio::sync::mpsc::Receiver<Arc<crate::task::Task>>) {
        let env = Arc::new(TaskEnv {
            context: self.context.clone(),
            board: self.board.clone(),
            dispatcher: self.dispatcher.clone(),
            executor: self.executor.clone(),
            components: self.components.clone(),
            capabilities: self.capabilities.clone(),
            versions: self.version_infos.clone(),
        });
        *self.consumer.lock() = Some(self.executor.start(rx, env));
    }

    async fn init_subsystems(&self) -> Result<()> {
        self.version_infos.init().await?;
        self.loader.init()?;

        let local = self.context.local_device();
        self.versions.init(&self.loader, &local.uuid);
        match self.versions.get_dh_version(&local.uuid) {
            Ok(version) => {
                if let Err(e) = self
                    .version_infos
                    .add_version(&version.to_version_info(&local.device_id))
                {
                    warn!("Publishing local version failed: {}", e);
                }
            }
            Err(e) => warn!("Local version unavailable: {}", e),
        }

        self.capabilities.init().await?;
        self.local_hardware.init();
        self.components.init().await?;
        Ok(())
    }

    /// Wait for in-flight tasks, then tear down in reverse init order
    pub async fn release(&self) {
        info!("DistributedHardwareManager release");
        if let Err(e) = self
            .board
            .wait_for_all_tasks_finish(self.config.wait_all_timeout)
            .await
        {
            warn!("Release proceeds with tasks pending: {}", e);
        }
        self.executor.stop();
        let consumer = self.consumer.lock().take();
        if let Some(consumer) = consumer {
            if let Err(e) = consumer.await {
                error!("Task executor ended abnormally: {}", e);
            }
        }

        self.components.uninit().await;
        self.local_hardware.uninit();
        self.capabilities.uninit();
        self.versions.uninit();
        self.loader.uninit();
        self.version_infos.uninit();
    }

    pub fn send_online_event(&self, network_id: &str, uuid: &str) -> Result<()> {
        let param = TaskParam::for_device(network_id, uuid);
        self.dispatcher.dispatch(TaskType::OnLine, param, None)?;
        Ok(())
    }

    pub fn send_offline_event(&self, network_id: &str, uuid: &str) -> Result<()> {
        let param = TaskParam::for_device(network_id, uuid);
        self.dispatcher.dispatch(TaskType::OffLine, param, None)?;
        Ok(())
    }

    /// Sink version of each locally loaded component type
    pub fn get_component_version(&self) -> Result<BTreeMap<DhType, String>> {
        let version = self
            .versions
            .get_dh_version(&self.context.local_device().uuid)?;
        Ok(version
            .comp_versions
            .into_iter()
            .map(|(dh_type, comp)| (dh_type, comp.sink_version))
            .collect())
    }

    /// Loaded sources and sinks paired with their local versions
    pub fn loaded_components(&self) -> (Vec<(DhType, String)>, Vec<(DhType, String)>) {
        let versions = self.loader.get_local_comp_versions();
        let (sources, sinks) = self.components.dump_loaded_comps();
        let pair = |dh_type: DhType, sink: bool| {
            let comp = versions.get(&dh_type);
            let version = comp
                .map(|c| if sink { c.sink_version.clone() } else { c.source_version.clone() })
                .unwrap_or_default();
            (dh_type, version)
        };
        (
            sources.into_iter().map(|t| pair(t, false)).collect(),
            sinks.into_iter().map(|t| pair(t, true)).collect(),
        )
    }

    pub fn board(&self) -> &Arc<TaskBoard> {
        &self.board
    }

    pub fn capabilities(&self) -> &Arc<CapabilityInfoManager> {
        &self.capabilities
    }

    pub fn components(&self) -> &Arc<ComponentManager> {
        &self.components
    }
}

fn check_id(name: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.len() > MAX_ID_LEN {
        return Err(FwkError::ParamInvalid(format!("{} length {}", name, value.len())));
    }
    Ok(())
}

/// Entry point for device online/offline notifications.
///
/// Online, offline, initialization and release are serialized.
pub struct DistributedHardwareManagerFactory {
    options: ManagerOptions,
    context: Arc<DhContext>,
    manager: tokio::sync::Mutex<Option<Arc<DistributedHardwareManager>>>,
}

impl DistributedHardwareManagerFactory {
    pub fn new(options: ManagerOptions, bus: Arc<EventBus>) -> Self {
        let context = Arc::new(DhContext::new(options.local.clone(), bus));
        Self {
            options,
            context,
            manager: tokio::sync::Mutex::new(None),
        }
    }

    pub fn context(&self) -> &Arc<DhContext> {
        &self.context
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        self.context.bus()
    }

    /// The running framework, or None before the first peer comes online
    pub async fn manager(&self) -> Option<Arc<DistributedHardwareManager>> {
        self.manager.lock().await.clone()
    }

    pub async fn is_initialized(&self) -> bool {
        self.manager.lock().await.is_some()
    }

    /// Initialize the framework if it is not running yet
    pub async fn initialize(&self) -> Result<Arc<DistributedHardwareManager>> {
        let mut guard = self.manager.lock().await;
        self.initialize_locked(&mut guard).await
    }

    async fn initialize_locked(
        &self,
        slot: &mut Option<Arc<DistributedHardwareManager>>,
    ) -> Result<Arc<DistributedHardwareManager>> {
        if let Some(manager) = slot.as_ref() {
            return Ok(manager.clone());
        }
        let manager = DistributedHardwareManager::initialize(self.context.clone(), &self.options).await?;
        *slot = Some(manager.clone());
        Ok(manager)
    }

    /// Release the framework if it is running
    pub async fn release(&self) {
        let mut guard = self.manager.lock().await;
        if let Some(manager) = guard.take() {
            manager.release().await;
        }
    }

    pub async fn send_online_event(&self, network_id: &str, uuid: &str, device_type: u16) -> Result<()> {
        check_id("networkId", network_id)?;
        check_id("uuid", uuid)?;

        let mut guard = self.manager.lock().await;
        if self.context.is_device_online(uuid) {
            warn!("Device {} already online", anonymize(uuid));
            return Err(FwkError::RepeatOnline);
        }
        info!(
            "Online event, networkId: {}, uuid: {}, deviceType: {}",
            anonymize(network_id),
            anonymize(uuid),
            device_type
        );
        let manager = self.initialize_locked(&mut guard).await?;

        self.context.add_online_device(uuid, network_id);
        manager.capabilities.create_manual_sync_count(network_id);
        manager.version_infos.create_manual_sync_count(network_id);
        if let Err(e) = manager.send_online_event(network_id, uuid) {
            error!("Online task for {} not queued: {}", anonymize(uuid), e);
            self.context.remove_online_device(uuid);
            manager.capabilities.remove_manual_sync_count(network_id);
            manager.version_infos.remove_manual_sync_count(network_id);
            return Err(e);
        }
        self.bus().publish(BusEvent::DeviceOnline {
            network_id: network_id.to_string(),
            uuid: uuid.to_string(),
        });
        Ok(())
    }

    pub async fn send_offline_event(&self, network_id: &str, uuid: &str, device_type: u16) -> Result<()> {
        check_id("networkId", network_id)?;
        check_id("uuid", uuid)?;

        let mut guard = self.manager.lock().await;
        if !self.context.is_device_online(uuid) {
            warn!("Device {} is not online", anonymize(uuid));
            return Err(FwkError::NotOnline);
        }
        let Some(manager) = guard.clone() else {
            return Err(FwkError::NotOnline);
        };
        info!(
            "Offline event, networkId: {}, uuid: {}, deviceType: {}",
            anonymize(network_id),
            anonymize(uuid),
            device_type
        );

        if let Err(e) = manager.send_offline_event(network_id, uuid) {
            error!("Offline task for {} not queued: {}", anonymize(uuid), e);
        }
        self.context.remove_online_device(uuid);
        manager.capabilities.remove_manual_sync_count(network_id);
        manager.version_infos.remove_manual_sync_count(network_id);
        self.bus().publish(BusEvent::DeviceOffline {
            network_id: network_id.to_string(),
            uuid: uuid.to_string(),
        });

        if self.context.online_count() == 0 {
            info!("No device online, releasing framework");
            manager.release().await;
            *guard = None;
        }
        Ok(())
    }

    pub async fn get_component_version(&self) -> Result<BTreeMap<DhType, String>> {
        match self.manager().await {
            Some(manager) => manager.get_component_version(),
            None => Err(FwkError::NotInitialized),
        }
    }

    pub async fn dump(&self, args: &[String]) -> Result<String> {
        let manager = self.manager().await;
        dump::dump(args, manager.as_deref())
    }

    /// Route a system ability death to the component monitor
    pub async fn on_system_ability_died(&self, sa_id: i32) -> bool {
        match self.manager().await {
            Some(manager) => manager.components.monitor().on_system_ability_died(sa_id),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        test_config, peer_version, put_peer_capabilities, wait_for, Reply, TestModules,
    };
    use crate::capability_info_manager::CAPABILITY_STORE_ID;
    use crate::version_info_manager::VERSION_STORE_ID;
    use meshware_core::{device_id_from_uuid, TaskState};
    use meshware_store::{KvStore, MemoryStoreProvider};
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::sync::broadcast;

    struct Harness {
        factory: DistributedHardwareManagerFactory,
        provider: Arc<MemoryStoreProvider>,
        modules: TestModules,
        _manifest: tempfile::NamedTempFile,
    }

    fn harness() -> Harness {
        let modules = TestModules::new();
        let manifest = modules.manifest();
        let provider = Arc::new(MemoryStoreProvider::new());
        let options = ManagerOptions {
            config: test_config(),
            local: DeviceInfo::new("local-uuid", "local", 0x0E),
            manifest_path: manifest.path().to_path_buf(),
            modules: Arc::new(modules.loader()),
            store: provider.clone(),
        };
        Harness {
            factory: DistributedHardwareManagerFactory::new(options, EventBus::start()),
            provider,
            modules,
            _manifest: manifest,
        }
    }

    async fn next_finished(events: &mut broadcast::Receiver<BusEvent>, of: TaskType) -> TaskState {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Ok(BusEvent::TaskFinished { task_type, state, .. }) if task_type == of => {
                        return state
                    }
                    Ok(_) => continue,
                    Err(e) => panic!("bus closed: {}", e),
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_id_validation() {
        let h = harness();
        let long = "x".repeat(MAX_ID_LEN + 1);
        assert!(matches!(
            h.factory.send_online_event("", "uuid", 0).await,
            Err(FwkError::ParamInvalid(_))
        ));
        assert!(matches!(
            h.factory.send_online_event("net", &long, 0).await,
            Err(FwkError::ParamInvalid(_))
        ));
        assert!(matches!(
            h.factory.send_offline_event("net", "", 0).await,
            Err(FwkError::ParamInvalid(_))
        ));
        assert!(!h.factory.is_initialized().await);
    }

    #[tokio::test]
    async fn test_online_initializes_and_rejects_repeat() {
        let h = harness();
        h.factory.send_online_event("net-1", "peer-uuid", 0x0E).await.unwrap();
        assert!(h.factory.is_initialized().await);
        assert!(h.factory.context().is_device_online("peer-uuid"));
        assert!(matches!(
            h.factory.send_online_event("net-1", "peer-uuid", 0x0E).await,
            Err(FwkError::RepeatOnline)
        ));
    }

    #[tokio::test]
    async fn test_offline_of_unknown_device() {
        let h = harness();
        assert!(matches!(
            h.factory.send_offline_event("net-1", "peer-uuid", 0x0E).await,
            Err(FwkError::NotOnline)
        ));
    }

    #[tokio::test]
    async fn test_last_offline_releases() {
        let h = harness();
        h.factory.send_online_event("net-1", "peer-a", 0x0E).await.unwrap();
        h.factory.send_online_event("net-2", "peer-b", 0x0E).await.unwrap();

        h.factory.send_offline_event("net-1", "peer-a", 0x0E).await.unwrap();
        assert!(h.factory.is_initialized().await);

        h.factory.send_offline_event("net-2", "peer-b", 0x0E).await.unwrap();
        assert!(!h.factory.is_initialized().await);
        assert_eq!(h.modules.camera_source.releases.load(Ordering::SeqCst), 1);
        assert_eq!(h.modules.input_sink.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_component_version_requires_init() {
        let h = harness();
        assert!(matches!(
            h.factory.get_component_version().await,
            Err(FwkError::NotInitialized)
        ));
        h.factory.initialize().await.unwrap();
        let versions = h.factory.get_component_version().await.unwrap();
        assert_eq!(versions.get(&DhType::Camera).map(String::as_str), Some("1.2"));
        assert_eq!(versions.get(&DhType::Input).map(String::as_str), Some("2.2"));
    }

    #[tokio::test]
    async fn test_init_fails_without_manifest() {
        let modules = TestModules::new();
        let options = ManagerOptions {
            config: test_config(),
            local: DeviceInfo::new("local-uuid", "local", 0x0E),
            manifest_path: PathBuf::from("/nonexistent/meshware/components.json"),
            modules: Arc::new(modules.loader()),
            store: Arc::new(MemoryStoreProvider::new()),
        };
        let factory = DistributedHardwareManagerFactory::new(options, EventBus::start());
        assert!(factory.send_online_event("net-1", "peer-uuid", 0).await.is_err());
        assert!(!factory.is_initialized().await);
        assert!(!factory.context().is_device_online("peer-uuid"));
    }

    #[tokio::test]
    async fn test_online_enables_every_stored_capability() {
        let h = harness();
        let device_id = device_id_from_uuid("peer-uuid");
        let caps = h.provider.store(CAPABILITY_STORE_ID);
        put_peer_capabilities(&*caps, &device_id, 5);
        h.provider
            .store(VERSION_STORE_ID)
            .put(&device_id, &peer_version(&device_id).to_json_string())
            .unwrap();
        h.modules.camera_source.set_reply(Reply::Silent);

        let mut events = h.factory.bus().subscribe();
        h.factory.send_online_event("net-1", "peer-uuid", 0x0E).await.unwrap();

        let mut enables = 0;
        let mut online_state = None;
        tokio::time::timeout(Duration::from_secs(5), async {
            while enables < 5 || online_state.is_none() {
                match events.recv().await {
                    Ok(BusEvent::TaskCreated { task_type: TaskType::Enable, .. }) => enables += 1,
                    Ok(BusEvent::TaskFinished { task_type: TaskType::OnLine, state, .. }) => {
                        online_state = Some(state)
                    }
                    Ok(_) => continue,
                    Err(e) => panic!("bus closed: {}", e),
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(enables, 5);
        assert_eq!(online_state, Some(TaskState::Success));
    }

    #[tokio::test]
    async fn test_online_then_offline_unregisters_everything() {
        let h = harness();
        let device_id = device_id_from_uuid("peer-uuid");
        put_peer_capabilities(&*h.provider.store(CAPABILITY_STORE_ID), &device_id, 3);
        h.provider
            .store(VERSION_STORE_ID)
            .put(&device_id, &peer_version(&device_id).to_json_string())
            .unwrap();
        h.factory.send_online_event("net-1", "peer-a", 0x0E).await.unwrap();

        let mut events = h.factory.bus().subscribe();
        h.factory.send_online_event("net-2", "peer-uuid", 0x0E).await.unwrap();
        assert_eq!(next_finished(&mut events, TaskType::OnLine).await, TaskState::Success);

        let source = h.modules.camera_source.clone();
        assert!(wait_for(|| source.register_acks.load(Ordering::SeqCst) == 3).await);

        h.factory.send_offline_event("net-2", "peer-uuid", 0x0E).await.unwrap();
        assert_eq!(next_finished(&mut events, TaskType::OffLine).await, TaskState::Success);
        assert_eq!(source.unregister_acks.load(Ordering::SeqCst), 3);

        let manager = h.factory.manager().await.unwrap();
        assert!(manager.capabilities.get_capabilities_by_device_id(&device_id).is_empty());
        assert!(wait_for(|| manager.board.get_enabled_devices().is_empty()).await);
    }

    #[tokio::test]
    async fn test_dump_before_and_after_init() {
        let h = harness();
        let tasks = h.factory.dump(&["-t".to_string()]).await.unwrap();
        assert_eq!(tasks, "All execute task list:");

        h.factory.initialize().await.unwrap();
        let loaded = h.factory.dump(&["-l".to_string()]).await.unwrap();
        assert!(loaded.contains(" CAMERA_1.1"));
        assert!(loaded.contains(" INPUT_2.2"));
        assert!(matches!(
            h.factory.dump(&["-x".to_string()]).await,
            Err(FwkError::InvalidDumpArgs)
        ));
    }

    #[tokio::test]
    async fn test_system_ability_death_routes_to_monitor() {
        let h = harness();
        assert!(!h.factory.on_system_ability_died(crate::test_support::CAMERA_SOURCE_SA).await);
        h.factory.initialize().await.unwrap();
        assert!(h.factory.on_system_ability_died(crate::test_support::CAMERA_SOURCE_SA).await);
    }
}
