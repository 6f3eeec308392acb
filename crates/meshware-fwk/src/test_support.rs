//! Fake component modules and a running framework for unit tests

use meshware_components::{
    DhItem, EnableParam, HardwareHandler, ModuleResult, PluginListener, RegisterCallback,
    SinkModule, SourceModule, StaticModuleLoader, UnregisterCallback,
};
use meshware_core::{
    device_id_from_uuid, BusEvent, CapabilityInfo, CompVersion, DeviceInfo, DhType, EventBus,
    TaskType, VersionInfo,
};
use meshware_store::{DbAdapterConfig, KvStore, MemoryKvStore, MemoryStoreProvider};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::sync::broadcast;

use crate::config::FwkConfig;
use crate::context::DhContext;
use crate::manager::{DistributedHardwareManager, DistributedHardwareManagerFactory, ManagerOptions};

pub(crate) const CAMERA_SOURCE_SA: i32 = 4803;
pub(crate) const INPUT_SOURCE_SA: i32 = 4809;

/// How a fake source answers register/unregister calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reply {
    Success,
    Status(i32),
    /// Keep the callback and never answer
    Silent,
}

pub(crate) struct FakeSource {
    reply: Mutex<Reply>,
    unregister_reply: Mutex<Reply>,
    last_param: Mutex<Option<EnableParam>>,
    held_registers: Mutex<Vec<Arc<dyn RegisterCallback>>>,
    held_unregisters: Mutex<Vec<Arc<dyn UnregisterCallback>>>,
    pub inits: AtomicU32,
    pub releases: AtomicU32,
    pub registers: AtomicU32,
    pub register_acks: AtomicU32,
    pub unregisters: AtomicU32,
    pub unregister_acks: AtomicU32,
}

impl FakeSource {
    fn new() -> Self {
        Self {
            reply: Mutex::new(Reply::Success),
            unregister_reply: Mutex::new(Reply::Success),
            last_param: Mutex::new(None),
            held_registers: Mutex::new(Vec::new()),
            held_unregisters: Mutex::new(Vec::new()),
            inits: AtomicU32::new(0),
            releases: AtomicU32::new(0),
            registers: AtomicU32::new(0),
            register_acks: AtomicU32::new(0),
            unregisters: AtomicU32::new(0),
            unregister_acks: AtomicU32::new(0),
        }
    }

    pub fn set_reply(&self, reply: Reply) {
        *self.reply.lock() = reply;
    }

    pub fn set_unregister_reply(&self, reply: Reply) {
        *self.unregister_reply.lock() = reply;
    }

    pub fn last_param(&self) -> Option<EnableParam> {
        self.last_param.lock().clone()
    }
}

impl SourceModule for FakeSource {
    fn init_source(&self, _params: &str) -> ModuleResult<()> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release_source(&self) -> ModuleResult<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn register_distributed_hardware(
        &self,
        network_id: &str,
        dh_id: &str,
        param: &EnableParam,
        callback: Arc<dyn RegisterCallback>,
    ) -> ModuleResult<()> {
        self.registers.fetch_add(1, Ordering::SeqCst);
        *self.last_param.lock() = Some(param.clone());
        let reply = *self.reply.lock();
        match reply {
            Reply::Success => {
                self.register_acks.fetch_add(1, Ordering::SeqCst);
                callback.on_register_result(network_id, dh_id, 0, "");
            }
            Reply::Status(status) => callback.on_register_result(network_id, dh_id, status, ""),
            Reply::Silent => self.held_registers.lock().push(callback),
        }
        Ok(())
    }

    fn unregister_distributed_hardware(
        &self,
        network_id: &str,
        dh_id: &str,
        callback: Arc<dyn UnregisterCallback>,
    ) -> ModuleResult<()> {
        self.unregisters.fetch_add(1, Ordering::SeqCst);
        let reply = *self.unregister_reply.lock();
        match reply {
            Reply::Success => {
                self.unregister_acks.fetch_add(1, Ordering::SeqCst);
                callback.on_unregister_result(network_id, dh_id, 0, "");
            }
            Reply::Status(status) => callback.on_unregister_result(network_id, dh_id, status, ""),
            Reply::Silent => self.held_unregisters.lock().push(callback),
        }
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeSink {
    pub inits: AtomicU32,
    pub releases: AtomicU32,
}

impl SinkModule for FakeSink {
    fn init_sink(&self, _params: &str) -> ModuleResult<()> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn release_sink(&self) -> ModuleResult<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Handler reporting fixed items and supporting hot-plug
pub(crate) struct FakeHandler {
    items: Vec<DhItem>,
    listener: Mutex<Option<Arc<dyn PluginListener>>>,
}

impl FakeHandler {
    fn new(items: Vec<DhItem>) -> Self {
        Self {
            items,
            listener: Mutex::new(None),
        }
    }

    pub fn plug(&self, dh_id: &str, attrs: &str) {
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener.plugin_hardware(dh_id, attrs);
        }
    }

    pub fn unplug(&self, dh_id: &str) {
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener.unplug_hardware(dh_id);
        }
    }
}

impl HardwareHandler for FakeHandler {
    fn initialize(&self) -> ModuleResult<()> {
        Ok(())
    }

    fn query(&self) -> Vec<DhItem> {
        self.items.clone()
    }

    fn is_support_plugin(&self) -> bool {
        true
    }

    fn register_plugin_listener(&self, listener: Arc<dyn PluginListener>) {
        *self.listener.lock() = Some(listener);
    }

    fn unregister_plugin_listener(&self) {
        *self.listener.lock() = None;
    }
}

/// Camera with a handler, input without one
pub(crate) struct TestModules {
    pub camera_handler: Arc<FakeHandler>,
    pub camera_source: Arc<FakeSource>,
    pub camera_sink: Arc<FakeSink>,
    pub input_source: Arc<FakeSource>,
    pub input_sink: Arc<FakeSink>,
}

const MANIFEST: &str = r#"{
    "Distributed_Components": [
        {
            "name": "camera", "type": "camera",
            "comp_handler_loc": "camera_handler", "comp_handler_version": "1.0",
            "comp_source_loc": "camera_source", "comp_source_version": "1.1",
            "comp_source_sa_id": 4803,
            "comp_sink_loc": "camera_sink", "comp_sink_version": "1.2",
            "comp_sink_sa_id": 4804
        },
        {
            "name": "input", "type": "input",
            "comp_handler_loc": "input_handler", "comp_handler_version": "2.0",
            "comp_source_loc": "input_source", "comp_source_version": "2.1",
            "comp_source_sa_id": 4809,
            "comp_sink_loc": "input_sink", "comp_sink_version": "2.2",
            "comp_sink_sa_id": 4810
        }
    ]
}"#;

impl TestModules {
    pub fn new() -> Self {
        let local_camera = DhItem {
            dh_id: "camera_local".to_string(),
            attrs: r#"{"width":1920}"#.to_string(),
        };
        Self {
            camera_handler: Arc::new(FakeHandler::new(vec![local_camera])),
            camera_source: Arc::new(FakeSource::new()),
            camera_sink: Arc::new(FakeSink::default()),
            input_source: Arc::new(FakeSource::new()),
            input_sink: Arc::new(FakeSink::default()),
        }
    }

    pub fn loader(&self) -> StaticModuleLoader {
        let mut loader = StaticModuleLoader::new();
        let handler = self.camera_handler.clone();
        loader.register_handler("camera_handler", move || handler.clone() as Arc<dyn HardwareHandler>);
        let source = self.camera_source.clone();
        loader.register_source("camera_source", move || source.clone() as Arc<dyn SourceModule>);
        let sink = self.camera_sink.clone();
        loader.register_sink("camera_sink", move || sink.clone() as Arc<dyn SinkModule>);
        let source = self.input_source.clone();
        loader.register_source("input_source", move || source.clone() as Arc<dyn SourceModule>);
        let sink = self.input_sink.clone();
        loader.register_sink("input_sink", move || sink.clone() as Arc<dyn SinkModule>);
        loader
    }

    pub fn manifest(&self) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(MANIFEST.as_bytes()).unwrap();
        file
    }
}

pub(crate) fn test_config() -> FwkConfig {
    FwkConfig {
        queue_capacity: 64,
        max_workers: 4,
        wait_all_timeout: Duration::from_secs(2),
        enable_timeout: Duration::from_millis(500),
        disable_timeout: Duration::from_millis(200),
        retry_max_times: 3,
        param_retry_interval: Duration::from_millis(20),
        monitor_interval: Duration::from_secs(3600),
        store: DbAdapterConfig {
            init_retry_times: 3,
            init_retry_interval: Duration::from_millis(10),
            died_check_max_times: 50,
            died_check_interval: Duration::from_millis(10),
            manual_sync_max_times: 2,
            manual_sync_interval: Duration::from_millis(10),
        },
    }
}

/// Version record of a peer whose camera sink is 2.0
pub(crate) fn peer_version(device_id: &str) -> VersionInfo {
    let mut comp_versions = BTreeMap::new();
    for (dh_type, name, sink) in [(DhType::Camera, "camera", "2.0"), (DhType::Input, "input", "3.0")] {
        comp_versions.insert(
            dh_type,
            CompVersion {
                name: name.to_string(),
                dh_type,
                handler_version: "1.0".to_string(),
                source_version: "1.0".to_string(),
                sink_version: sink.to_string(),
            },
        );
    }
    VersionInfo {
        device_id: device_id.to_string(),
        dh_version: "1.0".to_string(),
        comp_versions,
    }
}

/// Write `count` camera records of a peer straight into a store partition
pub(crate) fn put_peer_capabilities(store: &MemoryKvStore, device_id: &str, count: usize) {
    for i in 0..count {
        let cap = CapabilityInfo::new(
            format!("camera_{}", i),
            device_id,
            "peer",
            0x0E,
            DhType::Camera,
            "{}",
        );
        store.put(&cap.key(), &cap.to_json_string()).unwrap();
    }
}

/// Mark a peer online with cached camera capabilities and a known version
pub(crate) fn online_peer(stack: &TestStack, uuid: &str, network_id: &str, dh_ids: &[&str]) {
    stack.context.add_online_device(uuid, network_id);
    let device_id = device_id_from_uuid(uuid);
    let caps = dh_ids
        .iter()
        .map(|dh_id| CapabilityInfo::new(*dh_id, device_id.clone(), "peer", 0x0E, DhType::Camera, "{}"))
        .collect();
    stack.manager.capabilities.add_capability_in_mem(caps);

    let info = peer_version(&device_id);
    stack.manager.version_infos.add_version(&info).unwrap();
    stack.manager.versions.add_dh_version(uuid, info.to_dh_version(uuid));
}

/// Poll `check` for up to five seconds
pub(crate) async fn wait_for(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..500 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

pub(crate) struct TestStack {
    pub factory: DistributedHardwareManagerFactory,
    pub manager: Arc<DistributedHardwareManager>,
    pub provider: Arc<MemoryStoreProvider>,
    pub context: Arc<DhContext>,
    pub bus: Arc<EventBus>,
    pub modules: TestModules,
    _manifest: NamedTempFile,
}

impl TestStack {
    pub async fn start() -> Self {
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
        let bus = EventBus::start();
        let factory = DistributedHardwareManagerFactory::new(options, bus.clone());
        let manager = factory.initialize().await.unwrap();
        let context = factory.context().clone();
        Self {
            factory,
            manager,
            provider,
            context,
            bus,
            modules,
            _manifest: manifest,
        }
    }

    /// Type of the next task put on the board
    pub async fn next_created(&self, events: &mut broadcast::Receiver<BusEvent>) -> TaskType {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match events.recv().await {
                    Ok(BusEvent::TaskCreated { task_type, .. }) => return task_type,
                    Ok(_) => continue,
                    Err(e) => panic!("bus closed: {}", e),
                }
            }
        })
        .await
        .unwrap()
    }
}

#[test]
fn test_manifest_lists_both_types() {
    let configs = meshware_components::parse_manifest(MANIFEST).unwrap();
    let types: Vec<DhType> = configs.iter().map(|c| c.dh_type()).collect();
    assert_eq!(types, vec![DhType::Camera, DhType::Input]);
    assert_eq!(configs[1].source_sa_id, INPUT_SOURCE_SA);
}
