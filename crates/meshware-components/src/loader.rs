//! Component loader
//!
//! Parses the manifest and resolves the handler, source and sink module of
//! every listed hardware type through a [`ModuleLoader`].

use libloading::Library;
use meshware_core::{CompVersion, DhType};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::LoaderError;
use crate::manifest::{read_manifest, CompConfig};
use crate::module::{
    HardwareHandler, HardwareHandlerEntryFn, SinkEntryFn, SinkModule, SourceEntryFn,
    SourceModule, HARDWARE_HANDLER_SYMBOL, SINK_SYMBOL, SOURCE_SYMBOL,
};

/// Resolves module locations from the manifest into trait objects
pub trait ModuleLoader: Send + Sync {
    fn load_handler(&self, loc: &str) -> Option<Arc<dyn HardwareHandler>>;
    fn load_source(&self, loc: &str) -> Option<Arc<dyn SourceModule>>;
    fn load_sink(&self, loc: &str) -> Option<Arc<dyn SinkModule>>;
}

/// Loads modules from shared libraries
///
/// Libraries stay mapped until the loader is dropped, so module objects
/// handed out never outlive their code.
pub struct DylibLoader {
    module_dir: PathBuf,
    libraries: Mutex<HashMap<PathBuf, Arc<Library>>>,
}

impl DylibLoader {
    pub fn new(module_dir: impl Into<PathBuf>) -> Self {
        Self {
            module_dir: module_dir.into(),
            libraries: Mutex::new(HashMap::new()),
        }
    }

    fn resolve(&self, loc: &str) -> PathBuf {
        let path = Path::new(loc);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.module_dir.join(path)
        }
    }

    fn open(&self, loc: &str) -> Option<Arc<Library>> {
        if loc.is_empty() {
            return None;
        }
        let path = self.resolve(loc);
        let mut libraries = self.libraries.lock();
        if let Some(lib) = libraries.get(&path) {
            return Some(lib.clone());
        }
        // SAFETY: the manifest names libraries built against the module ABI;
        // their initializers are trusted like any other linked code.
        match unsafe { Library::new(&path) } {
            Ok(lib) => {
                debug!("Loaded module library {:?}", path);
                let lib = Arc::new(lib);
                libraries.insert(path, lib.clone());
                Some(lib)
            }
            Err(e) => {
                warn!("Failed to load module library {:?}: {}", path, e);
                None
            }
        }
    }
}

impl ModuleLoader for DylibLoader {
    fn load_handler(&self, loc: &str) -> Option<Arc<dyn HardwareHandler>> {
        let lib = self.open(loc)?;
        // SAFETY: the symbol is declared with the HardwareHandlerEntryFn signature.
        unsafe {
            match lib.get::<HardwareHandlerEntryFn>(HARDWARE_HANDLER_SYMBOL.as_bytes()) {
                Ok(entry) => Some(Arc::from(entry())),
                Err(e) => {
                    warn!("Missing entry point '{}' in {}: {}", HARDWARE_HANDLER_SYMBOL, loc, e);
                    None
                }
            }
        }
    }

    fn load_source(&self, loc: &str) -> Option<Arc<dyn SourceModule>> {
        let lib = self.open(loc)?;
        // SAFETY: the symbol is declared with the SourceEntryFn signature.
        unsafe {
            match lib.get::<SourceEntryFn>(SOURCE_SYMBOL.as_bytes()) {
                Ok(entry) => Some(Arc::from(entry())),
                Err(e) => {
                    warn!("Missing entry point '{}' in {}: {}", SOURCE_SYMBOL, loc, e);
                    None
                }
            }
        }
    }

    fn load_sink(&self, loc: &str) -> Option<Arc<dyn SinkModule>> {
        let lib = self.open(loc)?;
        // SAFETY: the symbol is declared with the SinkEntryFn signature.
        unsafe {
            match lib.get::<SinkEntryFn>(SINK_SYMBOL.as_bytes()) {
                Ok(entry) => Some(Arc::from(entry())),
                Err(e) => {
                    warn!("Missing entry point '{}' in {}: {}", SINK_SYMBOL, loc, e);
                    None
                }
            }
        }
    }
}

type HandlerFactory = Box<dyn Fn() -> Arc<dyn HardwareHandler> + Send + Sync>;
type SourceFactory = Box<dyn Fn() -> Arc<dyn SourceModule> + Send + Sync>;
type SinkFactory = Box<dyn Fn() -> Arc<dyn SinkModule> + Send + Sync>;

/// Modules compiled into the process, keyed by manifest location
#[derive(Default)]
pub struct StaticModuleLoader {
    handlers: HashMap<String, HandlerFactory>,
    sources: HashMap<String, SourceFactory>,
    sinks: HashMap<String, SinkFactory>,
}

impl StaticModuleLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_handler<F>(&mut self, loc: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn HardwareHandler> + Send + Sync + 'static,
    {
        self.handlers.insert(loc.into(), Box::new(factory));
    }

    pub fn register_source<F>(&mut self, loc: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn SourceModule> + Send + Sync + 'static,
    {
        self.sources.insert(loc.into(), Box::new(factory));
    }

    pub fn register_sink<F>(&mut self, loc: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn SinkModule> + Send + Sync + 'static,
    {
        self.sinks.insert(loc.into(), Box::new(factory));
    }
}

impl ModuleLoader for StaticModuleLoader {
    fn load_handler(&self, loc: &str) -> Option<Arc<dyn HardwareHandler>> {
        self.handlers.get(loc).map(|f| f())
    }

    fn load_source(&self, loc: &str) -> Option<Arc<dyn SourceModule>> {
        self.sources.get(loc).map(|f| f())
    }

    fn load_sink(&self, loc: &str) -> Option<Arc<dyn SinkModule>> {
        self.sinks.get(loc).map(|f| f())
    }
}

/// Loaded modules of one hardware type
#[derive(Clone)]
pub struct CompHandler {
    pub dh_type: DhType,
    pub config: CompConfig,
    pub handler: Option<Arc<dyn HardwareHandler>>,
    pub source: Option<Arc<dyn SourceModule>>,
    pub sink: Option<Arc<dyn SinkModule>>,
}

impl CompHandler {
    pub fn source_sa_id(&self) -> i32 {
        self.config.source_sa_id
    }

    pub fn sink_sa_id(&self) -> i32 {
        self.config.sink_sa_id
    }
}

/// Owns one [`CompHandler`] per manifest record
pub struct ComponentLoader {
    manifest_path: PathBuf,
    modules: Arc<dyn ModuleLoader>,
    handlers: RwLock<BTreeMap<DhType, CompHandler>>,
}

impl ComponentLoader {
    pub fn new(manifest_path: impl Into<PathBuf>, modules: Arc<dyn ModuleLoader>) -> Self {
        Self {
            manifest_path: manifest_path.into(),
            modules,
            handlers: RwLock::new(BTreeMap::new()),
        }
    }

    /// Parse the manifest and resolve every module it lists
    pub fn init(&self) -> Result<(), LoaderError> {
        info!("Loading component manifest {:?}", self.manifest_path);
        let configs = read_manifest(&self.manifest_path)?;
        self.init_with_configs(configs);
        Ok(())
    }

    pub fn init_with_configs(&self, configs: Vec<CompConfig>) {
        let mut handlers = BTreeMap::new();
        for config in configs {
            let dh_type = config.dh_type();
            let comp = CompHandler {
                dh_type,
                handler: self.modules.load_handler(&config.handler_loc),
                source: self.modules.load_source(&config.source_loc),
                sink: self.modules.load_sink(&config.sink_loc),
                config,
            };
            info!(
                "Component {}: handler={}, source={}, sink={}",
                dh_type,
                comp.handler.is_some(),
                comp.source.is_some(),
                comp.sink.is_some()
            );
            handlers.insert(dh_type, comp);
        }
        *self.handlers.write() = handlers;
    }

    pub fn uninit(&self) {
        info!("Releasing loaded components");
        self.handlers.write().clear();
    }

    pub fn is_initialized(&self) -> bool {
        !self.handlers.read().is_empty()
    }

    pub fn comp_handler(&self, dh_type: DhType) -> Option<CompHandler> {
        self.handlers.read().get(&dh_type).cloned()
    }

    pub fn get_hardware_handler(&self, dh_type: DhType) -> Option<Arc<dyn HardwareHandler>> {
        self.handlers.read().get(&dh_type)?.handler.clone()
    }

    pub fn get_source(&self, dh_type: DhType) -> Option<Arc<dyn SourceModule>> {
        self.handlers.read().get(&dh_type)?.source.clone()
    }

    pub fn get_sink(&self, dh_type: DhType) -> Option<Arc<dyn SinkModule>> {
        self.handlers.read().get(&dh_type)?.sink.clone()
    }

    /// Types listed in the manifest, in bit order
    pub fn get_all_comp_types(&self) -> Vec<DhType> {
        self.handlers.read().keys().copied().collect()
    }

    pub fn get_source_sa_id(&self, dh_type: DhType) -> Option<i32> {
        self.handlers.read().get(&dh_type).map(|c| c.source_sa_id())
    }

    /// Hardware type whose source runs under the given system ability
    pub fn get_dh_type_by_source_sa_id(&self, sa_id: i32) -> Option<DhType> {
        self.handlers
            .read()
            .values()
            .find(|c| c.source_sa_id() == sa_id)
            .map(|c| c.dh_type)
    }

    /// Manifest versions of all loaded types
    pub fn get_local_comp_versions(&self) -> BTreeMap<DhType, CompVersion> {
        self.handlers
            .read()
            .iter()
            .map(|(t, c)| (*t, c.config.comp_version()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{DhItem, EnableParam, ModuleResult, RegisterCallback, UnregisterCallback};
    use std::io::Write;

    struct NullHandler;

    impl HardwareHandler for NullHandler {
        fn initialize(&self) -> ModuleResult<()> {
            Ok(())
        }

        fn query(&self) -> Vec<DhItem> {
            vec![]
        }
    }

    struct NullSource;

    impl SourceModule for NullSource {
        fn init_source(&self, _params: &str) -> ModuleResult<()> {
            Ok(())
        }

        fn release_source(&self) -> ModuleResult<()> {
            Ok(())
        }

        fn register_distributed_hardware(
            &self,
            _network_id: &str,
            _dh_id: &str,
            _param: &EnableParam,
            _callback: Arc<dyn RegisterCallback>,
        ) -> ModuleResult<()> {
            Ok(())
        }

        fn unregister_distributed_hardware(
            &self,
            _network_id: &str,
            _dh_id: &str,
            _callback: Arc<dyn UnregisterCallback>,
        ) -> ModuleResult<()> {
            Ok(())
        }
    }

    fn manifest_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"Distributed_Components": [
                {{"name": "camera", "type": "camera",
                  "comp_handler_loc": "camera_handler", "comp_handler_version": "1.0",
                  "comp_source_loc": "camera_source", "comp_source_version": "1.1",
                  "comp_source_sa_id": 4803,
                  "comp_sink_loc": "camera_sink", "comp_sink_version": "1.2",
                  "comp_sink_sa_id": 4804}},
                {{"name": "input", "type": "input",
                  "comp_handler_loc": "", "comp_handler_version": "1.0",
                  "comp_source_loc": "input_source", "comp_source_version": "2.1",
                  "comp_source_sa_id": 4809,
                  "comp_sink_loc": "", "comp_sink_version": "2.2",
                  "comp_sink_sa_id": 4810}}
            ]}}"#
        )
        .unwrap();
        file
    }

    #[test]
    fn test_static_modules_resolved_by_location() {
        let mut modules = StaticModuleLoader::new();
        modules.register_handler("camera_handler", || Arc::new(NullHandler));
        modules.register_source("camera_source", || Arc::new(NullSource));
        modules.register_source("input_source", || Arc::new(NullSource));

        let file = manifest_file();
        let loader = ComponentLoader::new(file.path(), Arc::new(modules));
        loader.init().unwrap();

        assert_eq!(loader.get_all_comp_types(), vec![DhType::Camera, DhType::Input]);
        assert!(loader.get_hardware_handler(DhType::Camera).is_some());
        assert!(loader.get_source(DhType::Camera).is_some());
        // sink not registered: absent, not an error
        assert!(loader.get_sink(DhType::Camera).is_none());
        assert!(loader.get_hardware_handler(DhType::Input).is_none());
        assert!(loader.get_source(DhType::Audio).is_none());

        assert_eq!(loader.get_dh_type_by_source_sa_id(4809), Some(DhType::Input));
        assert_eq!(loader.get_dh_type_by_source_sa_id(1), None);
        assert_eq!(loader.get_source_sa_id(DhType::Camera), Some(4803));

        let versions = loader.get_local_comp_versions();
        assert_eq!(versions[&DhType::Input].sink_version, "2.2");

        loader.uninit();
        assert!(!loader.is_initialized());
    }

    #[test]
    fn test_missing_library_is_absent() {
        let dir = tempfile::tempdir().unwrap();
        let file = manifest_file();
        let loader = ComponentLoader::new(file.path(), Arc::new(DylibLoader::new(dir.path())));
        loader.init().unwrap();

        assert_eq!(loader.get_all_comp_types().len(), 2);
        assert!(loader.get_source(DhType::Camera).is_none());
        assert!(loader.get_hardware_handler(DhType::Camera).is_none());
    }

    #[test]
    fn test_corrupt_manifest_is_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[1, 2").unwrap();
        let loader = ComponentLoader::new(file.path(), Arc::new(StaticModuleLoader::new()));
        assert!(loader.init().is_err());
        assert!(!loader.is_initialized());
    }
}
