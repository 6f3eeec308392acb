//! Meshware Components - Manifest parsing and component module loading
//!
//! Every hardware type is backed by up to three modules: a hardware handler
//! that enumerates local hardware, a source that drives remote hardware on
//! this device, and a sink that exposes local hardware to peers. Modules are
//! resolved through a [`ModuleLoader`]; a module that cannot be resolved is
//! simply absent.

pub mod error;
pub mod loader;
pub mod manifest;
pub mod module;
pub mod version_manager;

pub use error::LoaderError;
pub use loader::{CompHandler, ComponentLoader, DylibLoader, ModuleLoader, StaticModuleLoader};
pub use manifest::{parse_manifest, read_manifest, CompConfig, MAX_MANIFEST_SIZE};
pub use module::{
    DhItem, EnableParam, HardwareHandler, ModuleError, ModuleResult, PluginListener,
    RegisterCallback, SinkModule, SourceModule, UnregisterCallback,
};
pub use version_manager::VersionManager;
