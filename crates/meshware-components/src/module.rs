//! Capability traits implemented by component modules
//!
//! Dynamic modules export one factory symbol per role. The factory returns a
//! boxed trait object; the library stays mapped for as long as the loader
//! that opened it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Symbol exported by hardware handler libraries
pub const HARDWARE_HANDLER_SYMBOL: &str = "GetHardwareHandler";
/// Symbol exported by source libraries
pub const SOURCE_SYMBOL: &str = "GetSourceHardwareHandler";
/// Symbol exported by sink libraries
pub const SINK_SYMBOL: &str = "GetSinkHardwareHandler";

#[allow(improper_ctypes_definitions)]
pub type HardwareHandlerEntryFn = unsafe extern "C" fn() -> Box<dyn HardwareHandler>;
#[allow(improper_ctypes_definitions)]
pub type SourceEntryFn = unsafe extern "C" fn() -> Box<dyn SourceModule>;
#[allow(improper_ctypes_definitions)]
pub type SinkEntryFn = unsafe extern "C" fn() -> Box<dyn SinkModule>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModuleError {
    #[error("Module returned error code {0}")]
    Code(i32),
    #[error("Module call failed: {0}")]
    Failed(String),
}

pub type ModuleResult<T> = Result<T, ModuleError>;

/// One local hardware instance reported by a handler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhItem {
    pub dh_id: String,
    pub attrs: String,
}

/// Parameters handed to a source when registering remote hardware
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnableParam {
    /// Sink version of the remote device's module
    pub version: String,
    pub attrs: String,
}

/// Receives hot-plug events from a hardware handler
pub trait PluginListener: Send + Sync {
    fn plugin_hardware(&self, dh_id: &str, attrs: &str);
    fn unplug_hardware(&self, dh_id: &str);
}

/// Enumerates the local hardware of one type
pub trait HardwareHandler: Send + Sync {
    fn initialize(&self) -> ModuleResult<()>;

    fn query(&self) -> Vec<DhItem>;

    fn query_extra_info(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    fn is_support_plugin(&self) -> bool {
        false
    }

    fn register_plugin_listener(&self, _listener: Arc<dyn PluginListener>) {}

    fn unregister_plugin_listener(&self) {}
}

/// Completion callback of `register_distributed_hardware`
pub trait RegisterCallback: Send + Sync {
    fn on_register_result(&self, network_id: &str, dh_id: &str, status: i32, data: &str);
}

/// Completion callback of `unregister_distributed_hardware`
pub trait UnregisterCallback: Send + Sync {
    fn on_unregister_result(&self, network_id: &str, dh_id: &str, status: i32, data: &str);
}

/// Drives remote hardware on this device
pub trait SourceModule: Send + Sync {
    fn init_source(&self, params: &str) -> ModuleResult<()>;

    fn release_source(&self) -> ModuleResult<()>;

    /// Start using a remote hardware instance; the outcome arrives on `callback`
    fn register_distributed_hardware(
        &self,
        network_id: &str,
        dh_id: &str,
        param: &EnableParam,
        callback: Arc<dyn RegisterCallback>,
    ) -> ModuleResult<()>;

    /// Stop using a remote hardware instance; the outcome arrives on `callback`
    fn unregister_distributed_hardware(
        &self,
        network_id: &str,
        dh_id: &str,
        callback: Arc<dyn UnregisterCallback>,
    ) -> ModuleResult<()>;

    fn config_distributed_hardware(
        &self,
        _network_id: &str,
        _dh_id: &str,
        _key: &str,
        _value: &str,
    ) -> ModuleResult<()> {
        Ok(())
    }
}

/// Exposes local hardware to peers
pub trait SinkModule: Send + Sync {
    fn init_sink(&self, params: &str) -> ModuleResult<()>;

    fn release_sink(&self) -> ModuleResult<()>;

    fn subscribe_local_hardware(&self, _dh_id: &str, _params: &str) -> ModuleResult<()> {
        Ok(())
    }

    fn unsubscribe_local_hardware(&self, _dh_id: &str) -> ModuleResult<()> {
        Ok(())
    }
}
