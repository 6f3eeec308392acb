//! Meshware Framework - distributed hardware lifecycle management
//!
//! This crate turns device online/offline notifications into a DAG of
//! Enable/Disable tasks against locally loaded component modules:
//! - Capability and version registries mirrored in a replicated store
//! - A bounded task queue with a fixed worker budget
//! - Source/sink lifecycle, timeouts, retries and crash recovery
//! - The factory façade and the `dump` diagnostics

pub mod capability_info_manager;
pub mod component_manager;
pub mod component_monitor;
pub mod config;
pub mod context;
mod disable_task;
pub mod dump;
mod enable_task;
pub mod error;
pub mod local_hardware_manager;
pub mod manager;
mod offline_task;
mod online_task;
pub mod task;
pub mod task_board;
pub mod task_executor;
pub mod task_factory;
pub mod version_info_manager;

#[cfg(test)]
pub(crate) mod test_support;

pub use capability_info_manager::{CapabilityInfoManager, APP_ID, CAPABILITY_STORE_ID};
pub use component_manager::ComponentManager;
pub use component_monitor::ComponentMonitor;
pub use config::FwkConfig;
pub use context::DhContext;
pub use error::{FwkError, Result};
pub use manager::{DistributedHardwareManager, DistributedHardwareManagerFactory, ManagerOptions};
pub use task::Task;
pub use task_board::{TaskBoard, TaskDump};
pub use version_info_manager::{VersionInfoManager, VERSION_STORE_ID};
