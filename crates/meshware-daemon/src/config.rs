//! Configuration loading and defaults

use anyhow::Result;
use meshware_fwk::FwkConfig;
use meshware_store::DbAdapterConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub local_device: LocalDeviceConfig,
    #[serde(default)]
    pub components: ComponentsConfig,
    #[serde(default)]
    pub tasks: TasksConfig,
    #[serde(default)]
    pub enable: EnableConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Bind address for the API server
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8090".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalDeviceConfig {
    /// Mesh uuid of this device; a random one is used when empty
    #[serde(default)]
    pub uuid: String,
    #[serde(default = "default_device_name")]
    pub name: String,
    #[serde(default = "default_device_type")]
    pub device_type: u16,
}

impl Default for LocalDeviceConfig {
    fn default() -> Self {
        Self {
            uuid: String::new(),
            name: default_device_name(),
            device_type: default_device_type(),
        }
    }
}

fn default_device_name() -> String {
    "meshware-node".to_string()
}

fn default_device_type() -> u16 {
    0x0E
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentsConfig {
    /// Component manifest listing the modules per hardware type
    #[serde(default = "default_manifest")]
    pub manifest: PathBuf,
    /// Base directory for relative module locations
    #[serde(default = "default_module_dir")]
    pub module_dir: PathBuf,
}

impl Default for ComponentsConfig {
    fn default() -> Self {
        Self {
            manifest: default_manifest(),
            module_dir: default_module_dir(),
        }
    }
}

fn default_manifest() -> PathBuf {
    PathBuf::from("./components.json")
}

fn default_module_dir() -> PathBuf {
    PathBuf::from("./modules")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_wait_all_timeout")]
    pub wait_all_timeout_ms: u64,
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_workers: default_max_workers(),
            wait_all_timeout_ms: default_wait_all_timeout(),
        }
    }
}

fn default_queue_capacity() -> usize {
    256
}

fn default_max_workers() -> usize {
    16
}

fn default_wait_all_timeout() -> u64 {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnableConfig {
    #[serde(default = "default_enable_timeout")]
    pub enable_timeout_ms: u64,
    #[serde(default = "default_disable_timeout")]
    pub disable_timeout_ms: u64,
    #[serde(default = "default_retry_max_times")]
    pub retry_max_times: u32,
    #[serde(default = "default_param_retry_interval")]
    pub param_retry_interval_ms: u64,
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_ms: u64,
}

impl Default for EnableConfig {
    fn default() -> Self {
        Self {
            enable_timeout_ms: default_enable_timeout(),
            disable_timeout_ms: default_disable_timeout(),
            retry_max_times: default_retry_max_times(),
            param_retry_interval_ms: default_param_retry_interval(),
            monitor_interval_ms: default_monitor_interval(),
        }
    }
}

fn default_enable_timeout() -> u64 {
    1000
}

fn default_disable_timeout() -> u64 {
    500
}

fn default_retry_max_times() -> u32 {
    30
}

fn default_param_retry_interval() -> u64 {
    500
}

fn default_monitor_interval() -> u64 {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_init_retry_times")]
    pub init_retry_times: u32,
    #[serde(default = "default_init_retry_interval")]
    pub init_retry_interval_ms: u64,
    #[serde(default = "default_died_check_max_times")]
    pub died_check_max_times: u32,
    #[serde(default = "default_died_check_interval")]
    pub died_check_interval_ms: u64,
    #[serde(default = "default_manual_sync_max_times")]
    pub manual_sync_max_times: u32,
    #[serde(default = "default_manual_sync_interval")]
    pub manual_sync_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            init_retry_times: default_init_retry_times(),
            init_retry_interval_ms: default_init_retry_interval(),
            died_check_max_times: default_died_check_max_times(),
            died_check_interval_ms: default_died_check_interval(),
            manual_sync_max_times: default_manual_sync_max_times(),
            manual_sync_interval_ms: default_manual_sync_interval(),
        }
    }
}

fn default_init_retry_times() -> u32 {
    20
}

fn default_init_retry_interval() -> u64 {
    200
}

fn default_died_check_max_times() -> u32 {
    300
}

fn default_died_check_interval() -> u64 {
    100
}

fn default_manual_sync_max_times() -> u32 {
    6
}

fn default_manual_sync_interval() -> u64 {
    100
}

impl Config {
    /// Convert to the framework's timing and sizing knobs
    pub fn to_fwk_config(&self) -> FwkConfig {
        FwkConfig {
            queue_capacity: self.tasks.queue_capacity,
            max_workers: self.tasks.max_workers,
            wait_all_timeout: Duration::from_millis(self.tasks.wait_all_timeout_ms),
            enable_timeout: Duration::from_millis(self.enable.enable_timeout_ms),
            disable_timeout: Duration::from_millis(self.enable.disable_timeout_ms),
            retry_max_times: self.enable.retry_max_times,
            param_retry_interval: Duration::from_millis(self.enable.param_retry_interval_ms),
            monitor_interval: Duration::from_millis(self.enable.monitor_interval_ms),
            store: DbAdapterConfig {
                init_retry_times: self.store.init_retry_times,
                init_retry_interval: Duration::from_millis(self.store.init_retry_interval_ms),
                died_check_max_times: self.store.died_check_max_times,
                died_check_interval: Duration::from_millis(self.store.died_check_interval_ms),
                manual_sync_max_times: self.store.manual_sync_max_times,
                manual_sync_interval: Duration::from_millis(self.store.manual_sync_interval_ms),
            },
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    } else {
        info!(
            path = %path.display(),
            "Configuration file not found, using defaults"
        );
        Ok(Config::default())
    }
}

const CONFIG_HEADER: &str = "\
# Meshware daemon configuration
#
# [local_device] uuid identifies this node in the mesh; leave it empty to
# get a random id per run. Timings are in milliseconds.

";

/// Save default configuration to file
pub fn save_default_config(path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(&Config::default())?;
    std::fs::write(path, format!("{}{}", CONFIG_HEADER, content))?;
    Ok(())
}
