//! Timing and sizing knobs of the framework

use meshware_store::DbAdapterConfig;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FwkConfig {
    /// Bounded task queue capacity
    pub queue_capacity: usize,
    /// Enable/Disable tasks allowed to run at once
    pub max_workers: usize,
    pub wait_all_timeout: Duration,
    pub enable_timeout: Duration,
    pub disable_timeout: Duration,
    /// Retries of param resolution and of failed enable/disable calls
    pub retry_max_times: u32,
    pub param_retry_interval: Duration,
    /// Period of the enabled-input re-validation
    pub monitor_interval: Duration,
    pub store: DbAdapterConfig,
}

impl Default for FwkConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            max_workers: 16,
            wait_all_timeout: Duration::from_millis(5000),
            enable_timeout: Duration::from_millis(1000),
            disable_timeout: Duration::from_millis(500),
            retry_max_times: 30,
            param_retry_interval: Duration::from_millis(500),
            monitor_interval: Duration::from_millis(5000),
            store: DbAdapterConfig::default(),
        }
    }
}
