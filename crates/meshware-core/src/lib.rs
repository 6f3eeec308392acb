//! Meshware Core - Core types, identifiers and event bus
//!
//! This crate provides the foundational types for the Meshware system:
//! - Device identity and distributed hardware type enumeration
//! - Capability records describing hardware exposed by mesh devices
//! - Per-device component version records (durable and in-memory forms)
//! - Task addressing and lifecycle enums shared by the task pipeline
//! - A single-consumer event bus for decoupled pub/sub and posted jobs

pub mod anon;
pub mod capability;
pub mod device;
pub mod event_bus;
pub mod task;
pub mod version;

pub use anon::anonymize;
pub use capability::{capability_key, is_key_of_device, CapabilityError, CapabilityInfo, RESOURCE_SEPARATOR};
pub use device::{device_id_from_uuid, sha256_hex, DeviceInfo, DhType};
pub use event_bus::{BusEvent, EventBus};
pub use task::{TaskParam, TaskState, TaskStep, TaskType};
pub use version::{CompVersion, DhVersion, VersionError, VersionInfo, DH_LOCAL_VERSION};
