//! Meshware Store - Replicated key-value store integration
//!
//! The replicated store itself is an external collaborator. This crate
//! defines the surface Meshware needs from it and wraps that surface in
//! [`DbAdapter`], which adds open retries, death recovery and manual sync
//! retries on top of the raw store calls.

pub mod adapter;
pub mod memory;
pub mod store;

pub use adapter::{DbAdapter, DbAdapterConfig, MAX_DB_RECORD_SIZE};
pub use memory::{MemoryKvStore, MemoryStoreProvider};
pub use store::{
    ChangeNotification, Entry, KvStore, StoreDeathRecipient, StoreError, StoreObserver,
    StoreProvider, StoreResult, SyncStatus,
};
