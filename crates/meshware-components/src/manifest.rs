//! Component manifest parsing
//!
//! The manifest is a JSON object holding a `Distributed_Components` array,
//! one record per hardware type:
//!
//! ```json
//! {"Distributed_Components": [{
//!     "name": "camera", "type": "camera",
//!     "comp_handler_loc": "libcamera_handler.so", "comp_handler_version": "1.0",
//!     "comp_source_loc": "libcamera_source.so", "comp_source_version": "1.0",
//!     "comp_source_sa_id": 4803,
//!     "comp_sink_loc": "libcamera_sink.so", "comp_sink_version": "1.0",
//!     "comp_sink_sa_id": 4804
//! }]}
//! ```

use meshware_core::{CompVersion, DhType};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

use crate::error::LoaderError;

pub const COMPONENTS_KEY: &str = "Distributed_Components";

/// Manifests above this size are refused
pub const MAX_MANIFEST_SIZE: u64 = 40 * 1024 * 1024;

/// One manifest record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(rename = "comp_handler_loc")]
    pub handler_loc: String,
    #[serde(rename = "comp_handler_version")]
    pub handler_version: String,
    #[serde(rename = "comp_source_loc")]
    pub source_loc: String,
    #[serde(rename = "comp_source_version")]
    pub source_version: String,
    #[serde(rename = "comp_source_sa_id")]
    pub source_sa_id: i32,
    #[serde(rename = "comp_sink_loc")]
    pub sink_loc: String,
    #[serde(rename = "comp_sink_version")]
    pub sink_version: String,
    #[serde(rename = "comp_sink_sa_id")]
    pub sink_sa_id: i32,
}

impl CompConfig {
    pub fn dh_type(&self) -> DhType {
        DhType::from_manifest_name(&self.type_name).unwrap_or(DhType::Unknown)
    }

    pub fn comp_version(&self) -> CompVersion {
        CompVersion {
            name: self.name.clone(),
            dh_type: self.dh_type(),
            handler_version: self.handler_version.clone(),
            source_version: self.source_version.clone(),
            sink_version: self.sink_version.clone(),
        }
    }
}

/// Parse manifest text
///
/// A malformed record or one with an unknown type is skipped with a warning.
/// A document that is not JSON or lacks the components array is an error.
pub fn parse_manifest(text: &str) -> Result<Vec<CompConfig>, LoaderError> {
    let root: serde_json::Value = serde_json::from_str(text)?;
    let records = root
        .get(COMPONENTS_KEY)
        .and_then(|v| v.as_array())
        .ok_or(LoaderError::MissingComponents)?;

    let mut configs = Vec::with_capacity(records.len());
    for (index, record) in records.iter().enumerate() {
        match serde_json::from_value::<CompConfig>(record.clone()) {
            Ok(config) if config.dh_type() == DhType::Unknown => {
                warn!(
                    "Skipping manifest record {}: unknown type '{}'",
                    index, config.type_name
                );
            }
            Ok(config) => {
                debug!("Manifest record {}: {} ({})", index, config.name, config.dh_type());
                configs.push(config);
            }
            Err(e) => {
                warn!("Skipping malformed manifest record {}: {}", index, e);
            }
        }
    }
    Ok(configs)
}

/// Read and parse a manifest file
pub fn read_manifest(path: &Path) -> Result<Vec<CompConfig>, LoaderError> {
    let size = std::fs::metadata(path)?.len();
    if size > MAX_MANIFEST_SIZE {
        return Err(LoaderError::TooLarge(size));
    }
    let text = std::fs::read_to_string(path)?;
    parse_manifest(&text)
}
