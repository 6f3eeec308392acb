//! Component version records
//!
//! [`VersionInfo`] is the durable form stored in the replicated store and
//! keyed by device id. [`DhVersion`] is the in-memory form keyed by uuid.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::device::DhType;

/// Framework version advertised by this build
pub const DH_LOCAL_VERSION: &str = "1.0";

#[derive(Error, Debug)]
pub enum VersionError {
    #[error("Invalid version JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Versions of the three modules backing one hardware type
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompVersion {
    pub name: String,
    #[serde(rename = "type")]
    pub dh_type: DhType,
    #[serde(rename = "handler")]
    pub handler_version: String,
    #[serde(rename = "source_ver")]
    pub source_version: String,
    #[serde(rename = "sink_ver")]
    pub sink_version: String,
}

/// In-memory version record of one device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DhVersion {
    pub uuid: String,
    pub dh_version: String,
    pub comp_versions: BTreeMap<DhType, CompVersion>,
}

/// Durable version record of one device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionInfo {
    pub device_id: String,
    pub dh_version: String,
    pub comp_versions: BTreeMap<DhType, CompVersion>,
}

/// Wire layout: component versions travel as an array
#[derive(Serialize, Deserialize)]
struct VersionInfoWire {
    #[serde(rename = "dev_id")]
    device_id: String,
    #[serde(rename = "dh_ver")]
    dh_version: String,
    #[serde(rename = "comp_ver", default)]
    comp_versions: Vec<CompVersion>,
}

impl VersionInfo {
    pub fn to_json_string(&self) -> String {
        let wire = VersionInfoWire {
            device_id: self.device_id.clone(),
            dh_version: self.dh_version.clone(),
            comp_versions: self.comp_versions.values().cloned().collect(),
        };
        serde_json::to_string(&wire).unwrap_or_default()
    }

    pub fn from_json_str(data: &str) -> Result<Self, VersionError> {
        let wire: VersionInfoWire = serde_json::from_str(data)?;
        Ok(Self {
            device_id: wire.device_id,
            dh_version: wire.dh_version,
            comp_versions: wire
                .comp_versions
                .into_iter()
                .map(|c| (c.dh_type, c))
                .collect(),
        })
    }

    /// Convert to the in-memory form for the device with the given uuid
    pub fn to_dh_version(&self, uuid: &str) -> DhVersion {
        DhVersion {
            uuid: uuid.to_string(),
            dh_version: self.dh_version.clone(),
            comp_versions: self.comp_versions.clone(),
        }
    }
}

impl DhVersion {
    /// Convert to the durable form for the device with the given device id
    pub fn to_version_info(&self, device_id: &str) -> VersionInfo {
        VersionInfo {
            device_id: device_id.to_string(),
            dh_version: self.dh_version.clone(),
            comp_versions: self.comp_versions.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comp(dh_type: DhType, name: &str) -> CompVersion {
        CompVersion {
            name: name.to_string(),
            dh_type,
            handler_version: "1.0".to_string(),
            source_version: "1.1".to_string(),
            sink_version: "1.2".to_string(),
        }
    }

    #[test]
    fn test_version_info_json_idempotent() {
        let mut info = VersionInfo {
            device_id: "dev-1".to_string(),
            dh_version: DH_LOCAL_VERSION.to_string(),
            comp_versions: BTreeMap::new(),
        };
        info.comp_versions.insert(DhType::Screen, comp(DhType::Screen, "screen"));
        info.comp_versions.insert(DhType::Camera, comp(DhType::Camera, "camera"));
        info.comp_versions.insert(DhType::Input, comp(DhType::Input, "input"));

        let json = info.to_json_string();
        let parsed = VersionInfo::from_json_str(&json).unwrap();
        assert_eq!(parsed, info);
        assert_eq!(parsed.to_json_string(), json);
    }

    #[test]
    fn test_version_info_wire_keys() {
        let mut info = VersionInfo {
            device_id: "dev-1".to_string(),
            dh_version: "1.0".to_string(),
            comp_versions: BTreeMap::new(),
        };
        info.comp_versions.insert(DhType::Audio, comp(DhType::Audio, "audio"));

        let value: serde_json::Value = serde_json::from_str(&info.to_json_string()).unwrap();
        assert_eq!(value["dev_id"], "dev-1");
        assert_eq!(value["dh_ver"], "1.0");
        assert_eq!(value["comp_ver"][0]["type"], 2);
        assert_eq!(value["comp_ver"][0]["handler"], "1.0");
        assert_eq!(value["comp_ver"][0]["source_ver"], "1.1");
        assert_eq!(value["comp_ver"][0]["sink_ver"], "1.2");
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(VersionInfo::from_json_str("{").is_err());
    }
}
