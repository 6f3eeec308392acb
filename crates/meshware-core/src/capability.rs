//! Capability records: one hardware instance exposed by one device

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::anon::anonymize;
use crate::device::DhType;

/// Separator between device id and dh id in capability keys
pub const RESOURCE_SEPARATOR: &str = "###";

#[derive(Error, Debug)]
pub enum CapabilityError {
    #[error("Invalid capability JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Build the store/cache key of a capability
pub fn capability_key(device_id: &str, dh_id: &str) -> String {
    format!("{}{}{}", device_id, RESOURCE_SEPARATOR, dh_id)
}

/// Check whether a capability key belongs to the given device
pub fn is_key_of_device(key: &str, device_id: &str) -> bool {
    key.strip_prefix(device_id)
        .is_some_and(|rest| rest.starts_with(RESOURCE_SEPARATOR))
}

/// Describes one (device, dhId) hardware instance and its attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityInfo {
    #[serde(rename = "dh_id")]
    pub dh_id: String,
    #[serde(rename = "dev_id")]
    pub device_id: String,
    #[serde(rename = "dev_name")]
    pub device_name: String,
    #[serde(rename = "dev_type")]
    pub device_type: u16,
    pub dh_type: DhType,
    /// Opaque attribute blob, usually JSON produced by the hardware handler
    pub dh_attrs: String,
}

impl CapabilityInfo {
    pub fn new(
        dh_id: impl Into<String>,
        device_id: impl Into<String>,
        device_name: impl Into<String>,
        device_type: u16,
        dh_type: DhType,
        dh_attrs: impl Into<String>,
    ) -> Self {
        Self {
            dh_id: dh_id.into(),
            device_id: device_id.into(),
            device_name: device_name.into(),
            device_type,
            dh_type,
            dh_attrs: dh_attrs.into(),
        }
    }

    /// Cache and store key: `deviceId###dhId`
    pub fn key(&self) -> String {
        capability_key(&self.device_id, &self.dh_id)
    }

    /// Key with both halves masked, for logging
    pub fn anonymous_key(&self) -> String {
        capability_key(&anonymize(&self.device_id), &anonymize(&self.dh_id))
    }

    /// Field-by-field equality
    pub fn compare(&self, other: &CapabilityInfo) -> bool {
        self == other
    }

    pub fn to_json_string(&self) -> String {
        // Serializing a struct of strings and integers cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json_str(data: &str) -> Result<Self, CapabilityError> {
        Ok(serde_json::from_str(data)?)
    }

    /// True when `data` parses to a record equal to this one
    pub fn matches_json(&self, data: &str) -> bool {
        Self::from_json_str(data).is_ok_and(|stored| stored.compare(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> CapabilityInfo {
        CapabilityInfo::new(
            "camera_0",
            "dev-1234",
            "Phone",
            0x0E,
            DhType::Camera,
            r#"{"fps":30}"#,
        )
    }

    #[test]
    fn test_key_and_device_match() {
        let cap = camera();
        assert_eq!(cap.key(), "dev-1234###camera_0");
        assert!(is_key_of_device(&cap.key(), "dev-1234"));
        assert!(!is_key_of_device(&cap.key(), "dev-12"));
        assert!(!is_key_of_device("dev-1234", "dev-1234"));
    }

    #[test]
    fn test_json_field_names() {
        let json = camera().to_json_string();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["dh_id"], "camera_0");
        assert_eq!(value["dev_id"], "dev-1234");
        assert_eq!(value["dev_name"], "Phone");
        assert_eq!(value["dev_type"], 14);
        assert_eq!(value["dh_type"], 1);
        assert_eq!(value["dh_attrs"], r#"{"fps":30}"#);
    }

    #[test]
    fn test_matches_json() {
        let cap = camera();
        assert!(cap.matches_json(&cap.to_json_string()));

        let mut changed = cap.clone();
        changed.dh_attrs = "{}".to_string();
        assert!(!cap.matches_json(&changed.to_json_string()));
        assert!(!cap.matches_json("not json"));
    }
}
