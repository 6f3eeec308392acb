//! Device identity and distributed hardware types

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Category of virtual hardware a component module drives.
///
/// Discriminants are bit values so sets of types can be exchanged as masks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum DhType {
    Unknown,
    Camera,
    Audio,
    Screen,
    Gps,
    Input,
    Hfp,
    A2d,
    VirmodemMic,
    VirmodemSpeaker,
}

impl DhType {
    /// All concrete hardware types, in bit order
    pub const ALL: [DhType; 9] = [
        DhType::Camera,
        DhType::Audio,
        DhType::Screen,
        DhType::Gps,
        DhType::Input,
        DhType::Hfp,
        DhType::A2d,
        DhType::VirmodemMic,
        DhType::VirmodemSpeaker,
    ];

    pub fn bits(self) -> u32 {
        match self {
            DhType::Unknown => 0x0,
            DhType::Camera => 0x01,
            DhType::Audio => 0x02,
            DhType::Screen => 0x04,
            DhType::Gps => 0x08,
            DhType::Input => 0x10,
            DhType::Hfp => 0x20,
            DhType::A2d => 0x40,
            DhType::VirmodemMic => 0x80,
            DhType::VirmodemSpeaker => 0x100,
        }
    }

    /// Parse the lowercase type name used in the component manifest
    pub fn from_manifest_name(name: &str) -> Option<Self> {
        match name {
            "camera" => Some(DhType::Camera),
            "audio" => Some(DhType::Audio),
            "screen" => Some(DhType::Screen),
            "gps" => Some(DhType::Gps),
            "input" => Some(DhType::Input),
            "hfp" => Some(DhType::Hfp),
            "a2d" => Some(DhType::A2d),
            "virmodemmic" => Some(DhType::VirmodemMic),
            "virmodemspeaker" => Some(DhType::VirmodemSpeaker),
            _ => None,
        }
    }

    /// Upper-case label used by the dump surface
    pub fn label(self) -> &'static str {
        match self {
            DhType::Unknown => "UNKNOWN",
            DhType::Camera => "CAMERA",
            DhType::Audio => "AUDIO",
            DhType::Screen => "SCREEN",
            DhType::Gps => "GPS",
            DhType::Input => "INPUT",
            DhType::Hfp => "HFP",
            DhType::A2d => "A2D",
            DhType::VirmodemMic => "VIRMODEM_MIC",
            DhType::VirmodemSpeaker => "VIRMODEM_SPEAKER",
        }
    }
}

impl From<u32> for DhType {
    fn from(bits: u32) -> Self {
        DhType::ALL
            .into_iter()
            .find(|t| t.bits() == bits)
            .unwrap_or(DhType::Unknown)
    }
}

impl From<DhType> for u32 {
    fn from(t: DhType) -> Self {
        t.bits()
    }
}

impl Default for DhType {
    fn default() -> Self {
        Self::Unknown
    }
}

impl std::fmt::Display for DhType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Identity of a device in the mesh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Stable device UUID assigned by the mesh
    pub uuid: String,
    /// Hashed identifier, `sha256(uuid)` as lowercase hex
    pub device_id: String,
    /// Human-readable name
    pub device_name: String,
    /// Numeric device class (phone, tablet, tv, ...)
    pub device_type: u16,
}

impl DeviceInfo {
    /// Create device info, deriving the hashed device id from the uuid
    pub fn new(uuid: impl Into<String>, device_name: impl Into<String>, device_type: u16) -> Self {
        let uuid = uuid.into();
        let device_id = device_id_from_uuid(&uuid);
        Self {
            uuid,
            device_id,
            device_name: device_name.into(),
            device_type,
        }
    }
}

/// Derive the store-facing device id from a uuid
pub fn device_id_from_uuid(uuid: &str) -> String {
    sha256_hex(uuid.as_bytes())
}

/// Compute SHA256 hash of data and return as hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
