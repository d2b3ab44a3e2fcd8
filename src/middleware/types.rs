//! Gateway / Device snapshot carried by heartbeats and online reports
//!
//! Wire shape:
//! `{ "dongleId": "...", "devices": { "<id>": { "deviceId", "deviceType", "attributes" } }, "lastUpdated": <epoch ms> }`

use std::collections::HashMap;
use serde::{Serialize, Deserialize};

pub const UNKNOWN_DEVICE_TYPE: &str = "Unknown";

// ---------- DeviceInfo ----------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub device_id: String,
    #[serde(default = "unknown_device_type")]
    pub device_type: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

fn unknown_device_type() -> String {
    UNKNOWN_DEVICE_TYPE.to_string()
}

impl DeviceInfo {
    pub fn new(device_id: impl Into<String>, device_type: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            device_type: device_type.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }
}

// ---------- GatewayInfo ----------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayInfo {
    #[serde(rename = "dongleId")]
    gateway_id: String,
    #[serde(default)]
    devices: HashMap<String, DeviceInfo>,
    /// Informational on the wire; the registry overwrites it with its receipt time
    #[serde(rename = "lastUpdated", default)]
    last_seen: u64,
}

impl GatewayInfo {
    pub fn new(gateway_id: impl Into<String>) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            devices: HashMap::new(),
            last_seen: 0,
        }
    }

    pub fn gateway_id(&self) -> &str {
        &self.gateway_id
    }

    pub fn devices(&self) -> &HashMap<String, DeviceInfo> {
        &self.devices
    }

    pub fn device(&self, device_id: &str) -> Option<&DeviceInfo> {
        self.devices.get(device_id)
    }

    /// Replaces any device already registered under the same id
    pub fn add_device(&mut self, device: DeviceInfo) {
        self.devices.insert(device.device_id.clone(), device);
    }

    pub fn remove_device(&mut self, device_id: &str) -> Option<DeviceInfo> {
        self.devices.remove(device_id)
    }

    pub fn last_seen(&self) -> u64 {
        self.last_seen
    }

    pub(crate) fn stamp(&mut self, received_at: u64) {
        self.last_seen = received_at;
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses a heartbeat. A blank `dongleId` is an error, it cannot key the registry.
    pub fn from_json(payload: &[u8]) -> Result<Self, serde_json::Error> {
        let info: Self = serde_json::from_slice(payload)?;
        if info.gateway_id.trim().is_empty() {
            return Err(serde::de::Error::custom("dongleId must not be empty"));
        }
        Ok(info)
    }
}
