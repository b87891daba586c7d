use serde::{Deserialize, Serialize};

/// Identity of a peer on the LAN, exchanged in protocol payloads.
///
/// `device_id` is a stable UUID generated once per install; `fingerprint`
/// is the SHA-256 of the peer's certificate PEM and is only present once
/// the peer has advertised or proven it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub device_id: String,
    pub alias: String,
    pub device_model: String,
    pub device_type: DeviceType,
    pub os: String,
    pub ip_address: String,
    pub port: u16,
    pub uses_https: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

impl DeviceInfo {
    /// The `"{ip}:{port}"` key used for fingerprint pinning.
    pub fn endpoint_key(&self) -> String {
        format!("{}:{}", self.ip_address, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Laptop,
    Mobile,
    Tablet,
    Server,
    Headless,
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::Desktop
    }
}
