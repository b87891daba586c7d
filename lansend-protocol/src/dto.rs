use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{DeviceInfo, DeviceType, FileType};

/// Response body of `GET /api/localsend/v2/info`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoResponse {
    pub alias: String,
    pub version: String,
    pub device_model: String,
    pub device_type: DeviceType,
    pub fingerprint: String,
    pub port: u16,
    pub protocol: String,
}

/// Response body of `GET /api/localsend/v2/ping`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    pub alive: bool,
}

/// Body of `POST /api/localsend/v2/connect`: an auth-code handshake that
/// establishes mutual pinning before any transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub auth_code: String,
    pub device_info: DeviceInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponse {
    pub success: bool,
    pub fingerprint: String,
}

/// Per-file descriptor inside a send-request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadataRequest {
    pub file_name: String,
    pub size: u64,
    pub file_type: FileType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Chunk size the sender will use for uploads of this file.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
}

fn default_chunk_size() -> u64 {
    1024 * 1024
}

/// Body of `POST /api/localsend/v2/send-request`.
///
/// `files` is keyed by a sender-chosen file id; the receiver echoes the
/// ids it accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
    pub info: DeviceInfo,
    pub files: BTreeMap<String, FileMetadataRequest>,
}

/// 200 response to a send-request.
///
/// `completed_chunks` is non-empty only when the receiver resumed an
/// interrupted transfer; the sender skips those indices.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub session_id: String,
    pub accepted_file_ids: Vec<String>,
    pub transfer_ids: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub completed_chunks: BTreeMap<String, Vec<u64>>,
}

/// Body of `POST /api/localsend/v2/cancel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub transfer_id: u64,
}
