use serde::{Deserialize, Serialize};

use crate::DeviceInfo;

/// A command from the host UI to the daemon core.
///
/// On the pipe these travel as `{"type": "...", "data": {...}}` frames;
/// an unrecognized `type` is a protocol error, never silently dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Operation {
    SendFile {
        target_device_id: String,
        file_paths: Vec<String>,
    },
    CancelWaitForConfirmation {
        transfer_id: u64,
    },
    CancelSend {
        transfer_id: u64,
    },
    /// Latch operation: replaces, never queues.
    ConfirmReceive(ConfirmReceive),
    /// Latch operation: replaces, never queues.
    CancelReceive {
        transfer_id: u64,
    },
    ModifySettings {
        settings: serde_json::Value,
    },
    ConnectToDevice {
        device_id: String,
        auth_code: String,
    },
    ExitApp,
}

/// The host's answer to a pending incoming send-request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmReceive {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_file_ids: Option<Vec<String>>,
}

/// An asynchronous event from the daemon core to the host UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Notification {
    FoundDevice(DeviceInfo),
    LostDevice {
        device_id: String,
    },
    ConnectedToDevice {
        device_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        device_name: Option<String>,
    },
    ReceiveRequested {
        session_id: String,
        peer: DeviceInfo,
        files: Vec<IncomingFile>,
    },
    RecipientAccepted {
        transfer_ids: Vec<u64>,
    },
    RecipientDeclined {
        transfer_ids: Vec<u64>,
    },
    SendingCancelledByReceiver {
        transfer_id: u64,
    },
    ReceivingCancelledBySender {
        transfer_id: u64,
    },
    TransferProgress(TransferProgress),
    TransferCompleted {
        transfer_id: u64,
        file_name: String,
    },
    TransferFailed {
        transfer_id: u64,
        error: String,
    },
    Settings(serde_json::Value),
    Error(ErrorNotification),
}

/// One file offered by an incoming send-request, surfaced to the host so
/// the user can accept a subset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingFile {
    pub file_id: String,
    pub file_name: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub transfer_id: u64,
    /// 0.0 to 1.0.
    pub progress: f64,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub speed_bps: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorNotification {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<u64>,
}

impl Notification {
    pub fn error(message: impl Into<String>) -> Self {
        Notification::Error(ErrorNotification {
            message: message.into(),
            peer: None,
            transfer_id: None,
        })
    }

    pub fn peer_error(message: impl Into<String>, peer: impl Into<String>) -> Self {
        Notification::Error(ErrorNotification {
            message: message.into(),
            peer: Some(peer.into()),
            transfer_id: None,
        })
    }

    pub fn transfer_error(message: impl Into<String>, transfer_id: u64) -> Self {
        Notification::Error(ErrorNotification {
            message: message.into(),
            peer: None,
            transfer_id: Some(transfer_id),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_frame_shape() {
        let op = Operation::CancelSend { transfer_id: 12 };
        let json = serde_json::to_string(&op).unwrap();
        assert_eq!(json, r#"{"type":"cancel_send","data":{"transfer_id":12}}"#);
    }

    #[test]
    fn test_unit_operation_has_no_data() {
        let json = serde_json::to_string(&Operation::ExitApp).unwrap();
        assert_eq!(json, r#"{"type":"exit_app"}"#);

        let parsed: Operation = serde_json::from_str(r#"{"type":"exit_app"}"#).unwrap();
        assert_eq!(parsed, Operation::ExitApp);
    }

    #[test]
    fn test_unknown_operation_type_is_rejected() {
        let result: Result<Operation, _> =
            serde_json::from_str(r#"{"type":"reboot_universe","data":{}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_confirm_receive_roundtrip() {
        let op = Operation::ConfirmReceive(ConfirmReceive {
            accepted: true,
            accepted_file_ids: Some(vec!["f1".into(), "f2".into()]),
        });
        let json = serde_json::to_string(&op).unwrap();
        let parsed: Operation = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, op);
    }

    #[test]
    fn test_progress_notification_roundtrip() {
        let n = Notification::TransferProgress(TransferProgress {
            transfer_id: 3,
            progress: 0.4,
            bytes_transferred: 2_097_152,
            total_bytes: 5_242_880,
            speed_bps: 1_048_576,
            eta_seconds: Some(3),
        });
        let json = serde_json::to_string(&n).unwrap();
        assert!(json.contains("\"type\":\"transfer_progress\""));
        let parsed: Notification = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, n);
    }
}
