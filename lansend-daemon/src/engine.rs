//! The transfer engine: owns the session collections, dispatches bus
//! operations into tasks, and routes HTTP requests to the right session.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::{error, info, warn};

use lansend_protocol::{
    CancelRequest, ConnectRequest, ConnectResponse, DeviceInfo, InfoResponse, Notification,
    Operation, SendRequest, SendResponse, PROTOCOL_VERSION,
};

use crate::cert_store::CertificateStore;
use crate::client::PeerClient;
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::event_bus::EventBus;
use crate::metadata::{TransferMetadataStore, TransferStatus};
use crate::receive::{ReceiveConfig, ReceiveController};
use crate::send_session::{CancelRegistry, SendSession};
use crate::tls::TlsContextFactory;

/// Live view of one transfer, recomputed from its metadata record.
#[derive(Debug, Clone)]
pub struct TransferState {
    pub transfer_id: u64,
    pub status: TransferStatus,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub file_name: String,
    pub last_activity: DateTime<Utc>,
}

pub struct TransferEngine {
    bus: Arc<EventBus>,
    store: Arc<TransferMetadataStore>,
    certs: Arc<CertificateStore>,
    tls: TlsContextFactory,
    settings: RwLock<Settings>,
    config_dir: PathBuf,
    devices: Mutex<HashMap<String, DeviceInfo>>,
    cancel_registry: CancelRegistry,
    receive: ReceiveController,
    next_transfer_id: Arc<AtomicU64>,
    shutdown: Notify,
    shutdown_requested: std::sync::atomic::AtomicBool,
}

impl TransferEngine {
    pub fn new(
        bus: Arc<EventBus>,
        store: Arc<TransferMetadataStore>,
        certs: Arc<CertificateStore>,
        settings: Settings,
        config_dir: PathBuf,
    ) -> Result<Arc<Self>> {
        certs.set_allow_unregistered(settings.allow_unregistered);

        // Ids continue monotonically across restarts so old records
        // never collide with new ones.
        let next_transfer_id = Arc::new(AtomicU64::new(store.max_transfer_id()? + 1));

        let receive = ReceiveController::new(
            bus.clone(),
            store.clone(),
            ReceiveConfig {
                device_id: settings.device_id.clone(),
                save_dir: settings.save_dir.clone(),
                remove_partial_on_cancel: settings.remove_partial_on_cancel,
            },
            next_transfer_id.clone(),
        );

        Ok(Arc::new(Self {
            bus,
            store,
            tls: TlsContextFactory::new(certs.clone()),
            certs,
            settings: RwLock::new(settings),
            config_dir,
            devices: Mutex::new(HashMap::new()),
            cancel_registry: Arc::new(Mutex::new(HashMap::new())),
            receive,
            next_transfer_id,
            shutdown: Notify::new(),
            shutdown_requested: std::sync::atomic::AtomicBool::new(false),
        }))
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn certs(&self) -> &Arc<CertificateStore> {
        &self.certs
    }

    pub fn tls(&self) -> &TlsContextFactory {
        &self.tls
    }

    pub fn port(&self) -> u16 {
        self.settings.read().unwrap().port
    }

    pub fn settings_snapshot(&self) -> Settings {
        self.settings.read().unwrap().clone()
    }

    pub async fn wait_for_shutdown(&self) {
        while !self.shutdown_requested.load(Ordering::SeqCst) {
            self.shutdown.notified().await;
        }
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        self.shutdown.notify_waiters();
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Our own identity as advertised in protocol payloads.
    pub fn our_device_info(&self) -> DeviceInfo {
        let settings = self.settings.read().unwrap();
        DeviceInfo {
            device_id: settings.device_id.clone(),
            alias: settings.alias.clone(),
            device_model: settings.device_model.clone(),
            device_type: settings.device_type,
            os: std::env::consts::OS.to_string(),
            ip_address: String::new(),
            port: settings.port,
            uses_https: true,
            fingerprint: Some(self.certs.fingerprint().to_string()),
        }
    }

    // ------------------------------------------------------------------
    // Device registry (fed by external discovery and by inbound peers)
    // ------------------------------------------------------------------

    pub fn register_device(&self, device: DeviceInfo) {
        let mut devices = self.devices.lock().unwrap();
        let known = devices.insert(device.device_id.clone(), device.clone());
        drop(devices);
        if known.is_none() {
            self.bus.post_notification(Notification::FoundDevice(device));
        }
    }

    pub fn remove_device(&self, device_id: &str) {
        if self.devices.lock().unwrap().remove(device_id).is_some() {
            self.bus.post_notification(Notification::LostDevice {
                device_id: device_id.to_string(),
            });
        }
    }

    pub fn find_device(&self, device_id: &str) -> Option<DeviceInfo> {
        self.devices.lock().unwrap().get(device_id).cloned()
    }

    // ------------------------------------------------------------------
    // Operation dispatch
    // ------------------------------------------------------------------

    pub fn handle_operation(engine: &Arc<Self>, operation: Operation) {
        match operation {
            Operation::SendFile {
                target_device_id,
                file_paths,
            } => {
                let engine = engine.clone();
                tokio::spawn(async move {
                    Self::start_send(engine, target_device_id, file_paths).await;
                });
            }
            Operation::CancelSend { transfer_id }
            | Operation::CancelWaitForConfirmation { transfer_id } => {
                engine.cancel_send(transfer_id);
            }
            Operation::ModifySettings { settings } => {
                if let Err(e) = engine.modify_settings(&settings) {
                    warn!("settings update rejected: {}", e);
                    engine
                        .bus
                        .post_notification(Notification::error(e.to_string()));
                }
            }
            Operation::ConnectToDevice {
                device_id,
                auth_code,
            } => {
                let engine = engine.clone();
                tokio::spawn(async move {
                    Self::connect_to_device(engine, device_id, auth_code).await;
                });
            }
            Operation::ExitApp => {
                info!("exit requested by host");
                engine.request_shutdown();
            }
            // The latch operations never reach the queue.
            Operation::ConfirmReceive(_) | Operation::CancelReceive { .. } => {
                warn!("latch operation arrived through the queue");
            }
        }
    }

    async fn start_send(self: Arc<Self>, target_device_id: String, file_paths: Vec<String>) {
        let Some(target) = self.find_device(&target_device_id) else {
            warn!("send requested to unknown device {}", target_device_id);
            self.bus.post_notification(Notification::error(format!(
                "unknown device {}",
                target_device_id
            )));
            return;
        };

        let paths: Vec<PathBuf> = file_paths.into_iter().map(PathBuf::from).collect();
        if paths.is_empty() {
            self.bus
                .post_notification(Notification::error("no files to send"));
            return;
        }

        let result = async {
            let client = PeerClient::new(&self.tls, &target.ip_address, target.port)?;
            let (our_device_id, chunk_size) = {
                let settings = self.settings.read().unwrap();
                (settings.device_id.clone(), settings.chunk_size)
            };

            let (session, transfer_ids) = SendSession::prepare(
                self.bus.clone(),
                self.store.clone(),
                client,
                our_device_id,
                target.clone(),
                paths,
                chunk_size,
                self.next_transfer_id.clone(),
                self.cancel_registry.clone(),
            )
            .await?;

            info!(
                peer = %target.alias,
                transfers = ?transfer_ids,
                "send session starting"
            );
            Ok::<SendSession, Error>(session)
        }
        .await;

        match result {
            Ok(session) => {
                let our_info = self.our_device_info();
                session.run(our_info).await;
            }
            Err(e) => {
                error!("failed to start send session: {}", e);
                self.bus.post_notification(Notification::peer_error(
                    e.to_string(),
                    format!("{}:{}", target.ip_address, target.port),
                ));
            }
        }
    }

    /// Idempotent: setting an already-set flag (or a missing one) does
    /// nothing and emits no second notification.
    fn cancel_send(&self, transfer_id: u64) {
        let registry = self.cancel_registry.lock().unwrap();
        match registry.get(&transfer_id) {
            Some(flag) => {
                if !flag.swap(true, Ordering::SeqCst) {
                    info!(transfer_id, "send cancellation requested");
                }
            }
            None => {
                info!(transfer_id, "cancel for unknown or finished transfer ignored");
            }
        }
    }

    fn modify_settings(&self, patch: &serde_json::Value) -> Result<()> {
        let snapshot = {
            let mut settings = self.settings.write().unwrap();
            settings
                .merge(patch)
                .map_err(|e| Error::Protocol(e.to_string()))?;
            settings.clone()
        };
        snapshot
            .save(&self.config_dir)
            .map_err(|e| Error::Fatal(e.to_string()))?;
        self.certs
            .set_allow_unregistered(snapshot.allow_unregistered);
        self.emit_settings();
        Ok(())
    }

    pub fn emit_settings(&self) {
        let settings = self.settings.read().unwrap();
        if let Ok(value) = serde_json::to_value(&*settings) {
            self.bus.post_notification(Notification::Settings(value));
        }
    }

    /// Trust-on-first-use handshake with a discovered device: pin its
    /// advertised fingerprint, then prove the auth code over the pinned
    /// channel.
    async fn connect_to_device(self: Arc<Self>, device_id: String, auth_code: String) {
        let Some(device) = self.find_device(&device_id) else {
            self.bus.post_notification(Notification::error(format!(
                "unknown device {}",
                device_id
            )));
            return;
        };

        if let Some(fingerprint) = &device.fingerprint {
            let previous = self
                .certs
                .pin(&device.ip_address, device.port, fingerprint);
            if let Some(old) = previous {
                self.bus.post_notification(Notification::peer_error(
                    format!(
                        "fingerprint for {} changed (was {}...)",
                        device.endpoint_key(),
                        &old[..8.min(old.len())]
                    ),
                    device.endpoint_key(),
                ));
            }
        }

        let result = async {
            let client = PeerClient::new(&self.tls, &device.ip_address, device.port)?;

            // Discovery may not have carried a fingerprint; learn it
            // over /info before anything sensitive happens.
            if device.fingerprint.is_none() {
                let remote = client.info().await?;
                self.certs
                    .pin(&device.ip_address, device.port, &remote.fingerprint);
            }

            if !client.ping().await? {
                return Err(Error::Protocol(format!(
                    "{} did not answer the ping",
                    client.peer()
                )));
            }

            let request = ConnectRequest {
                auth_code,
                device_info: self.our_device_info(),
            };
            client.connect_device(&request).await
        }
        .await;

        match result {
            Ok(response) if response.success => {
                // The fingerprint proven over TLS is the authoritative pin.
                self.certs
                    .pin(&device.ip_address, device.port, &response.fingerprint);
                info!(%device_id, "connected and pinned");
                self.bus.post_notification(Notification::ConnectedToDevice {
                    device_id,
                    device_name: Some(device.alias.clone()),
                });
            }
            Ok(_) => {
                self.bus.post_notification(Notification::peer_error(
                    "device refused the connection",
                    device.endpoint_key(),
                ));
            }
            Err(e) => {
                warn!(%device_id, "connect failed: {}", e);
                self.bus.post_notification(Notification::peer_error(
                    e.to_string(),
                    device.endpoint_key(),
                ));
            }
        }
    }

    // ------------------------------------------------------------------
    // HTTP surface entry points
    // ------------------------------------------------------------------

    pub fn info_response(&self) -> InfoResponse {
        let settings = self.settings.read().unwrap();
        InfoResponse {
            alias: settings.alias.clone(),
            version: PROTOCOL_VERSION.to_string(),
            device_model: settings.device_model.clone(),
            device_type: settings.device_type,
            fingerprint: self.certs.fingerprint().to_string(),
            port: settings.port,
            protocol: "https".to_string(),
        }
    }

    pub fn handle_connect(&self, request: ConnectRequest) -> Result<ConnectResponse> {
        let expected = self.settings.read().unwrap().auth_code.clone();
        if expected.is_empty() || request.auth_code != expected {
            return Err(Error::PolicyRejected("auth code mismatch".into()));
        }

        if let Some(fingerprint) = &request.device_info.fingerprint {
            self.certs.pin(
                &request.device_info.ip_address,
                request.device_info.port,
                fingerprint,
            );
        }
        self.register_device(request.device_info);

        Ok(ConnectResponse {
            success: true,
            fingerprint: self.certs.fingerprint().to_string(),
        })
    }

    pub async fn handle_send_request(
        &self,
        peer_ip: &str,
        mut request: SendRequest,
    ) -> Result<SendResponse> {
        // The observed source address outranks whatever the payload
        // claims.
        request.info.ip_address = peer_ip.to_string();

        let info = request.info.clone();
        let response = self.receive.handle_send_request(request).await?;

        // First interactive acceptance doubles as trust-on-first-use.
        if let Some(fingerprint) = &info.fingerprint {
            if self
                .certs
                .expected_fingerprint(&info.ip_address, info.port)
                .is_none()
            {
                self.certs.pin(&info.ip_address, info.port, fingerprint);
            }
        }
        self.register_device(info);

        Ok(response)
    }

    pub async fn handle_upload(
        &self,
        session_id: &str,
        file_id: &str,
        chunk_index: u64,
        body: &[u8],
    ) -> Result<u64> {
        self.receive
            .handle_upload(session_id, file_id, chunk_index, body)
            .await
    }

    pub async fn handle_cancel(&self, request: CancelRequest) {
        self.receive.handle_cancel_from_peer(request.transfer_id).await;
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn get_active_transfers(&self) -> Result<Vec<TransferState>> {
        Ok(self
            .store
            .list()?
            .into_iter()
            .filter(|m| {
                matches!(
                    m.status,
                    TransferStatus::Pending | TransferStatus::InProgress
                )
            })
            .map(|m| TransferState {
                transfer_id: m.transfer_id,
                status: m.status,
                bytes_transferred: m.bytes_completed(),
                total_bytes: m.file_size,
                file_name: m.file_name.clone(),
                last_activity: m.updated_at,
            })
            .collect())
    }

    pub fn get_incomplete_transfers(&self) -> Result<Vec<TransferState>> {
        Ok(self
            .store
            .list_incomplete()?
            .into_iter()
            .map(|m| TransferState {
                transfer_id: m.transfer_id,
                status: m.status,
                bytes_transferred: m.bytes_completed(),
                total_bytes: m.file_size,
                file_name: m.file_name.clone(),
                last_activity: m.updated_at,
            })
            .collect())
    }

    pub fn find_incomplete(&self, file_name: &str, file_size: u64) -> Result<Option<u64>> {
        Ok(self
            .store
            .find_incomplete(file_name, file_size, None)?
            .map(|m| m.transfer_id))
    }
}

/// Drain the bus at the host's cadence until shutdown is requested.
pub async fn run_poll_loop(engine: Arc<TransferEngine>) {
    let mut interval = tokio::time::interval(std::time::Duration::from_millis(100));
    loop {
        interval.tick().await;
        if engine.shutdown_requested() {
            info!("poll loop stopping");
            return;
        }
        while let Some(operation) = engine.bus().poll_operation() {
            TransferEngine::handle_operation(&engine, operation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    use lansend_protocol::DeviceType;

    fn engine_fixture() -> (Arc<TransferEngine>, TempDir) {
        let dir = TempDir::new().unwrap();
        let bus = Arc::new(EventBus::new());
        let store =
            Arc::new(TransferMetadataStore::new(dir.path().join("metadata")).unwrap());
        let certs =
            Arc::new(CertificateStore::init(dir.path().join("certs")).unwrap());
        let mut settings = Settings::default();
        settings.save_dir = dir.path().join("downloads");
        settings.auth_code = "123456".into();
        let engine = TransferEngine::new(
            bus,
            store,
            certs,
            settings,
            dir.path().to_path_buf(),
        )
        .unwrap();
        (engine, dir)
    }

    fn device(id: &str) -> DeviceInfo {
        DeviceInfo {
            device_id: id.into(),
            alias: format!("alias-{}", id),
            device_model: "PC".into(),
            device_type: DeviceType::Desktop,
            os: "linux".into(),
            ip_address: "192.168.1.50".into(),
            port: 53317,
            uses_https: true,
            fingerprint: Some("cd".repeat(32)),
        }
    }

    #[test]
    fn test_register_device_emits_found_once() {
        let (engine, _dir) = engine_fixture();

        engine.register_device(device("d1"));
        engine.register_device(device("d1"));

        assert!(matches!(
            engine.bus().poll_notification(),
            Some(Notification::FoundDevice(_))
        ));
        assert!(engine.bus().poll_notification().is_none());

        engine.remove_device("d1");
        assert!(matches!(
            engine.bus().poll_notification(),
            Some(Notification::LostDevice { .. })
        ));
    }

    #[test]
    fn test_handle_connect_checks_auth_code() {
        let (engine, _dir) = engine_fixture();

        let bad = ConnectRequest {
            auth_code: "wrong".into(),
            device_info: device("d2"),
        };
        assert!(matches!(
            engine.handle_connect(bad),
            Err(Error::PolicyRejected(_))
        ));

        let good = ConnectRequest {
            auth_code: "123456".into(),
            device_info: device("d2"),
        };
        let response = engine.handle_connect(good).unwrap();
        assert!(response.success);
        assert_eq!(response.fingerprint, engine.certs().fingerprint());

        // The peer got pinned and registered.
        assert_eq!(
            engine
                .certs()
                .expected_fingerprint("192.168.1.50", 53317)
                .as_deref(),
            Some("cd".repeat(32).as_str())
        );
        assert!(engine.find_device("d2").is_some());
    }

    #[test]
    fn test_cancel_unknown_transfer_is_noop() {
        let (engine, _dir) = engine_fixture();
        engine.cancel_send(999);
        assert!(engine.bus().poll_notification().is_none());
    }

    #[test]
    fn test_info_response_carries_fingerprint() {
        let (engine, _dir) = engine_fixture();
        let info = engine.info_response();
        assert_eq!(info.fingerprint, engine.certs().fingerprint());
        assert_eq!(info.port, 53317);
        assert_eq!(info.protocol, "https");
    }

    #[test]
    fn test_modify_settings_persists_and_notifies() {
        let (engine, dir) = engine_fixture();

        TransferEngine::handle_operation(
            &engine,
            Operation::ModifySettings {
                settings: serde_json::json!({"alias": "renamed"}),
            },
        );

        assert_eq!(engine.settings_snapshot().alias, "renamed");

        let reloaded = Settings::load_or_init(dir.path()).unwrap();
        assert_eq!(reloaded.alias, "renamed");

        let mut saw_settings = false;
        while let Some(n) = engine.bus().poll_notification() {
            if matches!(n, Notification::Settings(_)) {
                saw_settings = true;
            }
        }
        assert!(saw_settings);
    }
}
