//! Server-side state machine for one incoming transfer session.
//!
//! A controller handles at most one session at a time: a send-request
//! parks in AwaitingConfirmation until the host answers (or 60 s pass),
//! then chunks stream to disk with metadata persisted after each one.
//! The CancelReceive latch is polled at every handler entry.

use std::collections::HashMap;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{info, warn};

use lansend_common::sha256_file_hex;
use lansend_protocol::{
    DeviceInfo, IncomingFile, Notification, SendRequest, SendResponse, TransferProgress,
};

use crate::error::{Error, Result};
use crate::event_bus::EventBus;
use crate::metadata::{TransferMetadata, TransferMetadataStore, TransferStatus};

const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceivePhase {
    Idle,
    AwaitingConfirmation,
    Receiving,
}

struct ReceiveFile {
    transfer_id: u64,
    meta: TransferMetadata,
    path: PathBuf,
    /// Bytes already on disk when the session (re)started, excluded
    /// from speed calculations.
    resumed_bytes: u64,
    started_at: Instant,
}

struct ActiveSession {
    session_id: String,
    peer: DeviceInfo,
    files: HashMap<String, ReceiveFile>,
}

enum Phase {
    Idle,
    AwaitingConfirmation,
    Receiving(ActiveSession),
}

/// Controller configuration, a snapshot of the relevant settings taken
/// when the engine constructs it.
pub struct ReceiveConfig {
    pub device_id: String,
    pub save_dir: PathBuf,
    pub remove_partial_on_cancel: bool,
}

pub struct ReceiveController {
    bus: Arc<EventBus>,
    store: Arc<TransferMetadataStore>,
    config: ReceiveConfig,
    next_transfer_id: Arc<AtomicU64>,
    session_counter: AtomicU64,
    phase: Mutex<Phase>,
}

impl ReceiveController {
    pub fn new(
        bus: Arc<EventBus>,
        store: Arc<TransferMetadataStore>,
        config: ReceiveConfig,
        next_transfer_id: Arc<AtomicU64>,
    ) -> Self {
        Self {
            bus,
            store,
            config,
            next_transfer_id,
            session_counter: AtomicU64::new(1),
            phase: Mutex::new(Phase::Idle),
        }
    }

    pub async fn phase(&self) -> ReceivePhase {
        match *self.phase.lock().await {
            Phase::Idle => ReceivePhase::Idle,
            Phase::AwaitingConfirmation => ReceivePhase::AwaitingConfirmation,
            Phase::Receiving(_) => ReceivePhase::Receiving,
        }
    }

    /// Handle `POST /send-request`. Blocks (async) until the host
    /// answers the confirmation latch or the window expires.
    pub async fn handle_send_request(&self, request: SendRequest) -> Result<SendResponse> {
        self.poll_cancel_latch().await;

        {
            let mut phase = self.phase.lock().await;
            match *phase {
                Phase::Idle => *phase = Phase::AwaitingConfirmation,
                _ => {
                    return Err(Error::PolicyRejected(
                        "another receive session is active".into(),
                    ))
                }
            }
        }

        let offered: Vec<IncomingFile> = request
            .files
            .iter()
            .map(|(file_id, f)| IncomingFile {
                file_id: file_id.clone(),
                file_name: f.file_name.clone(),
                size: f.size,
            })
            .collect();

        let session_id = format!(
            "recv_{}",
            self.session_counter.fetch_add(1, Ordering::SeqCst)
        );

        self.bus.post_notification(Notification::ReceiveRequested {
            session_id: session_id.clone(),
            peer: request.info.clone(),
            files: offered,
        });

        info!(
            %session_id,
            peer = %request.info.alias,
            files = request.files.len(),
            "incoming send-request, awaiting confirmation"
        );

        let confirm = self.bus.await_confirm_receive(CONFIRMATION_TIMEOUT).await;

        let accepted_ids: Vec<String> = match confirm {
            Some(c) if c.accepted => match c.accepted_file_ids {
                Some(ids) => ids
                    .into_iter()
                    .filter(|id| request.files.contains_key(id))
                    .collect(),
                None => request.files.keys().cloned().collect(),
            },
            other => {
                *self.phase.lock().await = Phase::Idle;
                let reason = if other.is_none() {
                    "confirmation timed out"
                } else {
                    "recipient declined"
                };
                info!(%session_id, "{}", reason);
                return Err(Error::PolicyRejected(reason.into()));
            }
        };

        if accepted_ids.is_empty() {
            *self.phase.lock().await = Phase::Idle;
            return Err(Error::PolicyRejected("no files accepted".into()));
        }

        match self.begin_session(session_id, request, accepted_ids).await {
            Ok(response) => Ok(response),
            Err(e) => {
                *self.phase.lock().await = Phase::Idle;
                Err(e)
            }
        }
    }

    async fn begin_session(
        &self,
        session_id: String,
        request: SendRequest,
        accepted_ids: Vec<String>,
    ) -> Result<SendResponse> {
        let mut files = HashMap::new();
        let mut transfer_ids = std::collections::BTreeMap::new();
        let mut completed_chunks = std::collections::BTreeMap::new();

        for file_id in &accepted_ids {
            let offer = &request.files[file_id];

            // Reuse an interrupted record when the offer matches it.
            let resumed = self
                .store
                .find_incomplete(&offer.file_name, offer.size, offer.sha256.as_deref())?
                .filter(|m| m.chunk_size == offer.chunk_size);

            let (meta, path) = match resumed {
                Some(meta) => {
                    let path = meta
                        .destination_filepath
                        .clone()
                        .unwrap_or_else(|| self.config.save_dir.join(&meta.file_name));
                    info!(
                        transfer_id = meta.transfer_id,
                        file = %meta.file_name,
                        done = meta.completed_chunk_indices().len(),
                        "resuming interrupted receive"
                    );
                    (meta, path)
                }
                None => {
                    let transfer_id = self.next_transfer_id.fetch_add(1, Ordering::SeqCst);
                    let mut meta = TransferMetadata::new(
                        transfer_id,
                        offer.file_name.clone(),
                        offer.size,
                        offer.sha256.clone(),
                        offer.file_type,
                        request.info.device_id.clone(),
                        self.config.device_id.clone(),
                        offer.chunk_size,
                    );
                    let path = unique_destination(&self.config.save_dir, &offer.file_name);
                    meta.destination_filepath = Some(path.clone());
                    (meta, path)
                }
            };

            transfer_ids.insert(file_id.clone(), meta.transfer_id);
            let done = meta.completed_chunk_indices();
            if !done.is_empty() {
                completed_chunks.insert(file_id.clone(), done);
            }

            files.insert(
                file_id.clone(),
                ReceiveFile {
                    transfer_id: meta.transfer_id,
                    resumed_bytes: meta.bytes_completed(),
                    started_at: Instant::now(),
                    meta,
                    path,
                },
            );
        }

        // Prepare destinations and settle empty files immediately.
        let mut receiving = false;
        for file in files.values_mut() {
            if file.meta.file_size == 0 {
                prepare_destination(&file.path, 0).await?;
                file.meta.set_status(TransferStatus::Completed)?;
                self.store.update(&file.meta)?;
                self.bus.post_notification(Notification::TransferCompleted {
                    transfer_id: file.transfer_id,
                    file_name: file.meta.file_name.clone(),
                });
                continue;
            }

            prepare_destination(&file.path, file.meta.file_size).await?;
            file.meta.set_status(TransferStatus::InProgress)?;
            self.store.update(&file.meta)?;
            receiving = true;
        }

        let response = SendResponse {
            session_id: session_id.clone(),
            accepted_file_ids: accepted_ids,
            transfer_ids,
            completed_chunks,
        };

        *self.phase.lock().await = if receiving {
            Phase::Receiving(ActiveSession {
                session_id,
                peer: request.info,
                files,
            })
        } else {
            Phase::Idle
        };

        Ok(response)
    }

    /// Handle one `POST /upload`. Returns the transfer id the chunk
    /// belonged to so the HTTP layer can log it.
    pub async fn handle_upload(
        &self,
        session_id: &str,
        file_id: &str,
        chunk_index: u64,
        body: &[u8],
    ) -> Result<u64> {
        self.poll_cancel_latch().await;

        let mut phase = self.phase.lock().await;
        let session = match &mut *phase {
            Phase::Receiving(session) if session.session_id == session_id => session,
            Phase::Receiving(_) => {
                return Err(Error::Protocol(format!("unknown session {}", session_id)))
            }
            _ => {
                return Err(Error::PolicyRejected(
                    "no receive session in progress".into(),
                ))
            }
        };

        let file = session
            .files
            .get_mut(file_id)
            .ok_or_else(|| Error::Protocol(format!("unknown file id {}", file_id)))?;

        if file.meta.status.is_terminal() {
            return Err(Error::Protocol(format!(
                "transfer {} already settled",
                file.transfer_id
            )));
        }
        if chunk_index >= file.meta.total_chunks {
            return Err(Error::Protocol(format!(
                "chunk index {} out of range",
                chunk_index
            )));
        }
        let expected_len = file.meta.chunk_len(chunk_index);
        if body.len() as u64 != expected_len {
            return Err(Error::Protocol(format!(
                "chunk {} has {} bytes, expected {}",
                chunk_index,
                body.len(),
                expected_len
            )));
        }

        let offset = chunk_index * file.meta.chunk_size;
        write_at(&file.path, offset, body.to_vec()).await?;

        file.meta.mark_chunk_completed(chunk_index)?;
        self.store.update(&file.meta)?;
        self.emit_progress(file);

        let transfer_id = file.transfer_id;
        if file.meta.all_chunks_completed() {
            self.finalize_file(file).await?;
            let all_settled = session.files.values().all(|f| f.meta.status.is_terminal());
            if all_settled {
                info!(session_id, "receive session complete");
                *phase = Phase::Idle;
            }
        }

        Ok(transfer_id)
    }

    /// Peer-initiated cancel (`POST /cancel`): tear the session down if
    /// it contains the transfer. Always succeeds.
    pub async fn handle_cancel_from_peer(&self, transfer_id: u64) {
        let mut phase = self.phase.lock().await;
        let matches = match &*phase {
            Phase::Receiving(session) => {
                session.files.values().any(|f| f.transfer_id == transfer_id)
            }
            _ => false,
        };

        if matches {
            if let Phase::Receiving(session) = std::mem::replace(&mut *phase, Phase::Idle) {
                self.discard_session(session);
            }
            self.bus
                .post_notification(Notification::ReceivingCancelledBySender { transfer_id });
        }
    }

    /// Consume the CancelReceive latch; if it names a transfer in the
    /// active session, the session is torn down.
    async fn poll_cancel_latch(&self) {
        let Some(transfer_id) = self.bus.poll_cancel_receive() else {
            return;
        };

        let mut phase = self.phase.lock().await;
        let matches = match &*phase {
            Phase::Receiving(session) => {
                session.files.values().any(|f| f.transfer_id == transfer_id)
            }
            _ => false,
        };

        if matches {
            info!(transfer_id, "receive cancelled by user");
            if let Phase::Receiving(session) = std::mem::replace(&mut *phase, Phase::Idle) {
                self.discard_session(session);
            }
            self.bus
                .post_notification(Notification::ReceivingCancelledBySender { transfer_id });
        } else {
            warn!(transfer_id, "cancel-receive latch named an unknown transfer");
            self.bus.post_notification(Notification::transfer_error(
                "no active receive session to cancel",
                transfer_id,
            ));
        }
    }

    fn discard_session(&self, session: ActiveSession) {
        for file in session.files.values() {
            if file.meta.status.is_terminal() {
                continue;
            }
            if self.config.remove_partial_on_cancel {
                if let Err(e) = std::fs::remove_file(&file.path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        warn!("failed to remove partial file {:?}: {}", file.path, e);
                    }
                }
            }
            self.store.delete(file.transfer_id);
        }
        info!(
            session_id = %session.session_id,
            peer = %session.peer.alias,
            "discarded receive session"
        );
    }

    async fn finalize_file(&self, file: &mut ReceiveFile) -> Result<()> {
        if let Some(expected) = file.meta.file_hash.clone() {
            let path = file.path.clone();
            let actual = tokio::task::spawn_blocking(move || sha256_file_hex(&path))
                .await
                .map_err(|e| Error::Fatal(format!("hash task panicked: {}", e)))??;

            if !actual.eq_ignore_ascii_case(&expected) {
                warn!(
                    transfer_id = file.transfer_id,
                    "file hash mismatch after final chunk"
                );
                file.meta.set_status(TransferStatus::Failed)?;
                self.store.update(&file.meta)?;
                self.bus.post_notification(Notification::TransferFailed {
                    transfer_id: file.transfer_id,
                    error: "file hash mismatch".into(),
                });
                return Ok(());
            }
        }

        file.meta.set_status(TransferStatus::Completed)?;
        self.store.update(&file.meta)?;
        info!(
            transfer_id = file.transfer_id,
            file = %file.meta.file_name,
            "receive completed and verified"
        );
        self.bus.post_notification(Notification::TransferCompleted {
            transfer_id: file.transfer_id,
            file_name: file.meta.file_name.clone(),
        });
        Ok(())
    }

    fn emit_progress(&self, file: &ReceiveFile) {
        let bytes = file.meta.bytes_completed();
        let total = file.meta.file_size;
        let fresh = bytes.saturating_sub(file.resumed_bytes);
        let elapsed = file.started_at.elapsed().as_secs_f64().max(0.001);
        let speed = (fresh as f64 / elapsed) as u64;
        let remaining = total.saturating_sub(bytes);
        let eta = if speed > 0 {
            Some(remaining / speed)
        } else {
            None
        };

        self.bus
            .post_notification(Notification::TransferProgress(TransferProgress {
                transfer_id: file.transfer_id,
                progress: if total == 0 {
                    1.0
                } else {
                    bytes as f64 / total as f64
                },
                bytes_transferred: bytes,
                total_bytes: total,
                speed_bps: speed,
                eta_seconds: eta,
            }));
    }
}

/// Create (or truncate to size) the destination file off the runtime.
async fn prepare_destination(path: &Path, size: u64) -> Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        file.set_len(size)?;
        Ok(())
    })
    .await
    .map_err(|e| Error::Fatal(format!("file task panicked: {}", e)))??;
    Ok(())
}

/// Positioned write off the runtime.
async fn write_at(path: &Path, offset: u64, data: Vec<u8>) -> Result<()> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let mut file = std::fs::OpenOptions::new().write(true).open(&path)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&data)?;
        Ok(())
    })
    .await
    .map_err(|e| Error::Fatal(format!("file task panicked: {}", e)))??;
    Ok(())
}

/// Pick a destination that does not collide with an existing file:
/// `demo.bin`, `demo (1).bin`, `demo (2).bin`, ...
fn unique_destination(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    let ext = Path::new(file_name).extension().and_then(|e| e.to_str());

    for n in 1.. {
        let name = match ext {
            Some(ext) => format!("{} ({}).{}", stem, n, ext),
            None => format!("{} ({})", stem, n),
        };
        let candidate = dir.join(name);
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use tempfile::TempDir;

    use lansend_common::sha256_hex;
    use lansend_protocol::{ConfirmReceive, DeviceType, FileMetadataRequest, FileType, Operation};

    fn peer_info() -> DeviceInfo {
        DeviceInfo {
            device_id: "peer-device".into(),
            alias: "peer".into(),
            device_model: "PC".into(),
            device_type: DeviceType::Desktop,
            os: "linux".into(),
            ip_address: "127.0.0.1".into(),
            port: 53317,
            uses_https: true,
            fingerprint: None,
        }
    }

    fn send_request(files: Vec<(&str, &str, &[u8], u64)>) -> SendRequest {
        let mut map = BTreeMap::new();
        for (id, name, data, chunk_size) in files {
            map.insert(
                id.to_string(),
                FileMetadataRequest {
                    file_name: name.to_string(),
                    size: data.len() as u64,
                    file_type: FileType::from_path(name),
                    sha256: Some(sha256_hex(data)),
                    chunk_size,
                },
            );
        }
        SendRequest {
            info: peer_info(),
            files: map,
        }
    }

    struct Fixture {
        bus: Arc<EventBus>,
        controller: ReceiveController,
        _dirs: (TempDir, TempDir),
        save_dir: PathBuf,
    }

    fn fixture() -> Fixture {
        let meta_dir = TempDir::new().unwrap();
        let save = TempDir::new().unwrap();
        let save_dir = save.path().to_path_buf();
        let bus = Arc::new(EventBus::new());
        let store = Arc::new(TransferMetadataStore::new(meta_dir.path()).unwrap());
        let controller = ReceiveController::new(
            bus.clone(),
            store,
            ReceiveConfig {
                device_id: "our-device".into(),
                save_dir: save_dir.clone(),
                remove_partial_on_cancel: true,
            },
            Arc::new(AtomicU64::new(1)),
        );
        Fixture {
            bus,
            controller,
            _dirs: (meta_dir, save),
            save_dir,
        }
    }

    fn accept_all(bus: &EventBus) {
        bus.post_operation(Operation::ConfirmReceive(ConfirmReceive {
            accepted: true,
            accepted_file_ids: None,
        }));
    }

    #[tokio::test]
    async fn test_reject_returns_policy_error() {
        let fx = fixture();
        fx.bus.post_operation(Operation::ConfirmReceive(ConfirmReceive {
            accepted: false,
            accepted_file_ids: None,
        }));

        let err = fx
            .controller
            .handle_send_request(send_request(vec![("f1", "a.txt", b"hello", 4)]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PolicyRejected(_)));
        assert_eq!(fx.controller.phase().await, ReceivePhase::Idle);
    }

    #[tokio::test]
    async fn test_full_receive_roundtrip() {
        let fx = fixture();
        accept_all(&fx.bus);

        let data = b"hello chunked world".to_vec();
        let request = send_request(vec![("f1", "a.txt", &data, 8)]);
        let response = fx.controller.handle_send_request(request).await.unwrap();

        assert_eq!(response.accepted_file_ids, vec!["f1".to_string()]);
        let transfer_id = response.transfer_ids["f1"];
        assert_eq!(fx.controller.phase().await, ReceivePhase::Receiving);

        // 19 bytes at chunk size 8 -> chunks of 8, 8, 3.
        for (index, chunk) in data.chunks(8).enumerate() {
            fx.controller
                .handle_upload(&response.session_id, "f1", index as u64, chunk)
                .await
                .unwrap();
        }

        assert_eq!(fx.controller.phase().await, ReceivePhase::Idle);
        let received = std::fs::read(fx.save_dir.join("a.txt")).unwrap();
        assert_eq!(received, data);

        // The bus saw progress and a completion for this transfer.
        let mut completed = false;
        while let Some(n) = fx.bus.poll_notification() {
            if let Notification::TransferCompleted { transfer_id: id, .. } = n {
                assert_eq!(id, transfer_id);
                completed = true;
            }
        }
        assert!(completed);
    }

    #[tokio::test]
    async fn test_empty_file_completes_without_uploads() {
        let fx = fixture();
        accept_all(&fx.bus);

        let response = fx
            .controller
            .handle_send_request(send_request(vec![("f1", "empty.txt", b"", 1024)]))
            .await
            .unwrap();

        // No receiving phase: the session settled at acceptance.
        assert_eq!(fx.controller.phase().await, ReceivePhase::Idle);
        assert!(response.completed_chunks.is_empty());
        assert_eq!(
            std::fs::read(fx.save_dir.join("empty.txt")).unwrap().len(),
            0
        );
    }

    #[tokio::test]
    async fn test_wrong_chunk_length_rejected() {
        let fx = fixture();
        accept_all(&fx.bus);

        let data = vec![7u8; 16];
        let response = fx
            .controller
            .handle_send_request(send_request(vec![("f1", "b.bin", &data, 8)]))
            .await
            .unwrap();

        let err = fx
            .controller
            .handle_upload(&response.session_id, "f1", 0, &data[..5])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_cancel_latch_discards_session_and_partial() {
        let fx = fixture();
        accept_all(&fx.bus);

        let data = vec![1u8; 24];
        let response = fx
            .controller
            .handle_send_request(send_request(vec![("f1", "c.bin", &data, 8)]))
            .await
            .unwrap();
        let transfer_id = response.transfer_ids["f1"];

        fx.controller
            .handle_upload(&response.session_id, "f1", 0, &data[..8])
            .await
            .unwrap();

        // User cancels between chunks; the next handler entry sees it.
        fx.bus.post_operation(Operation::CancelReceive { transfer_id });
        let err = fx
            .controller
            .handle_upload(&response.session_id, "f1", 1, &data[8..16])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PolicyRejected(_)));
        assert_eq!(fx.controller.phase().await, ReceivePhase::Idle);
        assert!(!fx.save_dir.join("c.bin").exists());

        // Cancellation is idempotent: a second latch post finds no
        // session, reports an error, and emits no second cancellation.
        fx.bus.post_operation(Operation::CancelReceive { transfer_id });
        let err = fx
            .controller
            .handle_upload(&response.session_id, "f1", 2, &data[16..])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PolicyRejected(_)));

        let mut cancelled = 0;
        let mut errors = 0;
        while let Some(n) = fx.bus.poll_notification() {
            match n {
                Notification::ReceivingCancelledBySender { .. } => cancelled += 1,
                Notification::Error(e) => {
                    assert_eq!(e.transfer_id, Some(transfer_id));
                    errors += 1;
                }
                _ => {}
            }
        }
        assert_eq!(cancelled, 1);
        assert_eq!(errors, 1);
    }

    #[tokio::test]
    async fn test_second_request_while_busy_is_rejected() {
        let fx = fixture();
        accept_all(&fx.bus);

        let data = vec![2u8; 16];
        let _response = fx
            .controller
            .handle_send_request(send_request(vec![("f1", "d.bin", &data, 8)]))
            .await
            .unwrap();

        let err = fx
            .controller
            .handle_send_request(send_request(vec![("f2", "e.bin", &data, 8)]))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PolicyRejected(_)));
    }

    #[tokio::test]
    async fn test_hash_mismatch_fails_transfer() {
        let fx = fixture();
        accept_all(&fx.bus);

        let data = vec![3u8; 8];
        let mut request = send_request(vec![("f1", "f.bin", &data, 8)]);
        // Claim a different hash than what will be uploaded.
        request.files.get_mut("f1").unwrap().sha256 = Some("0".repeat(64));

        let response = fx.controller.handle_send_request(request).await.unwrap();
        fx.controller
            .handle_upload(&response.session_id, "f1", 0, &data)
            .await
            .unwrap();

        let mut failed = false;
        while let Some(n) = fx.bus.poll_notification() {
            if matches!(n, Notification::TransferFailed { .. }) {
                failed = true;
            }
        }
        assert!(failed);
    }

    #[test]
    fn test_unique_destination_suffixes() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("a (1).txt"), b"x").unwrap();

        let picked = unique_destination(dir.path(), "a.txt");
        assert_eq!(picked.file_name().unwrap(), "a (2).txt");

        let fresh = unique_destination(dir.path(), "b.txt");
        assert_eq!(fresh.file_name().unwrap(), "b.txt");
    }
}
