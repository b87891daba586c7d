//! Client-side state machine for one outgoing transfer.
//!
//! start -> Requesting -> Uploading -> Done, with Rejected / Cancelled /
//! Failed exits. One in-flight chunk per file; per-chunk transient
//! errors are retried with exponential backoff before the session fails.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use lansend_common::{Chunker, FileChunks};
use lansend_protocol::{
    DeviceInfo, FileMetadataRequest, FileType, Notification, SendRequest, TransferProgress,
};

use crate::client::PeerClient;
use crate::error::{Error, Result};
use crate::event_bus::EventBus;
use crate::metadata::{TransferMetadata, TransferMetadataStore, TransferStatus};

/// Initial attempt plus three retries, backing off 100 ms / 400 ms / 1.6 s.
const RETRY_BACKOFF: [Duration; 3] = [
    Duration::from_millis(100),
    Duration::from_millis(400),
    Duration::from_millis(1600),
];

/// Cancellation flags of the live send sessions, keyed by transfer id.
/// The engine sets a flag; the owning session notices it between chunks.
pub type CancelRegistry = Arc<Mutex<HashMap<u64, Arc<AtomicBool>>>>;

struct PlannedFile {
    file_id: String,
    transfer_id: u64,
    path: PathBuf,
    chunks: FileChunks,
    meta: TransferMetadata,
}

pub struct SendSession {
    bus: Arc<EventBus>,
    store: Arc<TransferMetadataStore>,
    client: PeerClient,
    chunk_size: u64,
    cancel: Arc<AtomicBool>,
    cancel_registry: CancelRegistry,
    files: Vec<PlannedFile>,
}

impl SendSession {
    /// Hash and chunk the input files, create their metadata records,
    /// and register cancellation flags. Returns the session and the
    /// transfer ids it now owns.
    #[allow(clippy::too_many_arguments)]
    pub async fn prepare(
        bus: Arc<EventBus>,
        store: Arc<TransferMetadataStore>,
        client: PeerClient,
        our_device_id: String,
        target: DeviceInfo,
        file_paths: Vec<PathBuf>,
        chunk_size: u64,
        next_transfer_id: Arc<AtomicU64>,
        cancel_registry: CancelRegistry,
    ) -> Result<(Self, Vec<u64>)> {
        let cancel = Arc::new(AtomicBool::new(false));
        let mut files = Vec::with_capacity(file_paths.len());

        for path in file_paths {
            let chunks = {
                let path = path.clone();
                tokio::task::spawn_blocking(move || -> std::io::Result<FileChunks> {
                    let mut file = std::fs::File::open(&path)?;
                    Chunker::new(chunk_size).compute_chunks(&mut file)
                })
                .await
                .map_err(|e| Error::Fatal(format!("hash task panicked: {}", e)))??
            };

            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| Error::Protocol(format!("unusable file name: {:?}", path)))?
                .to_string();

            let transfer_id = next_transfer_id.fetch_add(1, Ordering::SeqCst);
            let mut meta = TransferMetadata::new(
                transfer_id,
                file_name,
                chunks.total_size,
                Some(chunks.file_hash.clone()),
                FileType::from_path(&path),
                our_device_id.clone(),
                target.device_id.clone(),
                chunk_size,
            );
            meta.local_filepath = Some(path.clone());
            for chunk in &chunks.chunks {
                meta.set_chunk_hash(chunk.index, chunk.hash.clone());
            }
            store.create(&meta)?;

            files.push(PlannedFile {
                file_id: uuid::Uuid::new_v4().to_string(),
                transfer_id,
                path,
                chunks,
                meta,
            });
        }

        let transfer_ids: Vec<u64> = files.iter().map(|f| f.transfer_id).collect();
        {
            let mut registry = cancel_registry.lock().unwrap();
            for id in &transfer_ids {
                registry.insert(*id, cancel.clone());
            }
        }

        Ok((
            Self {
                bus,
                store,
                client,
                chunk_size,
                cancel,
                cancel_registry,
                files,
            },
            transfer_ids,
        ))
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    /// Drive the session to a terminal state. Every exit path settles
    /// the metadata records and unregisters the cancel flags.
    pub async fn run(mut self, our_info: DeviceInfo) {
        let result = self.drive(our_info).await;

        if let Err(e) = result {
            match e {
                Error::PolicyRejected(_) => { /* already reported */ }
                other => {
                    warn!("send session to {} failed: {}", self.client.peer(), other);
                    for file in &mut self.files {
                        if file.meta.status.is_terminal() {
                            continue;
                        }
                        let _ = file.meta.set_status(TransferStatus::Failed);
                        let _ = self.store.update(&file.meta);
                        self.bus.post_notification(Notification::TransferFailed {
                            transfer_id: file.transfer_id,
                            error: other.to_string(),
                        });
                    }
                }
            }
        }

        let mut registry = self.cancel_registry.lock().unwrap();
        for file in &self.files {
            registry.remove(&file.transfer_id);
        }
    }

    async fn drive(&mut self, our_info: DeviceInfo) -> Result<()> {
        let transfer_ids: Vec<u64> = self.files.iter().map(|f| f.transfer_id).collect();

        // Requesting.
        let request = SendRequest {
            info: our_info,
            files: self
                .files
                .iter()
                .map(|f| {
                    (
                        f.file_id.clone(),
                        FileMetadataRequest {
                            file_name: f.meta.file_name.clone(),
                            size: f.meta.file_size,
                            file_type: f.meta.file_type,
                            sha256: f.meta.file_hash.clone(),
                            chunk_size: self.chunk_size,
                        },
                    )
                })
                .collect(),
        };

        let response = match self.client.send_request(&request).await {
            Ok(response) => response,
            Err(Error::PolicyRejected(reason)) => {
                info!("recipient declined: {}", reason);
                self.settle_all(TransferStatus::Cancelled, true);
                self.bus.post_notification(Notification::RecipientDeclined {
                    transfer_ids,
                });
                return Err(Error::PolicyRejected(reason));
            }
            Err(e) => return Err(e),
        };

        if self.cancelled() {
            return self.cancel_remote().await;
        }

        let accepted: Vec<u64> = self
            .files
            .iter()
            .filter(|f| response.accepted_file_ids.contains(&f.file_id))
            .map(|f| f.transfer_id)
            .collect();

        // Files the recipient skipped are settled immediately.
        for file in &mut self.files {
            if !response.accepted_file_ids.contains(&file.file_id) {
                let _ = file.meta.set_status(TransferStatus::Cancelled);
                self.store.delete(file.transfer_id);
            }
        }

        if accepted.is_empty() {
            self.bus.post_notification(Notification::RecipientDeclined {
                transfer_ids,
            });
            return Err(Error::PolicyRejected("no files accepted".into()));
        }

        self.bus.post_notification(Notification::RecipientAccepted {
            transfer_ids: accepted,
        });

        // Uploading.
        let session_id = response.session_id.clone();
        for i in 0..self.files.len() {
            if self.files[i].meta.status.is_terminal() {
                continue;
            }
            let already_done = response
                .completed_chunks
                .get(&self.files[i].file_id)
                .cloned()
                .unwrap_or_default();
            self.upload_file(&session_id, i, &already_done).await?;
        }

        Ok(())
    }

    async fn upload_file(
        &mut self,
        session_id: &str,
        index: usize,
        already_done: &[u64],
    ) -> Result<()> {
        let (file_id, transfer_id, path, total_chunks) = {
            let file = &mut self.files[index];
            // Empty files skip straight to Completed below; InProgress
            // always implies at least one chunk.
            if file.chunks.chunk_count() > 0 {
                file.meta.set_status(TransferStatus::InProgress)?;
            }
            for chunk in already_done {
                // The receiver kept these from an interrupted run.
                file.meta.mark_chunk_completed(*chunk)?;
            }
            self.store.update(&file.meta)?;
            (
                file.file_id.clone(),
                file.transfer_id,
                file.path.clone(),
                file.chunks.chunk_count(),
            )
        };

        let started_at = Instant::now();
        let resumed_bytes = self.files[index].meta.bytes_completed();

        for chunk_index in 0..total_chunks {
            if self.cancelled() {
                return self.cancel_remote().await;
            }
            if self.files[index].meta.is_chunk_completed(chunk_index) {
                continue;
            }

            let data = {
                let path = path.clone();
                let chunk_size = self.chunk_size;
                tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
                    let mut file = std::fs::File::open(&path)?;
                    Chunker::new(chunk_size).read_chunk(&mut file, chunk_index)
                })
                .await
                .map_err(|e| Error::Fatal(format!("read task panicked: {}", e)))??
            };

            match self
                .upload_with_retry(session_id, &file_id, chunk_index, data)
                .await
            {
                Ok(()) => {}
                Err(Error::PolicyRejected(reason)) => {
                    // The receiver tore the session down mid-transfer.
                    info!(transfer_id, "receiver cancelled: {}", reason);
                    self.settle_all(TransferStatus::Cancelled, true);
                    self.bus
                        .post_notification(Notification::SendingCancelledByReceiver {
                            transfer_id,
                        });
                    return Err(Error::PolicyRejected(reason));
                }
                Err(e) => return Err(e),
            }

            let file = &mut self.files[index];
            file.meta.mark_chunk_completed(chunk_index)?;
            self.store.update(&file.meta)?;
            self.emit_progress(index, started_at, resumed_bytes);
        }

        // Finishing: all chunks acknowledged.
        let file = &mut self.files[index];
        file.meta.set_status(TransferStatus::Completed)?;
        self.store.update(&file.meta)?;
        info!(
            transfer_id,
            file = %file.meta.file_name,
            peer = %self.client.peer(),
            "send completed"
        );
        self.bus.post_notification(Notification::TransferCompleted {
            transfer_id,
            file_name: file.meta.file_name.clone(),
        });
        Ok(())
    }

    async fn upload_with_retry(
        &self,
        session_id: &str,
        file_id: &str,
        chunk_index: u64,
        data: Vec<u8>,
    ) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self
                .client
                .upload_chunk(session_id, file_id, chunk_index, data.clone())
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < RETRY_BACKOFF.len() => {
                    warn!(
                        chunk_index,
                        attempt = attempt + 1,
                        "transient upload error, retrying: {}",
                        e
                    );
                    tokio::time::sleep(RETRY_BACKOFF[attempt]).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// User-initiated cancel noticed at a polling point: tell the peer
    /// (best-effort), settle local state, delete the records.
    async fn cancel_remote(&mut self) -> Result<()> {
        let ids: Vec<u64> = self
            .files
            .iter()
            .filter(|f| !f.meta.status.is_terminal())
            .map(|f| f.transfer_id)
            .collect();

        for id in ids {
            if let Err(e) = self.client.cancel(id).await {
                warn!(transfer_id = id, "cancel notice failed: {}", e);
            }
        }
        self.settle_all(TransferStatus::Cancelled, true);
        info!(peer = %self.client.peer(), "send session cancelled");
        Ok(())
    }

    fn settle_all(&mut self, status: TransferStatus, delete_records: bool) {
        for file in &mut self.files {
            if file.meta.status.is_terminal() {
                continue;
            }
            let _ = file.meta.set_status(status);
            if delete_records {
                self.store.delete(file.transfer_id);
            } else {
                let _ = self.store.update(&file.meta);
            }
        }
    }

    fn emit_progress(&self, index: usize, started_at: Instant, resumed_bytes: u64) {
        let meta = &self.files[index].meta;
        let bytes = meta.bytes_completed();
        let total = meta.file_size;
        let fresh = bytes.saturating_sub(resumed_bytes);
        let elapsed = started_at.elapsed().as_secs_f64().max(0.001);
        let speed = (fresh as f64 / elapsed) as u64;
        let remaining = total.saturating_sub(bytes);

        self.bus
            .post_notification(Notification::TransferProgress(TransferProgress {
                transfer_id: meta.transfer_id,
                progress: if total == 0 {
                    1.0
                } else {
                    bytes as f64 / total as f64
                },
                bytes_transferred: bytes,
                total_bytes: total,
                speed_bps: speed,
                eta_seconds: if speed > 0 { Some(remaining / speed) } else { None },
            }));
    }
}
