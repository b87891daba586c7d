//! Durable per-transfer metadata records.
//!
//! One JSON document per transfer lives at `<metadata_dir>/<id>.meta`.
//! Records are rewritten atomically after every chunk completion, so a
//! crash can lose at most the most recent chunk acknowledgement.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use lansend_common::atomic_write;
use lansend_protocol::FileType;

use crate::error::{Error, Result};

pub const METADATA_EXTENSION: &str = "meta";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    AwaitingConfirmation,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkState {
    pub index: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    pub completed: bool,
}

/// Durable record of one directed file transfer.
///
/// Unknown JSON fields encountered on load are retained in `extra` and
/// written back verbatim, so records survive round-trips through older
/// and newer daemon versions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferMetadata {
    pub transfer_id: u64,
    pub file_name: String,
    pub file_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    pub file_type: FileType,
    pub source_device_id: String,
    pub target_device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_filepath: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_filepath: Option<PathBuf>,
    pub chunk_size: u64,
    pub total_chunks: u64,
    pub chunks: Vec<ChunkState>,
    pub status: TransferStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TransferMetadata {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transfer_id: u64,
        file_name: impl Into<String>,
        file_size: u64,
        file_hash: Option<String>,
        file_type: FileType,
        source_device_id: impl Into<String>,
        target_device_id: impl Into<String>,
        chunk_size: u64,
    ) -> Self {
        let total_chunks = if file_size == 0 {
            0
        } else {
            file_size.div_ceil(chunk_size)
        };
        let chunks = (0..total_chunks)
            .map(|index| ChunkState {
                index,
                hash: None,
                completed: false,
            })
            .collect();
        let now = Utc::now();

        Self {
            transfer_id,
            file_name: file_name.into(),
            file_size,
            file_hash,
            file_type,
            source_device_id: source_device_id.into(),
            target_device_id: target_device_id.into(),
            local_filepath: None,
            destination_filepath: None,
            chunk_size,
            total_chunks,
            chunks,
            status: TransferStatus::Pending,
            created_at: now,
            updated_at: now,
            extra: serde_json::Map::new(),
        }
    }

    /// Mark a chunk done. Completion bits only ever go from false to
    /// true; re-marking is a no-op.
    pub fn mark_chunk_completed(&mut self, chunk_index: u64) -> Result<()> {
        let chunk = self
            .chunks
            .get_mut(chunk_index as usize)
            .ok_or_else(|| Error::Protocol(format!("chunk index {} out of range", chunk_index)))?;
        if !chunk.completed {
            chunk.completed = true;
            self.updated_at = Utc::now();
        }
        Ok(())
    }

    pub fn set_chunk_hash(&mut self, chunk_index: u64, hash: String) {
        if let Some(chunk) = self.chunks.get_mut(chunk_index as usize) {
            chunk.hash = Some(hash);
        }
    }

    pub fn is_chunk_completed(&self, chunk_index: u64) -> bool {
        self.chunks
            .get(chunk_index as usize)
            .is_some_and(|c| c.completed)
    }

    pub fn completed_chunk_indices(&self) -> Vec<u64> {
        self.chunks
            .iter()
            .filter(|c| c.completed)
            .map(|c| c.index)
            .collect()
    }

    pub fn all_chunks_completed(&self) -> bool {
        self.chunks.iter().all(|c| c.completed)
    }

    /// Bytes covered by completed chunks; the final chunk may be short.
    pub fn bytes_completed(&self) -> u64 {
        self.chunks
            .iter()
            .filter(|c| c.completed)
            .map(|c| self.chunk_len(c.index))
            .sum()
    }

    pub fn chunk_len(&self, chunk_index: u64) -> u64 {
        let offset = chunk_index * self.chunk_size;
        self.file_size.saturating_sub(offset).min(self.chunk_size)
    }

    /// Transition to a new status. Terminal states are frozen: the only
    /// permitted mutation afterwards is record deletion.
    pub fn set_status(&mut self, status: TransferStatus) -> Result<()> {
        if self.status.is_terminal() && status != self.status {
            return Err(Error::Protocol(format!(
                "transfer {} is {:?} and cannot become {:?}",
                self.transfer_id, self.status, status
            )));
        }
        self.status = status;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Filesystem-backed store keyed by transfer id.
pub struct TransferMetadataStore {
    base_dir: PathBuf,
}

impl TransferMetadataStore {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    fn record_path(&self, transfer_id: u64) -> PathBuf {
        self.base_dir
            .join(format!("{}.{}", transfer_id, METADATA_EXTENSION))
    }

    pub fn create(&self, meta: &TransferMetadata) -> Result<()> {
        self.update(meta)
    }

    pub fn update(&self, meta: &TransferMetadata) -> Result<()> {
        let json = serde_json::to_string_pretty(meta)?;
        atomic_write(self.record_path(meta.transfer_id), json.as_bytes())?;
        debug!(
            transfer_id = meta.transfer_id,
            completed = meta.completed_chunk_indices().len(),
            total = meta.total_chunks,
            "saved transfer metadata"
        );
        Ok(())
    }

    pub fn load(&self, transfer_id: u64) -> Result<Option<TransferMetadata>> {
        let path = self.record_path(transfer_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Best-effort and idempotent.
    pub fn delete(&self, transfer_id: u64) {
        let path = self.record_path(transfer_id);
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(transfer_id, "failed to delete metadata record: {}", e);
            } else {
                debug!(transfer_id, "deleted transfer metadata");
            }
        }
    }

    pub fn list(&self) -> Result<Vec<TransferMetadata>> {
        let mut records = Vec::new();
        if !self.base_dir.exists() {
            return Ok(records);
        }

        for entry in std::fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            if path
                .extension()
                .is_some_and(|e| e == METADATA_EXTENSION)
            {
                match std::fs::read_to_string(&path)
                    .map_err(Error::from)
                    .and_then(|s| serde_json::from_str(&s).map_err(Error::from))
                {
                    Ok(meta) => records.push(meta),
                    Err(e) => warn!("skipping unreadable metadata record {:?}: {}", path, e),
                }
            }
        }
        records.sort_by_key(|m: &TransferMetadata| m.transfer_id);
        Ok(records)
    }

    pub fn list_incomplete(&self) -> Result<Vec<TransferMetadata>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|m| !m.status.is_terminal())
            .collect())
    }

    /// Find an interrupted receive matching a new offer, for resumption.
    pub fn find_incomplete(
        &self,
        file_name: &str,
        file_size: u64,
        file_hash: Option<&str>,
    ) -> Result<Option<TransferMetadata>> {
        Ok(self.list()?.into_iter().find(|m| {
            m.status == TransferStatus::InProgress
                && m.file_name == file_name
                && m.file_size == file_size
                && match (m.file_hash.as_deref(), file_hash) {
                    (Some(a), Some(b)) => a == b,
                    _ => true,
                }
        }))
    }

    /// Highest transfer id currently on disk, used to seed the engine's
    /// id counter after a restart.
    pub fn max_transfer_id(&self) -> Result<u64> {
        Ok(self.list()?.iter().map(|m| m.transfer_id).max().unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(id: u64, size: u64) -> TransferMetadata {
        TransferMetadata::new(
            id,
            "demo.bin",
            size,
            Some("ab".repeat(32)),
            FileType::Other,
            "src-device",
            "dst-device",
            1024 * 1024,
        )
    }

    #[test]
    fn test_chunk_count_invariant() {
        assert_eq!(sample(1, 0).total_chunks, 0);
        assert_eq!(sample(1, 1).total_chunks, 1);
        assert_eq!(sample(1, 1024 * 1024).total_chunks, 1);
        assert_eq!(sample(1, 1024 * 1024 + 1).total_chunks, 2);
        assert_eq!(sample(1, 5 * 1024 * 1024).total_chunks, 5);
    }

    #[test]
    fn test_chunk_len_last_chunk_short() {
        let meta = sample(1, 1024 * 1024 + 100);
        assert_eq!(meta.chunk_len(0), 1024 * 1024);
        assert_eq!(meta.chunk_len(1), 100);
    }

    #[test]
    fn test_completion_bits_monotonic() {
        let mut meta = sample(1, 3 * 1024 * 1024);
        meta.mark_chunk_completed(1).unwrap();
        assert!(meta.is_chunk_completed(1));

        // Re-marking stays true and never flips back.
        meta.mark_chunk_completed(1).unwrap();
        assert!(meta.is_chunk_completed(1));
        assert_eq!(meta.completed_chunk_indices(), vec![1]);
        assert_eq!(meta.bytes_completed(), 1024 * 1024);
    }

    #[test]
    fn test_out_of_range_chunk_rejected() {
        let mut meta = sample(1, 1024);
        assert!(meta.mark_chunk_completed(5).is_err());
    }

    #[test]
    fn test_terminal_status_is_frozen() {
        let mut meta = sample(1, 1024);
        meta.set_status(TransferStatus::InProgress).unwrap();
        meta.set_status(TransferStatus::Completed).unwrap();
        assert!(meta.set_status(TransferStatus::InProgress).is_err());
        // Idempotent terminal transition is fine.
        meta.set_status(TransferStatus::Completed).unwrap();
    }

    #[test]
    fn test_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = TransferMetadataStore::new(dir.path()).unwrap();

        let mut meta = sample(7, 2 * 1024 * 1024);
        meta.mark_chunk_completed(0).unwrap();
        store.create(&meta).unwrap();

        let loaded = store.load(7).unwrap().unwrap();
        assert_eq!(loaded, meta);
        assert!(store.load(8).unwrap().is_none());
    }

    #[test]
    fn test_unknown_fields_preserved() {
        let dir = TempDir::new().unwrap();
        let store = TransferMetadataStore::new(dir.path()).unwrap();

        let meta = sample(3, 1024);
        let mut value = serde_json::to_value(&meta).unwrap();
        value["future_field"] = serde_json::json!({"nested": true});
        std::fs::write(
            dir.path().join("3.meta"),
            serde_json::to_string(&value).unwrap(),
        )
        .unwrap();

        let loaded = store.load(3).unwrap().unwrap();
        assert_eq!(
            loaded.extra.get("future_field"),
            Some(&serde_json::json!({"nested": true}))
        );

        // Survives a save/load cycle.
        store.update(&loaded).unwrap();
        let reloaded = store.load(3).unwrap().unwrap();
        assert_eq!(reloaded.extra, loaded.extra);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = TransferMetadataStore::new(dir.path()).unwrap();

        store.create(&sample(2, 1024)).unwrap();
        store.delete(2);
        store.delete(2);
        assert!(store.load(2).unwrap().is_none());
    }

    #[test]
    fn test_list_and_incomplete() {
        let dir = TempDir::new().unwrap();
        let store = TransferMetadataStore::new(dir.path()).unwrap();

        let mut done = sample(1, 1024);
        done.set_status(TransferStatus::Completed).unwrap();
        store.create(&done).unwrap();

        let mut running = sample(2, 2048);
        running.set_status(TransferStatus::InProgress).unwrap();
        store.create(&running).unwrap();

        assert_eq!(store.list().unwrap().len(), 2);

        let incomplete = store.list_incomplete().unwrap();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].transfer_id, 2);

        assert_eq!(store.max_transfer_id().unwrap(), 2);
    }

    #[test]
    fn test_find_incomplete_matches_offer() {
        let dir = TempDir::new().unwrap();
        let store = TransferMetadataStore::new(dir.path()).unwrap();

        let mut meta = sample(4, 5 * 1024 * 1024);
        meta.set_status(TransferStatus::InProgress).unwrap();
        store.create(&meta).unwrap();

        let hash = meta.file_hash.clone().unwrap();
        let found = store
            .find_incomplete("demo.bin", 5 * 1024 * 1024, Some(&hash))
            .unwrap();
        assert_eq!(found.unwrap().transfer_id, 4);

        let mismatch = store
            .find_incomplete("demo.bin", 5 * 1024 * 1024, Some("00"))
            .unwrap();
        assert!(mismatch.is_none());

        let wrong_size = store.find_incomplete("demo.bin", 42, None).unwrap();
        assert!(wrong_size.is_none());
    }
}
