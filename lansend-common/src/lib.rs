mod chunk;
mod fsutil;
mod hash;

pub use chunk::{ChunkMetadata, Chunker, FileChunks};
pub use fsutil::atomic_write;
pub use hash::{hex_encode, sha256_file_hex, sha256_hex, verify_hash};

/// Default transfer chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;
