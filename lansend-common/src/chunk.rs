use std::io::{Read, Seek, SeekFrom};

use crate::{hex_encode, sha256_hex, DEFAULT_CHUNK_SIZE};

#[derive(Debug, Clone)]
pub struct ChunkMetadata {
    pub index: u64,
    pub offset: u64,
    pub size: u64,
    pub hash: String,
}

#[derive(Debug, Clone)]
pub struct FileChunks {
    pub total_size: u64,
    pub chunk_size: u64,
    pub chunks: Vec<ChunkMetadata>,
    pub file_hash: String,
}

impl FileChunks {
    pub fn chunk_count(&self) -> u64 {
        self.chunks.len() as u64
    }
}

/// Splits a file into fixed-size chunks and hashes each one plus the
/// whole file in a single pass.
pub struct Chunker {
    chunk_size: u64,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl Chunker {
    pub fn new(chunk_size: u64) -> Self {
        Self { chunk_size }
    }

    pub fn compute_chunks<R: Read + Seek>(&self, reader: &mut R) -> std::io::Result<FileChunks> {
        let start = reader.stream_position()?;
        reader.seek(SeekFrom::End(0))?;
        let total_size = reader.stream_position()?;
        reader.seek(SeekFrom::Start(start))?;

        use sha2::Digest;

        let mut chunks = Vec::new();
        let mut file_hasher = sha2::Sha256::new();
        let mut buffer = vec![0u8; self.chunk_size as usize];
        let mut offset = 0u64;
        let mut index = 0u64;

        loop {
            let bytes_read = read_exact_or_eof(reader, &mut buffer)?;
            if bytes_read == 0 {
                break;
            }

            let chunk_data = &buffer[..bytes_read];
            file_hasher.update(chunk_data);

            chunks.push(ChunkMetadata {
                index,
                offset,
                size: bytes_read as u64,
                hash: sha256_hex(chunk_data),
            });

            offset += bytes_read as u64;
            index += 1;
        }

        Ok(FileChunks {
            total_size,
            chunk_size: self.chunk_size,
            chunks,
            file_hash: hex_encode(&file_hasher.finalize()),
        })
    }

    pub fn read_chunk<R: Read + Seek>(
        &self,
        reader: &mut R,
        chunk_index: u64,
    ) -> std::io::Result<Vec<u8>> {
        let offset = chunk_index * self.chunk_size;
        reader.seek(SeekFrom::Start(offset))?;

        let mut buffer = vec![0u8; self.chunk_size as usize];
        let bytes_read = read_exact_or_eof(reader, &mut buffer)?;
        buffer.truncate(bytes_read);

        Ok(buffer)
    }
}

fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut total_read = 0;
    while total_read < buf.len() {
        match reader.read(&mut buf[total_read..]) {
            Ok(0) => break,
            Ok(n) => total_read += n,
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total_read)
}
