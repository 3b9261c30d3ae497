//! Per-file chunk manifests and lazily-computed download progress
//! (spec.md section 4.4).
//!
//! Grounded on `original_source`'s `FileMetadata` (`downloaded_chunks` as a
//! memoized property seeded by re-reading and re-hashing every chunk on
//! disk), reworked around `syncr_store::FileStore` instead of raw file
//! handles so the same verify-on-read logic backs both progress tracking
//! and normal chunk service.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use syncr_core::codec::Value;
use syncr_core::crypto;
use syncr_core::error::{SyncrError, SyncrResult};
use syncr_core::hash::Hash;
use syncr_store::FileStore;

use crate::chunk::{self, DEFAULT_CHUNK_SIZE};

const PROTOCOL_VERSION: i64 = 1;

/// The chunk manifest of a single file within a drop.
pub struct FileMetadata {
    pub file_hash: Hash,
    pub file_length: u64,
    pub chunk_size: u64,
    pub chunks: Vec<Hash>,
    pub drop_id: Vec<u8>,
    protocol_version: i64,
    downloaded: Mutex<Option<HashSet<u64>>>,
}

impl Clone for FileMetadata {
    fn clone(&self) -> Self {
        FileMetadata {
            file_hash: self.file_hash,
            file_length: self.file_length,
            chunk_size: self.chunk_size,
            chunks: self.chunks.clone(),
            drop_id: self.drop_id.clone(),
            protocol_version: self.protocol_version,
            downloaded: Mutex::new(self.downloaded.lock().unwrap().clone()),
        }
    }
}

impl std::fmt::Debug for FileMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileMetadata")
            .field("file_hash", &self.file_hash)
            .field("file_length", &self.file_length)
            .field("chunk_size", &self.chunk_size)
            .field("num_chunks", &self.chunks.len())
            .finish()
    }
}

impl FileMetadata {
    pub fn new(
        chunks: Vec<Hash>,
        file_hash: Hash,
        file_length: u64,
        drop_id: Vec<u8>,
        chunk_size: u64,
    ) -> Self {
        FileMetadata {
            file_hash,
            file_length,
            chunk_size,
            chunks,
            drop_id,
            protocol_version: PROTOCOL_VERSION,
            downloaded: Mutex::new(None),
        }
    }

    pub fn num_chunks(&self) -> u64 {
        chunk::num_chunks(self.file_length, self.chunk_size)
    }

    /// Builds file metadata by hashing each chunk of `path` (spec.md
    /// section 4.5 "Construction from an on-disk directory").
    pub async fn from_path(
        path: &Path,
        drop_id: Vec<u8>,
        chunk_size: u64,
    ) -> SyncrResult<FileMetadata> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| SyncrError::io(path, e))?;
        let file_hash = Hash::new(&bytes);
        let num_chunks = chunk::num_chunks(bytes.len() as u64, chunk_size);
        let mut chunks = Vec::with_capacity(num_chunks as usize);
        for i in 0..num_chunks {
            let (start, end) = chunk::chunk_range(i, bytes.len() as u64, chunk_size);
            chunks.push(Hash::new(&bytes[start as usize..end as usize]));
        }
        Ok(FileMetadata::new(
            chunks,
            file_hash,
            bytes.len() as u64,
            drop_id,
            chunk_size,
        ))
    }

    fn to_value(&self) -> Value {
        let mut d = BTreeMap::new();
        d.insert(b"protocol_version".to_vec(), Value::int(self.protocol_version));
        d.insert(b"chunk_size".to_vec(), Value::int(self.chunk_size as i64));
        d.insert(b"file_length".to_vec(), Value::int(self.file_length as i64));
        d.insert(b"file_hash".to_vec(), Value::bytes(self.file_hash.as_bytes().to_vec()));
        d.insert(
            b"chunks".to_vec(),
            Value::List(
                self.chunks
                    .iter()
                    .map(|h| Value::bytes(h.as_bytes().to_vec()))
                    .collect(),
            ),
        );
        d.insert(b"drop_id".to_vec(), Value::bytes(self.drop_id.clone()));
        Value::Dict(d)
    }

    pub fn encode(&self) -> bytes::Bytes {
        self.to_value().encode()
    }

    pub fn decode(bytes: &[u8]) -> SyncrResult<Self> {
        let value = Value::decode(bytes)
            .map_err(|e| SyncrError::verification(format!("malformed file metadata: {e}")))?;
        let d = value
            .as_dict()
            .ok_or_else(|| SyncrError::verification("file metadata is not a dict"))?;
        let chunk_size = field_int(d, b"chunk_size")? as u64;
        let file_length = field_int(d, b"file_length")? as u64;
        let protocol_version = field_int(d, b"protocol_version")?;
        let file_hash = Hash::from_bytes(
            field_bytes(d, b"file_hash")?
                .try_into()
                .map_err(|_| SyncrError::verification("file_hash is not 32 bytes"))?,
        );
        let drop_id = field_bytes(d, b"drop_id")?;
        let chunks_list = d
            .get(b"chunks".as_slice())
            .and_then(Value::as_list)
            .ok_or_else(|| SyncrError::verification("missing chunks"))?;
        let mut chunks = Vec::with_capacity(chunks_list.len());
        for v in chunks_list {
            let h = v
                .as_bytes()
                .ok_or_else(|| SyncrError::verification("chunk entry is not a byte string"))?;
            chunks.push(Hash::from_bytes(
                h.try_into()
                    .map_err(|_| SyncrError::verification("chunk digest is not 32 bytes"))?,
            ));
        }
        Ok(FileMetadata {
            file_hash,
            file_length,
            chunk_size,
            chunks,
            drop_id,
            protocol_version,
            downloaded: Mutex::new(None),
        })
    }

    fn manifest_filename(&self) -> String {
        crypto::b64::encode(self.file_hash.as_bytes())
    }

    pub fn write_file(&self, metadata_dir: &Path) -> SyncrResult<()> {
        std::fs::create_dir_all(metadata_dir).map_err(|e| SyncrError::io(metadata_dir, e))?;
        let path = metadata_dir.join(self.manifest_filename());
        std::fs::write(&path, self.encode()).map_err(|e| SyncrError::io(&path, e))
    }

    pub fn read_file(file_hash: Hash, metadata_dir: &Path) -> SyncrResult<Option<Self>> {
        let path = metadata_dir.join(crypto::b64::encode(file_hash.as_bytes()));
        match std::fs::read(&path) {
            Ok(bytes) => Self::decode(&bytes).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncrError::io(&path, e)),
        }
    }

    /// The set of chunk indices already verified present on disk at
    /// `file_path`, computed lazily on first access and cached.
    pub async fn downloaded_chunks(
        &self,
        store: &dyn FileStore,
        file_path: &Path,
    ) -> SyncrResult<HashSet<u64>> {
        if let Some(cached) = self.downloaded.lock().unwrap().clone() {
            return Ok(cached);
        }
        let computed = self.calculate_downloaded_chunks(store, file_path).await?;
        *self.downloaded.lock().unwrap() = Some(computed.clone());
        Ok(computed)
    }

    async fn calculate_downloaded_chunks(
        &self,
        store: &dyn FileStore,
        file_path: &Path,
    ) -> SyncrResult<HashSet<u64>> {
        let mut present = HashSet::new();
        for i in 0..self.num_chunks() {
            let expected = self.chunks[i as usize];
            match store
                .read_chunk(file_path, i, self.chunk_size, Some(expected))
                .await
            {
                Ok(_) => {
                    present.insert(i);
                }
                Err(SyncrError::Verification(_)) | Err(SyncrError::Io { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(present)
    }

    /// The complement of `downloaded_chunks` over `0..num_chunks`.
    pub async fn needed_chunks(
        &self,
        store: &dyn FileStore,
        file_path: &Path,
    ) -> SyncrResult<HashSet<u64>> {
        let downloaded = self.downloaded_chunks(store, file_path).await?;
        Ok((0..self.num_chunks()).filter(|i| !downloaded.contains(i)).collect())
    }

    /// Records `chunk_id` as present in the cached downloaded-chunks set,
    /// without touching disk. Call after a verified `write_chunk`.
    pub fn finish_chunk(&self, chunk_id: u64) {
        let mut guard = self.downloaded.lock().unwrap();
        guard.get_or_insert_with(HashSet::new).insert(chunk_id);
    }
}

fn field_int(d: &BTreeMap<Vec<u8>, Value>, key: &[u8]) -> SyncrResult<i64> {
    d.get(key).and_then(Value::as_int).ok_or_else(|| {
        SyncrError::verification(format!("missing or malformed field {:?}", String::from_utf8_lossy(key)))
    })
}

fn field_bytes(d: &BTreeMap<Vec<u8>, Value>, key: &[u8]) -> SyncrResult<Vec<u8>> {
    d.get(key)
        .and_then(Value::as_bytes)
        .map(|b| b.to_vec())
        .ok_or_else(|| {
            SyncrError::verification(format!("missing or malformed field {:?}", String::from_utf8_lossy(key)))
        })
}

/// Default chunk size re-exported for callers that construct
/// [`FileMetadata`] without an explicit preference.
pub const fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}
