//! The sync engine (spec.md section 4.9): `create_drop`, `sync_drop`,
//! `publish_update`, and the [`RequestHandler`] that serves local
//! drop/file/chunk state to other nodes.
//!
//! Grounded on `original_source`'s `drop_init.make_drop_metadata`/
//! `sync_drop_contents` and `drop_util.update_drop`, reworked around
//! `syncr_net`'s `Requester`/`Listener` and the bounded concurrency
//! primitives in [`crate::concurrency`] in place of asyncio futures.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use rand::seq::SliceRandom;

use syncr_core::constants::{DROP_METADATA_SUBDIR, FILES_METADATA_SUBDIR, METADATA_DIR_NAME};
use syncr_core::crypto::{NodeId, PrivateKey, PublicKey};
use syncr_core::error::{SyncrError, SyncrResult};
use syncr_core::hash::Hash;
use syncr_lookup::PeerKeyStore;
use syncr_metadata::{DropMetadata, DropRegistry, DropVersion, FileMetadata, chunk};
use syncr_net::{Request, RequestHandler, Requester, Response};
use syncr_store::FileStore;

use crate::concurrency::bounded_gather;

/// Default concurrency caps (spec.md section 6 "Tunables").
pub const MAX_CONCURRENT_FILE_DOWNLOADS: usize = 4;
pub const MAX_CONCURRENT_CHUNK_DOWNLOADS: usize = 8;
pub const MAX_CHUNKS_PER_PEER: usize = 8;

/// Drives drop creation, syncing, and publication for one local node, and
/// answers the wire protocol on behalf of that node's listener.
pub struct SyncEngine {
    node_id: NodeId,
    private_key: PrivateKey,
    store: Arc<dyn FileStore>,
    peer_store: Arc<dyn PeerKeyStore>,
    registry: DropRegistry,
    requester: Requester,
    key_cache: StdMutex<HashMap<NodeId, PublicKey>>,
}

impl SyncEngine {
    pub fn new(
        private_key: PrivateKey,
        store: Arc<dyn FileStore>,
        peer_store: Arc<dyn PeerKeyStore>,
        registry: DropRegistry,
    ) -> SyncrResult<Self> {
        let node_id = private_key.public_key().node_id()?;
        let mut key_cache = HashMap::new();
        key_cache.insert(node_id, private_key.public_key());
        Ok(SyncEngine {
            node_id,
            private_key,
            store,
            peer_store,
            registry,
            requester: Requester::new(),
            key_cache: StdMutex::new(key_cache),
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// The lookup backend this engine resolves peers and keys through, for
    /// callers that need to announce locally-hosted drops directly.
    pub fn peer_store(&self) -> &Arc<dyn PeerKeyStore> {
        &self.peer_store
    }

    /// The drop-location registry this engine reads and writes, for
    /// callers that need to enumerate locally-hosted drops directly.
    pub fn registry(&self) -> &DropRegistry {
        &self.registry
    }

    fn drop_metadata_dir(save_dir: &Path) -> PathBuf {
        save_dir.join(METADATA_DIR_NAME).join(DROP_METADATA_SUBDIR)
    }

    fn files_metadata_dir(save_dir: &Path) -> PathBuf {
        save_dir.join(METADATA_DIR_NAME).join(FILES_METADATA_SUBDIR)
    }

    fn cached_key_sync(&self, node_id: &NodeId) -> SyncrResult<PublicKey> {
        self.key_cache
            .lock()
            .unwrap()
            .get(node_id)
            .cloned()
            .ok_or_else(|| SyncrError::verification("signer key not cached"))
    }

    async fn cache_key(&self, node_id: NodeId) -> SyncrResult<PublicKey> {
        if let Some(key) = self.key_cache.lock().unwrap().get(&node_id).cloned() {
            return Ok(key);
        }
        let key = self
            .peer_store
            .get_key(node_id)
            .await?
            .ok_or_else(|| SyncrError::not_found("signer key not published"))?;
        self.key_cache.lock().unwrap().insert(node_id, key.clone());
        Ok(key)
    }

    /// Prefetches every key a [`DropMetadata::decode`] of `drop_id` is
    /// likely to need: the primary owner (always derivable from the drop
    /// ID's first 32 bytes, spec.md section 3 invariant 4) and, if a
    /// previously-verified local copy exists, its listed secondary
    /// owners. A drop whose very first locally-seen version is signed by
    /// a secondary owner we've never resolved a key for will still fail
    /// to decode; that is an accepted limitation (see DESIGN.md).
    async fn prime_key_cache(&self, drop_id: &[u8], metadata_dir: &Path) {
        if let Ok(primary) = <[u8; 32]>::try_from(&drop_id[..drop_id.len().min(32)]) {
            let _ = self.cache_key(primary).await;
        }
        if let Ok(Some(local)) =
            DropMetadata::read_file(drop_id, None, metadata_dir, |id| self.cached_key_sync(id))
        {
            for owner in local.other_owners.keys() {
                let _ = self.cache_key(*owner).await;
            }
        }
    }

    /// Step 3 of `sync_drop`: local copy if present and verified,
    /// otherwise through the requester, persisted as the latest version.
    async fn fetch_drop_metadata(
        &self,
        drop_id: &[u8],
        save_dir: &Path,
        peer_addrs: &[SocketAddr],
    ) -> SyncrResult<DropMetadata> {
        let metadata_dir = Self::drop_metadata_dir(save_dir);
        self.prime_key_cache(drop_id, &metadata_dir).await;

        if let Some(local) =
            DropMetadata::read_file(drop_id, None, &metadata_dir, |id| self.cached_key_sync(id))?
        {
            return Ok(local);
        }

        let request = Request::DropMetadata {
            drop_id: drop_id.to_vec(),
            version: None,
        };
        let response = self.requester.send(peer_addrs, &request).await?;
        let Response::DropMetadata(blob) = response else {
            return Err(SyncrError::peer_failure(
                "unexpected response shape for drop metadata",
            ));
        };
        let dm = DropMetadata::decode(&blob, |id| self.cached_key_sync(id))?;
        dm.write_file(&metadata_dir, true)?;
        Ok(dm)
    }

    async fn fetch_file_metadata(
        &self,
        drop_id: &[u8],
        file_hash: Hash,
        files_metadata_dir: &Path,
        peer_addrs: &[SocketAddr],
    ) -> SyncrResult<FileMetadata> {
        if let Some(local) = FileMetadata::read_file(file_hash, files_metadata_dir)? {
            return Ok(local);
        }
        let request = Request::FileMetadata {
            drop_id: drop_id.to_vec(),
            file_id: file_hash.as_bytes().to_vec(),
        };
        let response = self.requester.send(peer_addrs, &request).await?;
        let Response::FileMetadata(blob) = response else {
            return Err(SyncrError::peer_failure(
                "unexpected response shape for file metadata",
            ));
        };
        let fm = FileMetadata::decode(&blob)?;
        if fm.file_hash != file_hash {
            return Err(SyncrError::verification(
                "file metadata does not match the requested file hash",
            ));
        }
        fm.write_file(files_metadata_dir)?;
        Ok(fm)
    }

    /// Builds drop metadata and file manifests from `save_dir` and signs
    /// a brand new version 1 record (grounded on
    /// `drop_init.make_drop_metadata`).
    pub async fn create_drop(
        self: &Arc<Self>,
        name: &str,
        save_dir: &Path,
        ignore_patterns: &[String],
    ) -> SyncrResult<DropMetadata> {
        let files = self.build_files_map(save_dir, ignore_patterns, &[]).await?;
        let drop_id = syncr_metadata::gen_drop_id(&self.node_id);
        self.registry.ensure_registered(&drop_id, save_dir)?;

        let version = DropVersion::with_random_nonce(1);
        let mut dm = DropMetadata::new(
            drop_id.clone(),
            name.to_string(),
            version,
            Vec::new(),
            self.node_id,
            BTreeMap::new(),
            self.node_id,
            files,
        );
        dm.sign(&self.private_key);
        dm.write_file(&Self::drop_metadata_dir(save_dir), true)?;
        Ok(dm)
    }

    /// Rebuilds metadata from disk, increments `version`, draws a fresh
    /// nonce, and preserves `name`/`primary_owner`/`other_owners`
    /// (grounded on `drop_util.update_drop`).
    pub async fn publish_update(
        self: &Arc<Self>,
        drop_id: &[u8],
        save_dir: &Path,
        ignore_patterns: &[String],
    ) -> SyncrResult<DropMetadata> {
        let metadata_dir = Self::drop_metadata_dir(save_dir);
        self.prime_key_cache(drop_id, &metadata_dir).await;
        let previous = DropMetadata::read_file(drop_id, None, &metadata_dir, |id| {
            self.cached_key_sync(id)
        })?
        .ok_or_else(|| SyncrError::not_found("no existing version to update"))?;

        if previous.signed_by != self.node_id
            && previous.primary_owner != self.node_id
            && !previous.other_owners.contains_key(&self.node_id)
        {
            return Err(SyncrError::permission(
                "this node is not an owner of the drop",
            ));
        }

        let drop_id_vec = drop_id.to_vec();
        let files = self.build_files_map(save_dir, ignore_patterns, &drop_id_vec).await?;

        let mut previous_versions = previous.previous_versions.clone();
        previous_versions.push(previous.version);

        let mut dm = DropMetadata::new(
            drop_id_vec,
            previous.name.clone(),
            DropVersion::with_random_nonce(previous.version.version + 1),
            previous_versions,
            previous.primary_owner,
            previous.other_owners.clone(),
            self.node_id,
            files,
        );
        dm.sign(&self.private_key);
        dm.write_file(&metadata_dir, true)?;
        Ok(dm)
    }

    async fn build_files_map(
        &self,
        save_dir: &Path,
        ignore_patterns: &[String],
        drop_id: &[u8],
    ) -> SyncrResult<BTreeMap<String, Hash>> {
        let files_metadata_dir = Self::files_metadata_dir(save_dir);
        let paths = syncr_store::walk(save_dir, ignore_patterns)?;
        let mut files = BTreeMap::new();
        for path in paths {
            let relpath = path
                .strip_prefix(save_dir)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace(std::path::MAIN_SEPARATOR, "/");
            let fm = FileMetadata::from_path(&path, drop_id.to_vec(), chunk::DEFAULT_CHUNK_SIZE).await?;
            fm.write_file(&files_metadata_dir)?;
            files.insert(relpath, fm.file_hash);
        }
        Ok(files)
    }

    /// `sync_drop(drop_id, save_dir)` (spec.md section 4.9, steps 1-6).
    pub async fn sync_drop(self: Arc<Self>, drop_id: Vec<u8>, save_dir: PathBuf) -> SyncrResult<bool> {
        let mut peers = self.peer_store.lookup(&drop_id).await?;
        peers.shuffle(&mut rand::rng());
        let peer_addrs: Vec<SocketAddr> = peers
            .iter()
            .map(|p| SocketAddr::new(p.ip, p.port))
            .collect();

        self.registry.ensure_registered(&drop_id, &save_dir)?;

        let drop_metadata = self
            .fetch_drop_metadata(&drop_id, &save_dir, &peer_addrs)
            .await?;

        let files: Vec<(String, Hash)> = drop_metadata
            .files
            .iter()
            .map(|(path, hash)| (path.clone(), *hash))
            .collect();

        let tasks: Vec<_> = files
            .into_iter()
            .map(|(relpath, file_hash)| {
                let engine = Arc::clone(&self);
                let drop_id = drop_id.clone();
                let save_dir = save_dir.clone();
                let peer_addrs = peer_addrs.clone();
                async move {
                    engine
                        .sync_file(drop_id, relpath, file_hash, save_dir, peer_addrs)
                        .await
                }
            })
            .collect();

        let outcomes = bounded_gather(tasks, MAX_CONCURRENT_FILE_DOWNLOADS).await;
        let mut all_complete = true;
        for outcome in outcomes {
            match outcome {
                Ok(true) => {}
                Ok(false) => all_complete = false,
                Err(e) => {
                    tracing::warn!(error = %e, "file sync failed");
                    all_complete = false;
                }
            }
        }
        Ok(all_complete)
    }

    /// Step 5: fetches file metadata, then repeatedly lists, partitions,
    /// and downloads needed chunks until no progress is possible.
    async fn sync_file(
        self: Arc<Self>,
        drop_id: Vec<u8>,
        relpath: String,
        file_hash: Hash,
        save_dir: PathBuf,
        peer_addrs: Vec<SocketAddr>,
    ) -> SyncrResult<bool> {
        let file_path = save_dir.join(&relpath);
        let files_metadata_dir = Self::files_metadata_dir(&save_dir);
        let file_metadata = Arc::new(
            self.fetch_file_metadata(&drop_id, file_hash, &files_metadata_dir, &peer_addrs)
                .await?,
        );
        self.store.create(&file_path, file_metadata.file_length).await?;

        let dead_peers: Arc<StdMutex<HashSet<SocketAddr>>> = Arc::new(StdMutex::new(HashSet::new()));

        loop {
            let needed = file_metadata
                .needed_chunks(self.store.as_ref(), &file_path)
                .await?;
            if needed.is_empty() {
                break;
            }

            let mut remaining = needed.clone();
            let mut assignments: Vec<(SocketAddr, u64)> = Vec::new();
            for &peer in &peer_addrs {
                if remaining.is_empty() || dead_peers.lock().unwrap().contains(&peer) {
                    continue;
                }
                let list_request = Request::ChunkList {
                    drop_id: drop_id.clone(),
                    file_id: file_hash.as_bytes().to_vec(),
                };
                let available = match self.requester.send(&[peer], &list_request).await {
                    Ok(Response::ChunkList(list)) => list.into_iter().collect::<HashSet<_>>(),
                    _ => {
                        dead_peers.lock().unwrap().insert(peer);
                        continue;
                    }
                };
                let mut taken = 0;
                for idx in remaining.intersection(&available).copied().collect::<Vec<_>>() {
                    if taken >= MAX_CHUNKS_PER_PEER {
                        break;
                    }
                    assignments.push((peer, idx));
                    remaining.remove(&idx);
                    taken += 1;
                }
            }

            if assignments.is_empty() {
                return Ok(false);
            }

            let tasks: Vec<_> = assignments
                .into_iter()
                .map(|(peer, index)| {
                    let engine = Arc::clone(&self);
                    let drop_id = drop_id.clone();
                    let file_id = file_hash.as_bytes().to_vec();
                    let file_path = file_path.clone();
                    let file_metadata = Arc::clone(&file_metadata);
                    let dead_peers = Arc::clone(&dead_peers);
                    async move {
                        engine
                            .download_chunk(peer, drop_id, file_id, index, file_path, file_metadata, dead_peers)
                            .await
                    }
                })
                .collect();

            let outcomes = bounded_gather(tasks, MAX_CONCURRENT_CHUNK_DOWNLOADS).await;
            let mut progressed = 0;
            for outcome in outcomes {
                match outcome {
                    Ok(true) => progressed += 1,
                    Ok(false) => {}
                    Err(e) => return Err(e),
                }
            }
            if progressed == 0 {
                return Ok(false);
            }
        }

        self.store.mark_complete(&file_path).await?;
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    async fn download_chunk(
        self: Arc<Self>,
        peer: SocketAddr,
        drop_id: Vec<u8>,
        file_id: Vec<u8>,
        index: u64,
        file_path: PathBuf,
        file_metadata: Arc<FileMetadata>,
        dead_peers: Arc<StdMutex<HashSet<SocketAddr>>>,
    ) -> SyncrResult<bool> {
        let request = Request::Chunk {
            drop_id,
            file_id,
            index,
        };
        let bytes = match self.requester.send(&[peer], &request).await {
            Ok(Response::Chunk(bytes)) => bytes,
            _ => {
                dead_peers.lock().unwrap().insert(peer);
                return Ok(false);
            }
        };

        let expected = file_metadata.chunks[index as usize];
        match self
            .store
            .write_chunk(&file_path, index, file_metadata.chunk_size, &bytes, expected)
            .await
        {
            Ok(()) => {
                file_metadata.finish_chunk(index);
                Ok(true)
            }
            Err(SyncrError::Verification(_)) => {
                dead_peers.lock().unwrap().insert(peer);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl RequestHandler for SyncEngine {
    async fn drop_metadata(
        &self,
        drop_id: &[u8],
        version: Option<DropVersion>,
    ) -> SyncrResult<Option<Vec<u8>>> {
        let save_dir = match self.registry.location(drop_id)? {
            Some(dir) => dir,
            None => return Ok(None),
        };
        let metadata_dir = Self::drop_metadata_dir(&save_dir);
        let filename = match version {
            Some(v) => format!("{}_{v}", syncr_core::crypto::b64::encode(drop_id)),
            None => match DropMetadata::read_latest_filename(drop_id, &metadata_dir) {
                Ok(f) => f,
                Err(SyncrError::Io { .. }) => return Ok(None),
                Err(e) => return Err(e),
            },
        };
        match tokio::fs::read(metadata_dir.join(filename)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncrError::io(&save_dir, e)),
        }
    }

    async fn file_metadata(&self, drop_id: &[u8], file_id: &[u8]) -> SyncrResult<Option<Vec<u8>>> {
        let save_dir = match self.registry.location(drop_id)? {
            Some(dir) => dir,
            None => return Ok(None),
        };
        let files_metadata_dir = Self::files_metadata_dir(&save_dir);
        let hash = match <[u8; 32]>::try_from(file_id) {
            Ok(h) => Hash::from_bytes(h),
            Err(_) => return Ok(None),
        };
        Ok(FileMetadata::read_file(hash, &files_metadata_dir)?.map(|fm| fm.encode().to_vec()))
    }

    async fn chunk_list(&self, drop_id: &[u8], file_id: &[u8]) -> SyncrResult<Vec<u64>> {
        let (file_path, fm) = match self.resolve_local_file(drop_id, file_id).await? {
            Some(pair) => pair,
            None => return Ok(Vec::new()),
        };
        let present = fm.downloaded_chunks(self.store.as_ref(), &file_path).await?;
        let mut indices: Vec<u64> = present.into_iter().collect();
        indices.sort_unstable();
        Ok(indices)
    }

    async fn chunk(&self, drop_id: &[u8], file_id: &[u8], index: u64) -> SyncrResult<Option<Vec<u8>>> {
        let (file_path, fm) = match self.resolve_local_file(drop_id, file_id).await? {
            Some(pair) => pair,
            None => return Ok(None),
        };
        if index as usize >= fm.chunks.len() {
            return Ok(None);
        }
        let expected = fm.chunks[index as usize];
        match self
            .store
            .read_chunk(&file_path, index, fm.chunk_size, Some(expected))
            .await
        {
            Ok((bytes, _)) => Ok(Some(bytes)),
            Err(SyncrError::Verification(_)) | Err(SyncrError::Io { .. }) | Err(SyncrError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn new_drop_metadata(
        &self,
        drop_id: &[u8],
        latest_version: u64,
        latest_nonce: u64,
    ) -> SyncrResult<Option<Vec<u8>>> {
        let save_dir = match self.registry.location(drop_id)? {
            Some(dir) => dir,
            None => return Ok(None),
        };
        let metadata_dir = Self::drop_metadata_dir(&save_dir);
        self.prime_key_cache(drop_id, &metadata_dir).await;
        let local = DropMetadata::read_file(drop_id, None, &metadata_dir, |id| {
            self.cached_key_sync(id)
        })?;
        match local {
            Some(dm) if dm.version > DropVersion::new(latest_version, latest_nonce) => {
                self.drop_metadata(drop_id, None).await
            }
            _ => Ok(None),
        }
    }
}

impl SyncEngine {
    async fn resolve_local_file(
        &self,
        drop_id: &[u8],
        file_id: &[u8],
    ) -> SyncrResult<Option<(PathBuf, FileMetadata)>> {
        let save_dir = match self.registry.location(drop_id)? {
            Some(dir) => dir,
            None => return Ok(None),
        };
        let metadata_dir = Self::drop_metadata_dir(&save_dir);
        self.prime_key_cache(drop_id, &metadata_dir).await;
        let drop_metadata = match DropMetadata::read_file(drop_id, None, &metadata_dir, |id| {
            self.cached_key_sync(id)
        })? {
            Some(dm) => dm,
            None => return Ok(None),
        };
        let hash = match <[u8; 32]>::try_from(file_id) {
            Ok(h) => Hash::from_bytes(h),
            Err(_) => return Ok(None),
        };
        let relpath = match drop_metadata.files.iter().find(|(_, h)| **h == hash) {
            Some((path, _)) => path.clone(),
            None => return Ok(None),
        };
        let files_metadata_dir = Self::files_metadata_dir(&save_dir);
        let fm = match FileMetadata::read_file(hash, &files_metadata_dir)? {
            Some(fm) => fm,
            None => return Ok(None),
        };
        Ok(Some((save_dir.join(relpath), fm)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncr_core::crypto::PrivateKey;
    use syncr_lookup::dht::DhtStore;
    use syncr_store::LocalFileStore;

    fn engine_with_dht(tmp: &Path) -> Arc<SyncEngine> {
        let key = PrivateKey::generate().unwrap();
        let store: Arc<dyn FileStore> = Arc::new(LocalFileStore::new());
        let peer_store: Arc<dyn PeerKeyStore> = Arc::new(DhtStore::default());
        let registry = DropRegistry::new(tmp.join("registry"));
        Arc::new(SyncEngine::new(key, store, peer_store, registry).unwrap())
    }

    #[tokio::test]
    async fn create_drop_then_publish_update_increments_version() {
        let tmp = tempfile::tempdir().unwrap();
        let save_dir = tmp.path().join("drop");
        tokio::fs::create_dir_all(&save_dir).await.unwrap();
        tokio::fs::write(save_dir.join("a.txt"), b"hello world").await.unwrap();

        let engine = engine_with_dht(tmp.path());
        let dm = engine.create_drop("my-drop", &save_dir, &[]).await.unwrap();
        assert_eq!(dm.version.version, 1);
        assert_eq!(dm.files.len(), 1);

        tokio::fs::write(save_dir.join("b.txt"), b"more data").await.unwrap();
        let updated = engine.publish_update(&dm.drop_id, &save_dir, &[]).await.unwrap();
        assert_eq!(updated.version.version, 2);
        assert_eq!(updated.files.len(), 2);
        assert_eq!(updated.primary_owner, dm.primary_owner);
    }

    #[tokio::test]
    async fn publish_update_rejects_non_owner() {
        let tmp = tempfile::tempdir().unwrap();
        let save_dir = tmp.path().join("drop");
        tokio::fs::create_dir_all(&save_dir).await.unwrap();
        tokio::fs::write(save_dir.join("a.txt"), b"hello").await.unwrap();

        let owner_engine = engine_with_dht(tmp.path());
        let dm = owner_engine.create_drop("owned", &save_dir, &[]).await.unwrap();

        let other_engine = engine_with_dht(tmp.path());
        let err = other_engine
            .publish_update(&dm.drop_id, &save_dir, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, SyncrError::Permission(_)));
    }

    #[tokio::test]
    async fn request_handler_serves_local_chunk_list_and_chunk() {
        let tmp = tempfile::tempdir().unwrap();
        let save_dir = tmp.path().join("drop");
        tokio::fs::create_dir_all(&save_dir).await.unwrap();
        tokio::fs::write(save_dir.join("a.txt"), vec![7u8; 20]).await.unwrap();

        let engine = engine_with_dht(tmp.path());
        let dm = engine.create_drop("served", &save_dir, &[]).await.unwrap();

        let file_hash = *dm.files.get("a.txt").unwrap();
        // The file on disk is already complete, not a `.part`; downloaded
        // chunks should reflect that fully.
        let handler: &dyn RequestHandler = engine.as_ref();
        let list = handler.chunk_list(&dm.drop_id, file_hash.as_bytes()).await.unwrap();
        assert!(!list.is_empty());

        let chunk = handler
            .chunk(&dm.drop_id, file_hash.as_bytes(), 0)
            .await
            .unwrap();
        assert!(chunk.is_some());
    }
}
