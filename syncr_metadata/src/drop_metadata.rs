//! Signed, versioned drop manifests (spec.md section 4.5).
//!
//! A [`DropMetadata`] is never mutated in place: publishing a new version
//! produces a new record with an incremented version and a fresh nonce,
//! chained to its predecessor through `previous_versions`. Grounded on
//! `original_source`'s `DropMetadata`/`DropVersion` (header/unsigned_header
//! split, `make_filename`, `write_latest`/`read_latest`), re-expressed with
//! the canonical codec and the `rsa`/`sha2` primitives in `syncr_core`.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;

use syncr_core::codec::Value;
use syncr_core::crypto::{self, NodeId, PrivateKey, PublicKey};
use syncr_core::error::{SyncrError, SyncrResult};
use syncr_core::hash::Hash;

const LATEST: &str = "LATEST";
const PROTOCOL_VERSION: i64 = 1;

/// A drop version: `(version, nonce)`, totally ordered by `version` then
/// `nonce` (spec.md section 3 "Drop version").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DropVersion {
    pub version: u64,
    pub nonce: u64,
}

impl DropVersion {
    pub fn new(version: u64, nonce: u64) -> Self {
        DropVersion { version, nonce }
    }

    /// A fresh version with a uniformly random nonce.
    pub fn with_random_nonce(version: u64) -> Self {
        DropVersion {
            version,
            nonce: crypto::random_u64(),
        }
    }

    fn to_dict_value(self) -> Value {
        let mut d = BTreeMap::new();
        d.insert(b"version".to_vec(), Value::int(self.version as i64));
        d.insert(b"nonce".to_vec(), Value::int(self.nonce as i64));
        Value::Dict(d)
    }

    fn from_dict_value(v: &Value) -> SyncrResult<Self> {
        let d = v
            .as_dict()
            .ok_or_else(|| SyncrError::verification("previous_versions entry is not a dict"))?;
        let version = read_u64(d, b"version")?;
        let nonce = read_u64(d, b"nonce")?;
        Ok(DropVersion { version, nonce })
    }
}

impl PartialOrd for DropVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DropVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.version
            .cmp(&other.version)
            .then(self.nonce.cmp(&other.nonce))
    }
}

impl std::fmt::Display for DropVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.version, self.nonce)
    }
}

/// A name for a specific on-disk blob: a concrete version, or the `LATEST`
/// pointer.
enum FilenameVersion {
    Version(DropVersion),
    Latest,
}

impl std::fmt::Display for FilenameVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilenameVersion::Version(v) => write!(f, "{v}"),
            FilenameVersion::Latest => f.write_str(LATEST),
        }
    }
}

fn make_filename(drop_id: &[u8], version: FilenameVersion) -> String {
    format!("{}_{}", crypto::b64::encode(drop_id), version)
}

/// A signed drop metadata record (spec.md section 3 "Drop metadata").
#[derive(Debug, Clone)]
pub struct DropMetadata {
    pub drop_id: Vec<u8>,
    pub name: String,
    pub version: DropVersion,
    pub previous_versions: Vec<DropVersion>,
    pub primary_owner: NodeId,
    pub other_owners: BTreeMap<NodeId, i64>,
    pub signed_by: NodeId,
    pub files: BTreeMap<String, Hash>,
    files_hash: Option<Hash>,
    sig: Option<Vec<u8>>,
}

impl DropMetadata {
    /// Builds an unsigned record from scratch. Call [`DropMetadata::sign`]
    /// before writing it to disk or sending it to a peer.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        drop_id: Vec<u8>,
        name: String,
        version: DropVersion,
        previous_versions: Vec<DropVersion>,
        primary_owner: NodeId,
        other_owners: BTreeMap<NodeId, i64>,
        signed_by: NodeId,
        files: BTreeMap<String, Hash>,
    ) -> Self {
        DropMetadata {
            drop_id,
            name,
            version,
            previous_versions,
            primary_owner,
            other_owners,
            signed_by,
            files,
            files_hash: None,
            sig: None,
        }
    }

    /// The digest of `files`, computed deterministically over the
    /// canonical encoding (spec.md section 4.1 "Dictionary hashing").
    pub fn files_hash(&self) -> Hash {
        match self.files_hash {
            Some(h) => h,
            None => Self::gen_files_hash(&self.files),
        }
    }

    fn gen_files_hash(files: &BTreeMap<String, Hash>) -> Hash {
        let mut d = BTreeMap::new();
        for (path, hash) in files {
            d.insert(path.as_bytes().to_vec(), Value::bytes(hash.as_bytes().to_vec()));
        }
        Hash::new(Value::Dict(d).encode())
    }

    /// Verifies the cached `files_hash` against a fresh recomputation.
    /// Called by [`DropMetadata::decode`]; exposed for callers that build
    /// a record from a directory walk and want to double check before
    /// signing.
    pub fn verify_files_hash(&self) -> SyncrResult<()> {
        let given = self
            .files_hash
            .ok_or_else(|| SyncrError::verification("files_hash not set"))?;
        let expected = Self::gen_files_hash(&self.files);
        if given != expected {
            return Err(SyncrError::verification("files_hash does not match files"));
        }
        Ok(())
    }

    fn unsigned_header(&self) -> Value {
        let mut d = BTreeMap::new();
        d.insert(b"protocol_version".to_vec(), Value::int(PROTOCOL_VERSION));
        d.insert(b"drop_id".to_vec(), Value::bytes(self.drop_id.clone()));
        d.insert(b"name".to_vec(), Value::bytes(self.name.clone().into_bytes()));
        d.insert(b"version".to_vec(), Value::int(self.version.version as i64));
        d.insert(b"version_nonce".to_vec(), Value::int(self.version.nonce as i64));
        d.insert(
            b"previous_versions".to_vec(),
            Value::List(
                self.previous_versions
                    .iter()
                    .map(|v| v.to_dict_value())
                    .collect(),
            ),
        );
        d.insert(
            b"primary_owner".to_vec(),
            Value::bytes(self.primary_owner.to_vec()),
        );
        let mut other_owners = BTreeMap::new();
        for (id, val) in &self.other_owners {
            other_owners.insert(id.to_vec(), Value::int(*val));
        }
        d.insert(b"other_owners".to_vec(), Value::Dict(other_owners));
        d.insert(b"header_signature".to_vec(), Value::bytes(Vec::new()));
        d.insert(b"signed_by".to_vec(), Value::bytes(self.signed_by.to_vec()));
        d.insert(
            b"files_hash".to_vec(),
            Value::bytes(self.files_hash().as_bytes().to_vec()),
        );
        d.insert(b"files".to_vec(), Value::Dict(BTreeMap::new()));
        Value::Dict(d)
    }

    /// Signs this record with `key`, which must belong to `signed_by`.
    /// Idempotent: a record that already carries a signature is left
    /// untouched.
    pub fn sign(&mut self, key: &PrivateKey) {
        if self.sig.is_some() {
            return;
        }
        let header = self.unsigned_header().encode();
        self.sig = Some(key.sign(&header));
    }

    pub fn signature(&self) -> Option<&[u8]> {
        self.sig.as_deref()
    }

    /// Verifies the header signature against `signed_by`'s resolved
    /// public key, then that `signed_by` is an owner (spec.md section
    /// 4.5, steps 3-4).
    pub fn verify_header(&self, signer_key: &PublicKey) -> SyncrResult<()> {
        let sig = self
            .sig
            .as_ref()
            .ok_or_else(|| SyncrError::verification("drop metadata is unsigned"))?;
        let header = self.unsigned_header().encode();
        signer_key.verify(&header, sig)?;
        if self.signed_by != self.primary_owner && !self.other_owners.contains_key(&self.signed_by)
        {
            return Err(SyncrError::verification(
                "signed_by is not the primary owner or a listed secondary owner",
            ));
        }
        Ok(())
    }

    /// Encodes the full record (header plus the real `files` map) for
    /// writing to disk or sending on the wire.
    pub fn encode(&self) -> SyncrResult<bytes::Bytes> {
        let sig = self
            .sig
            .clone()
            .ok_or_else(|| SyncrError::verification("cannot encode an unsigned drop metadata"))?;
        let Value::Dict(mut d) = self.unsigned_header() else {
            unreachable!("unsigned_header always returns a Dict")
        };
        d.insert(b"header_signature".to_vec(), Value::bytes(sig));
        let mut files = BTreeMap::new();
        for (path, hash) in &self.files {
            files.insert(path.as_bytes().to_vec(), Value::bytes(hash.as_bytes().to_vec()));
        }
        d.insert(b"files".to_vec(), Value::Dict(files));
        Ok(Value::Dict(d).encode())
    }

    /// Decodes a record and verifies the files hash and header signature
    /// (spec.md section 4.5 reader steps 1-4). `resolve_key` resolves a
    /// node ID to its public key, e.g. via the key store.
    pub fn decode(
        bytes: &[u8],
        resolve_key: impl FnOnce(&NodeId) -> SyncrResult<PublicKey>,
    ) -> SyncrResult<Self> {
        let value = Value::decode(bytes)
            .map_err(|e| SyncrError::verification(format!("malformed drop metadata: {e}")))?;
        let d = value
            .as_dict()
            .ok_or_else(|| SyncrError::verification("drop metadata is not a dict"))?;

        let drop_id = read_bytes(d, b"drop_id")?;
        let name = String::from_utf8(read_bytes(d, b"name")?)
            .map_err(|_| SyncrError::verification("drop name is not valid utf-8"))?;
        let version = DropVersion::new(read_u64(d, b"version")?, read_u64(d, b"version_nonce")?);
        let previous_versions = d
            .get(b"previous_versions".as_slice())
            .and_then(Value::as_list)
            .ok_or_else(|| SyncrError::verification("missing previous_versions"))?
            .iter()
            .map(DropVersion::from_dict_value)
            .collect::<SyncrResult<Vec<_>>>()?;
        let primary_owner = read_node_id(d, b"primary_owner")?;
        let signed_by = read_node_id(d, b"signed_by")?;
        let other_owners_dict = d
            .get(b"other_owners".as_slice())
            .and_then(Value::as_dict)
            .ok_or_else(|| SyncrError::verification("missing other_owners"))?;
        let mut other_owners = BTreeMap::new();
        for (k, v) in other_owners_dict {
            let id: NodeId = k
                .as_slice()
                .try_into()
                .map_err(|_| SyncrError::verification("other_owners key is not a node id"))?;
            let val = v
                .as_int()
                .ok_or_else(|| SyncrError::verification("other_owners value is not an int"))?;
            other_owners.insert(id, val);
        }
        let files_hash = Hash::from_bytes(
            read_bytes(d, b"files_hash")?
                .try_into()
                .map_err(|_| SyncrError::verification("files_hash is not 32 bytes"))?,
        );
        let sig = read_bytes(d, b"header_signature")?;
        let files_dict = d
            .get(b"files".as_slice())
            .and_then(Value::as_dict)
            .ok_or_else(|| SyncrError::verification("missing files"))?;
        let mut files = BTreeMap::new();
        for (path, hash_value) in files_dict {
            let path = String::from_utf8(path.clone())
                .map_err(|_| SyncrError::verification("file path is not valid utf-8"))?;
            let hash_bytes = hash_value
                .as_bytes()
                .ok_or_else(|| SyncrError::verification("file hash is not a byte string"))?;
            let hash = Hash::from_bytes(
                hash_bytes
                    .try_into()
                    .map_err(|_| SyncrError::verification("file hash is not 32 bytes"))?,
            );
            files.insert(path, hash);
        }

        let dm = DropMetadata {
            drop_id,
            name,
            version,
            previous_versions,
            primary_owner,
            other_owners,
            signed_by,
            files,
            files_hash: Some(files_hash),
            sig: Some(sig),
        };

        dm.verify_files_hash()?;
        let signer_key = resolve_key(&dm.signed_by)?;
        dm.verify_header(&signer_key)?;
        Ok(dm)
    }

    /// Writes this version's blob to `metadata_dir`, and advances the
    /// `LATEST` pointer unless `is_latest` is false (e.g. when
    /// backfilling a historical version seen from a peer).
    pub fn write_file(&self, metadata_dir: &Path, is_latest: bool) -> SyncrResult<()> {
        std::fs::create_dir_all(metadata_dir).map_err(|e| SyncrError::io(metadata_dir, e))?;
        let filename = make_filename(&self.drop_id, FilenameVersion::Version(self.version));
        let path = metadata_dir.join(&filename);
        std::fs::write(&path, self.encode()?).map_err(|e| SyncrError::io(&path, e))?;
        if is_latest {
            Self::write_latest(&self.drop_id, self.version, metadata_dir)?;
        }
        Ok(())
    }

    pub fn write_latest(
        drop_id: &[u8],
        version: DropVersion,
        metadata_dir: &Path,
    ) -> SyncrResult<()> {
        let pointer_path = metadata_dir.join(make_filename(drop_id, FilenameVersion::Latest));
        let target = make_filename(drop_id, FilenameVersion::Version(version));
        std::fs::write(&pointer_path, target).map_err(|e| SyncrError::io(&pointer_path, e))
    }

    pub fn read_latest_filename(drop_id: &[u8], metadata_dir: &Path) -> SyncrResult<String> {
        let pointer_path = metadata_dir.join(make_filename(drop_id, FilenameVersion::Latest));
        std::fs::read_to_string(&pointer_path).map_err(|e| SyncrError::io(&pointer_path, e))
    }

    /// Reads a drop metadata blob by `(drop_id, version)`, or the
    /// `LATEST` version if `version` is `None`. `Ok(None)` if the blob
    /// does not exist on disk.
    pub fn read_file(
        drop_id: &[u8],
        version: Option<DropVersion>,
        metadata_dir: &Path,
        resolve_key: impl FnOnce(&NodeId) -> SyncrResult<PublicKey>,
    ) -> SyncrResult<Option<Self>> {
        let filename = match version {
            Some(v) => make_filename(drop_id, FilenameVersion::Version(v)),
            None => match Self::read_latest_filename(drop_id, metadata_dir) {
                Ok(f) => f,
                Err(SyncrError::Io { .. }) => return Ok(None),
                Err(e) => return Err(e),
            },
        };
        let path = metadata_dir.join(&filename);
        match std::fs::read(&path) {
            Ok(bytes) => Self::decode(&bytes, resolve_key).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncrError::io(&path, e)),
        }
    }
}

fn read_bytes(d: &BTreeMap<Vec<u8>, Value>, key: &[u8]) -> SyncrResult<Vec<u8>> {
    d.get(key)
        .and_then(Value::as_bytes)
        .map(|b| b.to_vec())
        .ok_or_else(|| {
            SyncrError::verification(format!(
                "missing or malformed field {:?}",
                String::from_utf8_lossy(key)
            ))
        })
}

fn read_u64(d: &BTreeMap<Vec<u8>, Value>, key: &[u8]) -> SyncrResult<u64> {
    d.get(key)
        .and_then(Value::as_int)
        .map(|i| i as u64)
        .ok_or_else(|| {
            SyncrError::verification(format!(
                "missing or malformed field {:?}",
                String::from_utf8_lossy(key)
            ))
        })
}

fn read_node_id(d: &BTreeMap<Vec<u8>, Value>, key: &[u8]) -> SyncrResult<NodeId> {
    let bytes = read_bytes(d, key)?;
    bytes
        .try_into()
        .map_err(|_| SyncrError::verification(format!("{:?} is not a 32-byte node id", String::from_utf8_lossy(key))))
}

/// A fresh drop ID: the primary owner's node ID followed by 32 random
/// bytes (spec.md section 3 "Drop identity").
pub fn gen_drop_id(primary_owner: &NodeId) -> Vec<u8> {
    let mut id = primary_owner.to_vec();
    id.extend(crypto::random_bytes(32));
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use syncr_core::crypto::PrivateKey;

    fn sample(key: &PrivateKey, node_id: NodeId) -> DropMetadata {
        let drop_id = gen_drop_id(&node_id);
        let mut files = BTreeMap::new();
        files.insert("a.txt".to_string(), Hash::new(b"hello"));
        files.insert("sub/b.bin".to_string(), Hash::new([0u8; 64]));
        let mut dm = DropMetadata::new(
            drop_id,
            "my-drop".to_string(),
            DropVersion::new(1, 42),
            vec![],
            node_id,
            BTreeMap::new(),
            node_id,
            files,
        );
        dm.sign(key);
        dm
    }

    #[test]
    fn version_ordering_matches_spec() {
        assert!(DropVersion::new(1, 5) < DropVersion::new(2, 0));
        assert!(DropVersion::new(1, 5) < DropVersion::new(1, 6));
        assert_eq!(DropVersion::new(1, 5), DropVersion::new(1, 5));
    }

    #[test]
    fn filename_matches_expected_grammar() {
        let drop_id = vec![0u8; 64];
        let name = make_filename(&drop_id, FilenameVersion::Version(DropVersion::new(3, 9)));
        assert_eq!(name, format!("{}_3_9", crypto::b64::encode(&drop_id)));
        let latest = make_filename(&drop_id, FilenameVersion::Latest);
        assert_eq!(latest, format!("{}_LATEST", crypto::b64::encode(&drop_id)));
    }

    #[test]
    fn files_hash_is_independent_of_insertion_order() {
        let mut d1 = BTreeMap::new();
        d1.insert("z".to_string(), Hash::new(b"1"));
        d1.insert("a".to_string(), Hash::new(b"2"));
        let mut d2 = BTreeMap::new();
        d2.insert("a".to_string(), Hash::new(b"2"));
        d2.insert("z".to_string(), Hash::new(b"1"));
        assert_eq!(DropMetadata::gen_files_hash(&d1), DropMetadata::gen_files_hash(&d2));
    }

    #[test]
    fn encode_decode_roundtrip_verifies() {
        let key = PrivateKey::generate().unwrap();
        let node_id = key.public_key().node_id().unwrap();
        let dm = sample(&key, node_id);
        let encoded = dm.encode().unwrap();

        let pubkey = key.public_key();
        let decoded = DropMetadata::decode(&encoded, |_| Ok(pubkey.clone())).unwrap();
        assert_eq!(decoded.drop_id, dm.drop_id);
        assert_eq!(decoded.name, dm.name);
        assert_eq!(decoded.version, dm.version);
        assert_eq!(decoded.files, dm.files);
        assert_eq!(decoded.encode().unwrap(), encoded);
    }

    #[test]
    fn decode_rejects_tampered_files_hash() {
        let key = PrivateKey::generate().unwrap();
        let node_id = key.public_key().node_id().unwrap();
        let mut dm = sample(&key, node_id);
        dm.files.insert("extra.txt".to_string(), Hash::new(b"x"));
        // files_hash was computed before the tamper and is now stale, but
        // encode() re-derives the header from current state, so force a
        // genuinely inconsistent blob by hand.
        let mut d = match dm.unsigned_header() {
            Value::Dict(d) => d,
            _ => unreachable!(),
        };
        d.insert(
            b"header_signature".to_vec(),
            Value::bytes(dm.signature().unwrap().to_vec()),
        );
        let mut files = BTreeMap::new();
        files.insert(b"a.txt".to_vec(), Value::bytes(Hash::new(b"tampered").as_bytes().to_vec()));
        d.insert(b"files".to_vec(), Value::Dict(files));
        let tampered = Value::Dict(d).encode();

        let pubkey = key.public_key();
        let result = DropMetadata::decode(&tampered, |_| Ok(pubkey.clone()));
        assert!(matches!(result, Err(SyncrError::Verification(_))));
    }

    #[test]
    fn verify_header_rejects_non_owner_signer() {
        let key = PrivateKey::generate().unwrap();
        let node_id = key.public_key().node_id().unwrap();
        let mut dm = sample(&key, node_id);
        let other_key = PrivateKey::generate().unwrap();
        dm.signed_by = other_key.public_key().node_id().unwrap();
        let err = dm.verify_header(&other_key.public_key()).unwrap_err();
        assert!(matches!(err, SyncrError::Verification(_)));
    }

    #[test]
    fn write_and_read_latest_roundtrip() {
        let key = PrivateKey::generate().unwrap();
        let node_id = key.public_key().node_id().unwrap();
        let dm = sample(&key, node_id);
        let dir = tempfile::tempdir().unwrap();
        dm.write_file(dir.path(), true).unwrap();

        let pubkey = key.public_key();
        let read_back = DropMetadata::read_file(&dm.drop_id, None, dir.path(), |_| Ok(pubkey.clone()))
            .unwrap()
            .expect("latest version should be present");
        assert_eq!(read_back.version, dm.version);
        assert_eq!(read_back.files, dm.files);
    }
}
