//! The drop-location registry: drop ID → local root directory (spec.md
//! section 3 "On-disk layout", "A central registry maps drop ID → local
//! root directory").
//!
//! Grounded on `original_source`'s `drop_init.save_drop_location` /
//! `get_drop_location`: one plain-text file per drop ID, named by its
//! base64 encoding, under a single directory. Kept deliberately simple
//! since the registry itself carries no signed or verified content, only
//! a local bookkeeping mapping.

use std::path::{Path, PathBuf};

use syncr_core::crypto;
use syncr_core::error::{SyncrError, SyncrResult};

/// Maps drop IDs to the local directory a node has chosen to sync them
/// into. Backed by one file per drop under `registry_dir`.
#[derive(Debug, Clone)]
pub struct DropRegistry {
    registry_dir: PathBuf,
}

impl DropRegistry {
    pub fn new(registry_dir: impl Into<PathBuf>) -> Self {
        DropRegistry {
            registry_dir: registry_dir.into(),
        }
    }

    fn entry_path(&self, drop_id: &[u8]) -> PathBuf {
        self.registry_dir.join(crypto::b64::encode(drop_id))
    }

    /// Registers `drop_id` as rooted at `location`, overwriting any
    /// existing entry.
    pub fn set_location(&self, drop_id: &[u8], location: &Path) -> SyncrResult<()> {
        std::fs::create_dir_all(&self.registry_dir)
            .map_err(|e| SyncrError::io(&self.registry_dir, e))?;
        let path = self.entry_path(drop_id);
        let location_str = location.to_string_lossy();
        std::fs::write(&path, location_str.as_bytes()).map_err(|e| SyncrError::io(&path, e))
    }

    /// Looks up the local root directory for `drop_id`, if this node has
    /// one registered.
    pub fn location(&self, drop_id: &[u8]) -> SyncrResult<Option<PathBuf>> {
        let path = self.entry_path(drop_id);
        match std::fs::read_to_string(&path) {
            Ok(s) => Ok(Some(PathBuf::from(s))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncrError::io(&path, e)),
        }
    }

    /// Lists every drop ID this node has registered locally, for periodic
    /// re-announcement to the peer/key store (spec.md section 5: "a
    /// separate worker may drive background peer-store announcements").
    pub fn list(&self) -> SyncrResult<Vec<Vec<u8>>> {
        let entries = match std::fs::read_dir(&self.registry_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SyncrError::io(&self.registry_dir, e)),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| SyncrError::io(&self.registry_dir, e))?;
            if let Some(name) = entry.file_name().to_str()
                && let Ok(id) = crypto::b64::decode(name)
            {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Ensures `drop_id` is registered at `location`, creating the
    /// directory itself if absent, and registering it if not already
    /// present (spec.md section 4.9, step 2).
    pub fn ensure_registered(&self, drop_id: &[u8], location: &Path) -> SyncrResult<()> {
        if !location.exists() {
            std::fs::create_dir_all(location).map_err(|e| SyncrError::io(location, e))?;
        }
        if self.location(drop_id)?.is_none() {
            self.set_location(drop_id, location)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DropRegistry::new(dir.path().join("drops"));
        let drop_id = vec![7u8; 64];
        let location = dir.path().join("my-drop");

        registry.set_location(&drop_id, &location).unwrap();
        assert_eq!(registry.location(&drop_id).unwrap(), Some(location));
    }

    #[test]
    fn unknown_drop_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DropRegistry::new(dir.path().join("drops"));
        assert_eq!(registry.location(&[1u8; 64]).unwrap(), None);
    }

    #[test]
    fn ensure_registered_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DropRegistry::new(dir.path().join("drops"));
        let drop_id = vec![3u8; 64];
        let location = dir.path().join("replica");

        registry.ensure_registered(&drop_id, &location).unwrap();
        assert!(location.exists());
        let first = registry.location(&drop_id).unwrap();

        registry.ensure_registered(&drop_id, &location).unwrap();
        assert_eq!(registry.location(&drop_id).unwrap(), first);
    }

    #[test]
    fn list_returns_every_registered_drop_id() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DropRegistry::new(dir.path().join("drops"));
        let a = vec![1u8; 64];
        let b = vec![2u8; 64];
        registry.set_location(&a, &dir.path().join("a")).unwrap();
        registry.set_location(&b, &dir.path().join("b")).unwrap();

        let mut ids = registry.list().unwrap();
        ids.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[test]
    fn list_on_an_unused_registry_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DropRegistry::new(dir.path().join("drops"));
        assert!(registry.list().unwrap().is_empty());
    }
}
