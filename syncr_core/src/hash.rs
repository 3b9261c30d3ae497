//! The content digest used throughout the sync engine: SHA-256, 32 bytes.
//!
//! Used for chunk hashes, file hashes, the `files_hash` digest of a drop's
//! file map, and node-ID derivation from a public key.

use sha2::{Digest, Sha256};
use std::{borrow::Borrow, fmt};

#[derive(Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Hash([u8; 32]);

impl Hash {
    pub fn new(buf: impl AsRef<[u8]>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(buf.as_ref());
        Hash(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }

    pub fn to_hex(&self) -> String {
        data_encoding::HEXLOWER.encode(&self.0)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Borrow<[u8; 32]> for Hash {
    fn borrow(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for Hash {
    fn from(value: [u8; 32]) -> Self {
        Hash(value)
    }
}

impl From<Hash> for [u8; 32] {
    fn from(value: Hash) -> Self {
        value.0
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hash").field(&self.to_hex()).finish()
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_hash_is_stable() {
        let h1 = Hash::new(b"");
        let h2 = Hash::new([]);
        assert_eq!(h1, h2);
    }

    #[test]
    fn distinct_inputs_distinct_hashes() {
        assert_ne!(Hash::new(b"a"), Hash::new(b"b"));
    }
}
