//! Node key generation, node-ID derivation, and signing/verification.
//!
//! Node identity is a 4096-bit RSA keypair (spec.md section 3: "Node
//! identity"). The node ID is the 32-byte SHA-256 digest of the public
//! key's canonical SPKI DER encoding, so it is stable across processes and
//! independent of any particular serialization of the private key.

use crate::error::{SyncrError, SyncrResult};
use crate::hash::Hash;
use rand::rngs::OsRng;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use spki::{DecodePublicKey, EncodePublicKey};

/// Size in bits of the RSA modulus used for node identity keys.
pub const KEY_SIZE_BITS: usize = 4096;

/// 32-byte digest of a node's public signing key.
pub type NodeId = [u8; 32];

/// A node's private signing key. Never leaves the node that generated it.
#[derive(Clone)]
pub struct PrivateKey {
    inner: RsaPrivateKey,
}

/// A node's public signing key, as resolved from the key store or embedded
/// in a peer's handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    inner: RsaPublicKey,
}

impl PrivateKey {
    /// Generates a fresh 4096-bit RSA keypair using the OS RNG.
    pub fn generate() -> SyncrResult<Self> {
        let inner = RsaPrivateKey::new(&mut OsRng, KEY_SIZE_BITS)
            .map_err(|e| SyncrError::configuration(format!("key generation failed: {e}")))?;
        Ok(PrivateKey { inner })
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            inner: RsaPublicKey::from(&self.inner),
        }
    }

    /// Signs `message` with PKCS#1 v1.5 over a SHA-256 digest.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let signing_key = SigningKey::<Sha256>::new(self.inner.clone());
        let signature = signing_key.sign_with_rng(&mut OsRng, message);
        signature.to_vec()
    }

    /// Encodes the private key as PKCS#8 DER, for persistence under the
    /// node's init directory. The bytes never leave the local node.
    pub fn to_pkcs8_der(&self) -> SyncrResult<Vec<u8>> {
        use rsa::pkcs8::EncodePrivateKey;
        self.inner
            .to_pkcs8_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| SyncrError::configuration(format!("private key encode failed: {e}")))
    }

    pub fn from_pkcs8_der(der: &[u8]) -> SyncrResult<Self> {
        use rsa::pkcs8::DecodePrivateKey;
        let inner = RsaPrivateKey::from_pkcs8_der(der)
            .map_err(|e| SyncrError::configuration(format!("private key decode failed: {e}")))?;
        Ok(PrivateKey { inner })
    }
}

impl PublicKey {
    /// The canonical SPKI DER encoding of this public key, used both for
    /// node-ID derivation and for persistence in the key store.
    pub fn to_spki_der(&self) -> SyncrResult<Vec<u8>> {
        self.inner
            .to_public_key_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| SyncrError::configuration(format!("public key encode failed: {e}")))
    }

    pub fn from_spki_der(der: &[u8]) -> SyncrResult<Self> {
        let inner = RsaPublicKey::from_public_key_der(der)
            .map_err(|e| SyncrError::configuration(format!("public key decode failed: {e}")))?;
        Ok(PublicKey { inner })
    }

    /// Derives this key's 32-byte node ID: `SHA256(spki_der)`.
    pub fn node_id(&self) -> SyncrResult<NodeId> {
        let der = self.to_spki_der()?;
        Ok(*Hash::new(der).as_bytes())
    }

    /// Verifies a PKCS#1 v1.5 / SHA-256 signature over `message`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> SyncrResult<()> {
        let verifying_key = VerifyingKey::<Sha256>::new(self.inner.clone());
        let signature = Signature::try_from(signature)
            .map_err(|e| SyncrError::verification(format!("malformed signature: {e}")))?;
        verifying_key
            .verify(message, &signature)
            .map_err(|e| SyncrError::verification(format!("signature mismatch: {e}")))
    }
}

/// `n` cryptographically strong random bytes, for drop-ID suffixes and
/// version nonces.
pub fn random_bytes(n: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut buf = vec![0u8; n];
    OsRng.fill_bytes(&mut buf);
    buf
}

/// A uniformly random `u64`, for drop version nonces (spec.md section 3).
pub fn random_u64() -> u64 {
    use rand::RngCore;
    OsRng.next_u64()
}

/// URL-safe, unpadded base64, as used for drop/file IDs in filenames and
/// wire strings (spec.md section 4.1).
pub mod b64 {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        URL_SAFE_NO_PAD.encode(bytes)
    }

    pub fn decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
        URL_SAFE_NO_PAD.decode(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_roundtrip() {
        let key = PrivateKey::generate().unwrap();
        let pubkey = key.public_key();
        let msg = b"drop metadata header bytes";
        let sig = key.sign(msg);
        pubkey.verify(msg, &sig).expect("signature should verify");
    }

    #[test]
    fn verify_rejects_tampered_message() {
        let key = PrivateKey::generate().unwrap();
        let pubkey = key.public_key();
        let sig = key.sign(b"original");
        assert!(pubkey.verify(b"tampered", &sig).is_err());
    }

    #[test]
    fn node_id_is_stable_for_same_key() {
        let key = PrivateKey::generate().unwrap();
        let pubkey = key.public_key();
        let id1 = pubkey.node_id().unwrap();
        let id2 = pubkey.node_id().unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn private_key_der_roundtrip() {
        let key = PrivateKey::generate().unwrap();
        let der = key.to_pkcs8_der().unwrap();
        let restored = PrivateKey::from_pkcs8_der(&der).unwrap();
        assert_eq!(
            key.public_key().to_spki_der().unwrap(),
            restored.public_key().to_spki_der().unwrap()
        );
    }

    #[test]
    fn base64_roundtrip() {
        let bytes = random_bytes(32);
        let encoded = b64::encode(&bytes);
        assert_eq!(b64::decode(&encoded).unwrap(), bytes);
    }
}
