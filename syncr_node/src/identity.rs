//! Loads a node's private signing key from its init directory.
//!
//! Grounded on the teacher's `identity::load_secret_key`: this only loads
//! an existing key, accepting either raw PKCS#8 DER bytes or a
//! hex/base64-encoded text form. Generating a fresh key is the node
//! bootstrap ceremony, which spec.md section 1 names as an external
//! collaborator and is not performed here.

use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use data_encoding::HEXLOWER;

use syncr_core::crypto::PrivateKey;
use syncr_core::error::{SyncrError, SyncrResult};

pub fn load_private_key(path: &Path) -> SyncrResult<PrivateKey> {
    let bytes = std::fs::read(path).map_err(|e| SyncrError::io(path, e))?;

    if let Ok(key) = PrivateKey::from_pkcs8_der(&bytes) {
        return Ok(key);
    }
    if let Ok(text) = std::str::from_utf8(&bytes) {
        let trimmed = text.trim();
        if let Ok(der) = BASE64_STANDARD.decode(trimmed)
            && let Ok(key) = PrivateKey::from_pkcs8_der(&der)
        {
            return Ok(key);
        }
        if let Ok(der) = HEXLOWER.decode(trimmed.to_ascii_lowercase().as_bytes())
            && let Ok(key) = PrivateKey::from_pkcs8_der(&der)
        {
            return Ok(key);
        }
    }
    Err(SyncrError::configuration(format!(
        "{} is not a valid PKCS#8 private key",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_a_raw_der_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let key = PrivateKey::generate().unwrap();
        std::fs::write(dir.path().join("private_key"), key.to_pkcs8_der().unwrap()).unwrap();

        let loaded = load_private_key(&dir.path().join("private_key")).unwrap();
        assert_eq!(
            loaded.public_key().to_spki_der().unwrap(),
            key.public_key().to_spki_der().unwrap()
        );
    }

    #[test]
    fn loads_a_base64_encoded_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let key = PrivateKey::generate().unwrap();
        let encoded = BASE64_STANDARD.encode(key.to_pkcs8_der().unwrap());
        std::fs::write(dir.path().join("private_key"), encoded).unwrap();

        let loaded = load_private_key(&dir.path().join("private_key")).unwrap();
        assert_eq!(
            loaded.public_key().to_spki_der().unwrap(),
            key.public_key().to_spki_der().unwrap()
        );
    }

    #[test]
    fn missing_key_file_is_a_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_private_key(&dir.path().join("private_key")).unwrap_err();
        assert!(matches!(err, SyncrError::Io { .. }));
    }
}
