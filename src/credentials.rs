//! The credential custodian.
//!
//! AEAD encryption of the private-key blob attached to each watch. The core
//! treats this blob as opaque outside of `encrypt`/`decrypt`: the watch
//! registry stores only ciphertext, and the notification router receives an
//! already-decrypted string it never inspects.
//!
//! Key sourced from, in order: `SOL_WATCH_ENCRYPTION_KEY` env var (base64);
//! an on-disk key file (created with a freshly generated key on first run
//! if neither is present).

use std::path::Path;

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::CryptoError;

const KEY_ENV_VAR: &str = "SOL_WATCH_ENCRYPTION_KEY";

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    nonce: String,
    ciphertext: String,
}

pub struct CredentialCustodian {
    cipher: Aes256Gcm,
}

impl CredentialCustodian {
    /// Loads the key from the environment, falling back to an on-disk key
    /// file at `key_file` (generated on first run).
    pub fn load(key_file: impl AsRef<Path>) -> Result<Self, CryptoError> {
        let key_bytes = Self::resolve_key(key_file.as_ref())?;
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    fn resolve_key(key_file: &Path) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        if let Ok(encoded) = std::env::var(KEY_ENV_VAR) {
            let bytes = BASE64
                .decode(encoded.trim())
                .map_err(|_| CryptoError::InvalidKeyLength(0))?;
            if bytes.len() != 32 {
                return Err(CryptoError::InvalidKeyLength(bytes.len()));
            }
            return Ok(Zeroizing::new(bytes));
        }

        if key_file.exists() {
            let raw = std::fs::read(key_file)?;
            if raw.len() != 32 {
                return Err(CryptoError::InvalidKeyLength(raw.len()));
            }
            return Ok(Zeroizing::new(raw));
        }

        let mut key = vec![0u8; 32];
        rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut key);
        if let Some(parent) = key_file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(key_file, &key)?;
        tracing::warn!(
            path = %key_file.display(),
            "generated new credential encryption key; back this file up"
        );
        Ok(Zeroizing::new(key))
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;

        let envelope = Envelope {
            nonce: BASE64.encode(nonce),
            ciphertext: BASE64.encode(ciphertext),
        };
        serde_json::to_string(&envelope)
            .map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))
    }

    pub fn decrypt(&self, stored: &str) -> Result<String, CryptoError> {
        let envelope: Envelope = serde_json::from_str(stored)
            .map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))?;

        let nonce_bytes = BASE64
            .decode(&envelope.nonce)
            .map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = BASE64
            .decode(&envelope.ciphertext)
            .map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))?;

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext.as_slice())
            .map_err(|_| CryptoError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::Decrypt)
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn custodian_with_fixed_key() -> CredentialCustodian {
        let key = [7u8; 32];
        let key = Key::<Aes256Gcm>::from_slice(&key);
        CredentialCustodian {
            cipher: Aes256Gcm::new(key),
        }
    }

    #[test]
    fn round_trips_plaintext() {
        let custodian = custodian_with_fixed_key();
        let ciphertext = custodian.encrypt("super-secret-private-key").unwrap();
        assert_ne!(ciphertext, "super-secret-private-key");
        let plaintext = custodian.decrypt(&ciphertext).unwrap();
        assert_eq!(plaintext, "super-secret-private-key");
    }

    #[test]
    fn rejects_tampered_ciphertext() {
        let custodian = custodian_with_fixed_key();
        let mut envelope: Envelope =
            serde_json::from_str(&custodian.encrypt("hello").unwrap()).unwrap();
        envelope.ciphertext = BASE64.encode(b"not the real ciphertext at all!");
        let tampered = serde_json::to_string(&envelope).unwrap();
        assert!(custodian.decrypt(&tampered).is_err());
    }
}
