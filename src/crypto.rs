//! Content encryption at rest.
//!
//! Entry content is passed through an [`EncryptionProvider`] before it
//! reaches the storage layer. Two providers exist:
//!
//! - [`PlainEncryption`]: stores the JSON array verbatim (the default).
//! - [`AesGcmEncryption`]: AES-256-GCM with a random per-record data key
//!   (DEK), itself wrapped by the configured master key. Enabled by setting
//!   `encryption.key` in the config.
//!
//! A configured provider still reads rows written in plain mode, so
//! encryption can be turned on for an existing database; only new writes are
//! encrypted.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("encryption failed")]
    Encrypt,

    #[error("decryption failed")]
    Decrypt,

    #[error("content is encrypted but no encryption key is configured")]
    KeyRequired,

    #[error("malformed encryption envelope: {0}")]
    Envelope(String),
}

/// Stored representation of an encrypted record.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    v: u8,
    alg: String,
    /// Wrap nonce + wrapped DEK, base64.
    dek: String,
    /// Content nonce, base64.
    nonce: String,
    /// Ciphertext, base64.
    ct: String,
}

const ENVELOPE_ALG: &str = "aes256gcm";
const NONCE_LEN: usize = 12;

/// Transforms entry content between its API form (a JSON array) and its
/// stored form.
pub trait EncryptionProvider: Send + Sync {
    fn encrypt(&self, content: &serde_json::Value) -> Result<serde_json::Value, CryptoError>;
    fn decrypt(&self, stored: &serde_json::Value) -> Result<serde_json::Value, CryptoError>;
}

fn is_envelope(value: &serde_json::Value) -> bool {
    value
        .as_object()
        .is_some_and(|obj| obj.contains_key("alg") && obj.contains_key("ct"))
}

/// Header-only provider: content is stored as-is.
pub struct PlainEncryption;

impl EncryptionProvider for PlainEncryption {
    fn encrypt(&self, content: &serde_json::Value) -> Result<serde_json::Value, CryptoError> {
        Ok(content.clone())
    }

    fn decrypt(&self, stored: &serde_json::Value) -> Result<serde_json::Value, CryptoError> {
        if is_envelope(stored) {
            return Err(CryptoError::KeyRequired);
        }
        Ok(stored.clone())
    }
}

/// AES-256-GCM with a per-record DEK wrapped by the master key.
pub struct AesGcmEncryption {
    master: Aes256Gcm,
}

impl AesGcmEncryption {
    /// Build from a base64- or hex-encoded 32-byte master key.
    pub fn new(encoded_key: &str) -> Result<Self, CryptoError> {
        let bytes = if let Ok(bytes) = BASE64.decode(encoded_key) {
            bytes
        } else {
            hex::decode(encoded_key)
                .map_err(|_| CryptoError::InvalidKey("expected base64 or hex".into()))?
        };
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKey(format!(
                "expected 32 bytes, got {}",
                bytes.len()
            )));
        }
        let key = Key::<Aes256Gcm>::from_slice(&bytes);
        Ok(Self {
            master: Aes256Gcm::new(key),
        })
    }

    fn random_bytes<const N: usize>() -> [u8; N] {
        let mut buf = [0u8; N];
        rand::thread_rng().fill_bytes(&mut buf);
        buf
    }
}

impl EncryptionProvider for AesGcmEncryption {
    fn encrypt(&self, content: &serde_json::Value) -> Result<serde_json::Value, CryptoError> {
        let plaintext = serde_json::to_vec(content).map_err(|_| CryptoError::Encrypt)?;

        let dek_bytes: [u8; 32] = Self::random_bytes();
        let dek = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&dek_bytes));

        let content_nonce: [u8; NONCE_LEN] = Self::random_bytes();
        let ciphertext = dek
            .encrypt(Nonce::from_slice(&content_nonce), plaintext.as_ref())
            .map_err(|_| CryptoError::Encrypt)?;

        let wrap_nonce: [u8; NONCE_LEN] = Self::random_bytes();
        let wrapped_dek = self
            .master
            .encrypt(Nonce::from_slice(&wrap_nonce), dek_bytes.as_ref())
            .map_err(|_| CryptoError::Encrypt)?;

        let mut dek_field = Vec::with_capacity(NONCE_LEN + wrapped_dek.len());
        dek_field.extend_from_slice(&wrap_nonce);
        dek_field.extend_from_slice(&wrapped_dek);

        let envelope = Envelope {
            v: 1,
            alg: ENVELOPE_ALG.to_string(),
            dek: BASE64.encode(dek_field),
            nonce: BASE64.encode(content_nonce),
            ct: BASE64.encode(ciphertext),
        };
        serde_json::to_value(&envelope).map_err(|_| CryptoError::Encrypt)
    }

    fn decrypt(&self, stored: &serde_json::Value) -> Result<serde_json::Value, CryptoError> {
        if !is_envelope(stored) {
            // Row written before encryption was enabled.
            return Ok(stored.clone());
        }

        let envelope: Envelope = serde_json::from_value(stored.clone())
            .map_err(|e| CryptoError::Envelope(e.to_string()))?;
        if envelope.alg != ENVELOPE_ALG {
            return Err(CryptoError::Envelope(format!(
                "unknown algorithm: {}",
                envelope.alg
            )));
        }

        let dek_field = BASE64
            .decode(&envelope.dek)
            .map_err(|e| CryptoError::Envelope(e.to_string()))?;
        if dek_field.len() <= NONCE_LEN {
            return Err(CryptoError::Envelope("truncated dek field".into()));
        }
        let (wrap_nonce, wrapped_dek) = dek_field.split_at(NONCE_LEN);
        let dek_bytes = self
            .master
            .decrypt(Nonce::from_slice(wrap_nonce), wrapped_dek)
            .map_err(|_| CryptoError::Decrypt)?;
        if dek_bytes.len() != 32 {
            return Err(CryptoError::Decrypt);
        }
        let dek = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&dek_bytes));

        let content_nonce = BASE64
            .decode(&envelope.nonce)
            .map_err(|e| CryptoError::Envelope(e.to_string()))?;
        let ciphertext = BASE64
            .decode(&envelope.ct)
            .map_err(|e| CryptoError::Envelope(e.to_string()))?;

        let plaintext = dek
            .decrypt(Nonce::from_slice(&content_nonce), ciphertext.as_ref())
            .map_err(|_| CryptoError::Decrypt)?;
        serde_json::from_slice(&plaintext).map_err(|_| CryptoError::Decrypt)
    }
}

/// Select a provider from the optional configured key.
pub fn provider_from_key(
    key: Option<&str>,
) -> Result<std::sync::Arc<dyn EncryptionProvider>, CryptoError> {
    match key {
        Some(key) => Ok(std::sync::Arc::new(AesGcmEncryption::new(key)?)),
        None => Ok(std::sync::Arc::new(PlainEncryption)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> String {
        BASE64.encode([7u8; 32])
    }

    #[test]
    fn plain_round_trip() {
        let provider = PlainEncryption;
        let content = serde_json::json!([{"text": "hello"}]);
        let stored = provider.encrypt(&content).unwrap();
        assert_eq!(stored, content);
        assert_eq!(provider.decrypt(&stored).unwrap(), content);
    }

    #[test]
    fn plain_rejects_encrypted_rows() {
        let provider = AesGcmEncryption::new(&test_key()).unwrap();
        let stored = provider.encrypt(&serde_json::json!(["x"])).unwrap();
        assert!(matches!(
            PlainEncryption.decrypt(&stored),
            Err(CryptoError::KeyRequired)
        ));
    }

    #[test]
    fn aes_gcm_round_trip() {
        let provider = AesGcmEncryption::new(&test_key()).unwrap();
        let content = serde_json::json!([{"text": "secret"}, {"text": "window"}]);
        let stored = provider.encrypt(&content).unwrap();
        assert!(is_envelope(&stored));
        assert_ne!(stored, content);
        assert_eq!(provider.decrypt(&stored).unwrap(), content);
    }

    #[test]
    fn aes_gcm_uses_fresh_dek_per_record() {
        let provider = AesGcmEncryption::new(&test_key()).unwrap();
        let content = serde_json::json!(["same content"]);
        let a = provider.encrypt(&content).unwrap();
        let b = provider.encrypt(&content).unwrap();
        assert_ne!(a["ct"], b["ct"]);
        assert_ne!(a["dek"], b["dek"]);
    }

    #[test]
    fn aes_gcm_reads_plain_rows() {
        let provider = AesGcmEncryption::new(&test_key()).unwrap();
        let content = serde_json::json!([{"text": "old row"}]);
        assert_eq!(provider.decrypt(&content).unwrap(), content);
    }

    #[test]
    fn wrong_key_fails_decrypt() {
        let provider = AesGcmEncryption::new(&test_key()).unwrap();
        let stored = provider.encrypt(&serde_json::json!(["x"])).unwrap();
        let other = AesGcmEncryption::new(&BASE64.encode([9u8; 32])).unwrap();
        assert!(matches!(other.decrypt(&stored), Err(CryptoError::Decrypt)));
    }

    #[test]
    fn rejects_bad_keys() {
        assert!(AesGcmEncryption::new("too-short").is_err());
        assert!(AesGcmEncryption::new(&BASE64.encode([1u8; 16])).is_err());
    }
}
