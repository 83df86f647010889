//! AES-256-GCM field encryption
//!
//! All field values are encrypted with AES-256-GCM which provides:
//! - Confidentiality: values are unreadable without the key
//! - Integrity: any tampering is detected
//! - Authentication: verifies the data came from the key holder
//!
//! Ciphertext and nonce travel as base64 text so they can be stored in any
//! backend column or cache entry unchanged.

use crate::crypto::keys::{KeyManager, MASTER_CONTEXT};
use crate::crypto::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};
use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::{constant_time, digest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Encrypted value with its nonce, both base64-encoded
///
/// An empty `iv` marks a value written by a disabled (passthrough) cipher;
/// an enabled cipher refuses to decrypt such a value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedPayload {
    /// Base64 ciphertext with the appended authentication tag
    pub ciphertext: String,
    /// Base64 nonce, unique per encryption
    pub iv: String,
}

/// Encrypts and decrypts field values under per-context keys
///
/// The cipher owns no key material itself; it asks its [`KeyManager`] for
/// the key matching each value's context. Constructed via [`FieldCipher::new`]
/// for normal operation or [`FieldCipher::disabled`] for the development
/// passthrough mode.
pub struct FieldCipher {
    keys: Option<Arc<KeyManager>>,
}

impl FieldCipher {
    /// Create a cipher backed by a key manager
    pub fn new(keys: Arc<KeyManager>) -> Self {
        FieldCipher { keys: Some(keys) }
    }

    /// Create a passthrough cipher for setups that explicitly disable
    /// encryption. Values pass through unchanged with an empty IV marker.
    pub fn disabled() -> Self {
        warn!("field encryption is DISABLED; values pass through as plaintext");
        FieldCipher { keys: None }
    }

    /// Build a cipher from the encryption configuration
    pub fn from_config(config: &crate::config::EncryptionConfig) -> Result<Self> {
        if config.enabled {
            Ok(FieldCipher::new(Arc::new(KeyManager::new(config)?)))
        } else {
            Ok(FieldCipher::disabled())
        }
    }

    /// Whether this cipher actually encrypts
    pub fn is_enabled(&self) -> bool {
        self.keys.is_some()
    }

    /// The key manager behind this cipher, if encryption is enabled
    pub fn key_manager(&self) -> Option<&Arc<KeyManager>> {
        self.keys.as_ref()
    }

    /// Encrypt a value under the key for `context` (master context if `None`)
    ///
    /// A fresh random nonce is generated inside this call for every
    /// encryption; there is no way for a caller to supply one.
    pub fn encrypt(&self, plaintext: &str, context: Option<&str>) -> Result<EncryptedPayload> {
        let keys = match &self.keys {
            Some(keys) => keys,
            None => {
                return Ok(EncryptedPayload {
                    ciphertext: plaintext.to_string(),
                    iv: String::new(),
                })
            }
        };

        let key = keys.key_for(context.unwrap_or(MASTER_CONTEXT))?;
        let sealed = seal(key.key(), plaintext.as_bytes())?;

        Ok(EncryptedPayload {
            ciphertext: BASE64.encode(&sealed.ciphertext),
            iv: BASE64.encode(sealed.nonce),
        })
    }

    /// Decrypt a value previously produced by [`encrypt`](Self::encrypt)
    ///
    /// Fails with `Error::Decryption` on corrupted input, a wrong context,
    /// or tampering; it never returns garbage on authentication failure.
    pub fn decrypt(&self, ciphertext: &str, iv: &str, context: Option<&str>) -> Result<String> {
        let keys = match &self.keys {
            Some(keys) => keys,
            None => return Ok(ciphertext.to_string()),
        };

        if iv.is_empty() {
            return Err(Error::Decryption(
                "missing IV; value was not written by an enabled cipher".to_string(),
            ));
        }

        let ciphertext = BASE64
            .decode(ciphertext)
            .map_err(|e| Error::Decryption(format!("invalid ciphertext encoding: {}", e)))?;
        let nonce = BASE64
            .decode(iv)
            .map_err(|e| Error::Decryption(format!("invalid IV encoding: {}", e)))?;

        let key = keys.key_for(context.unwrap_or(MASTER_CONTEXT))?;
        let plaintext = open(key.key(), &nonce, &ciphertext)?;

        String::from_utf8(plaintext)
            .map_err(|_| Error::Decryption("decrypted value is not valid UTF-8".to_string()))
    }
}

/// Sealed bytes before text encoding
struct SealedData {
    nonce: [u8; NONCE_SIZE],
    ciphertext: Vec<u8>,
}

/// Encrypt bytes under a raw key with a fresh random nonce
fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<SealedData> {
    let unbound_key = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| Error::Encryption("Failed to create encryption key".to_string()))?;
    let sealing_key = LessSafeKey::new(unbound_key);

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = plaintext.to_vec();
    in_out.reserve(TAG_SIZE);

    sealing_key
        .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| Error::Encryption("Encryption failed".to_string()))?;

    Ok(SealedData {
        nonce: nonce_bytes,
        ciphertext: in_out,
    })
}

/// Decrypt bytes under a raw key
fn open(key: &[u8; KEY_SIZE], nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if nonce.len() != NONCE_SIZE {
        return Err(Error::Decryption(format!(
            "Invalid nonce length: {}",
            nonce.len()
        )));
    }

    if ciphertext.len() < TAG_SIZE {
        return Err(Error::Decryption("Ciphertext too short".to_string()));
    }

    let unbound_key = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| Error::Decryption("Failed to create decryption key".to_string()))?;
    let opening_key = LessSafeKey::new(unbound_key);

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    nonce_bytes.copy_from_slice(nonce);
    let nonce = Nonce::assume_unique_for_key(nonce_bytes);

    let mut in_out = ciphertext.to_vec();
    let plaintext = opening_key
        .open_in_place(nonce, Aad::empty(), &mut in_out)
        .map_err(|_| {
            Error::Decryption("Decryption failed - data corrupted or wrong key".to_string())
        })?;

    Ok(plaintext.to_vec())
}

/// One-way SHA-256 digest as lowercase hex, for fingerprinting and lookups
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(digest::digest(&digest::SHA256, data).as_ref())
}

/// Random token of `byte_len` bytes, hex-encoded (twice as many characters)
pub fn generate_secure_token(byte_len: usize) -> String {
    let mut bytes = vec![0u8; byte_len];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Constant-time string equality
///
/// Inputs of different lengths return false immediately; only the length is
/// leaked, never the contents.
pub fn secure_compare(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    constant_time::verify_slices_are_equal(a, b).is_ok()
}
