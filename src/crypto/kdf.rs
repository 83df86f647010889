//! PBKDF2 key derivation
//!
//! Every key in legacyvault is stretched from one master seed with
//! PBKDF2-HMAC-SHA256. The context string doubles as the salt, so the same
//! seed yields an independent key for each field or storage slot, and the
//! same (seed, context) pair always re-derives the same key across sessions.

use crate::crypto::KEY_SIZE;
use crate::error::{Error, Result};
use ring::pbkdf2::{self, PBKDF2_HMAC_SHA256};
use std::num::NonZeroU32;
use zeroize::Zeroizing;

/// A symmetric key derived for one context
///
/// The raw material stays wrapped in `Zeroizing` and is wiped on drop. It is
/// handed around as an opaque handle and never serialized.
pub struct DerivedKey {
    key: Zeroizing<[u8; KEY_SIZE]>,
    context: String,
}

impl DerivedKey {
    /// Get the raw key bytes
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    /// The context string this key was derived for
    pub fn context(&self) -> &str {
        &self.context
    }
}

/// Derive a 256-bit key for a context at a given rotation epoch
///
/// Derivation is deterministic: same seed, context, epoch, and iteration
/// count always produce the same key.
pub fn derive_key(seed: &[u8], context: &str, epoch: u32, iterations: u32) -> Result<DerivedKey> {
    if seed.is_empty() {
        return Err(Error::KeyDerivation("seed must not be empty".to_string()));
    }

    let iterations = NonZeroU32::new(iterations)
        .ok_or_else(|| Error::KeyDerivation("iteration count must be non-zero".to_string()))?;

    let salt = derivation_salt(context, epoch);

    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    pbkdf2::derive(PBKDF2_HMAC_SHA256, iterations, salt.as_bytes(), seed, &mut key[..]);

    Ok(DerivedKey {
        key,
        context: context.to_string(),
    })
}

/// Salt for a context at a rotation epoch.
///
/// Epoch 0 uses the bare context so entries written before any rotation stay
/// decryptable in later sessions.
fn derivation_salt(context: &str, epoch: u32) -> String {
    if epoch == 0 {
        context.to_string()
    } else {
        format!("{}#r{}", context, epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_ITERATIONS: u32 = 1_000;

    #[test]
    fn test_derivation_deterministic() {
        let key1 = derive_key(b"seed", "master", 0, TEST_ITERATIONS).unwrap();
        let key2 = derive_key(b"seed", "master", 0, TEST_ITERATIONS).unwrap();
        assert_eq!(key1.key(), key2.key());
    }

    #[test]
    fn test_contexts_get_independent_keys() {
        let key1 = derive_key(b"seed", "beneficiary_ssn", 0, TEST_ITERATIONS).unwrap();
        let key2 = derive_key(b"seed", "document_notes", 0, TEST_ITERATIONS).unwrap();
        assert_ne!(key1.key(), key2.key());
    }

    #[test]
    fn test_seeds_get_independent_keys() {
        let key1 = derive_key(b"seed-a", "master", 0, TEST_ITERATIONS).unwrap();
        let key2 = derive_key(b"seed-b", "master", 0, TEST_ITERATIONS).unwrap();
        assert_ne!(key1.key(), key2.key());
    }

    #[test]
    fn test_epoch_changes_key_material() {
        let key0 = derive_key(b"seed", "master", 0, TEST_ITERATIONS).unwrap();
        let key1 = derive_key(b"seed", "master", 1, TEST_ITERATIONS).unwrap();
        assert_ne!(key0.key(), key1.key());
    }

    #[test]
    fn test_empty_seed_rejected() {
        assert!(derive_key(b"", "master", 0, TEST_ITERATIONS).is_err());
    }

    #[test]
    fn test_zero_iterations_rejected() {
        assert!(derive_key(b"seed", "master", 0, 0).is_err());
    }

    #[test]
    fn test_context_carried_on_handle() {
        let key = derive_key(b"seed", "asset_value", 0, TEST_ITERATIONS).unwrap();
        assert_eq!(key.context(), "asset_value");
    }
}
