//! Key management for legacyvault
//!
//! A single master seed is stretched into per-context subkeys: one per
//! encrypted field name, one per storage slot, plus the "master" context
//! used when a caller gives no context of its own. Derived keys are cached
//! for the life of the manager and regenerated wholesale on rotation.

use crate::config::EncryptionConfig;
use crate::crypto::kdf::{derive_key, DerivedKey};
use crate::error::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Context used when callers do not name one
pub const MASTER_CONTEXT: &str = "master";

/// Fixed seed for the `allow_dev_seed` escape hatch. Worthless as a secret;
/// it exists so local development can run without secret provisioning.
const DEV_FALLBACK_SEED: &str = "legacyvault-dev-seed-do-not-ship";

/// Derives and caches per-context symmetric keys from the master seed
///
/// Construction derives the master key eagerly, so a bad seed or KDF setup
/// fails at startup instead of on first use. The manager is cheap to share
/// behind an `Arc`; derivation results are cached per context.
pub struct KeyManager {
    seed: Zeroizing<Vec<u8>>,
    iterations: u32,
    epoch: AtomicU32,
    cache: RwLock<HashMap<String, Arc<DerivedKey>>>,
}

impl KeyManager {
    /// Create a key manager from the encryption configuration
    ///
    /// Fails with `Error::Initialization` when no master seed is configured,
    /// unless the config explicitly opts in to the development seed.
    pub fn new(config: &EncryptionConfig) -> Result<Self> {
        let seed = match config.master_seed.as_deref() {
            Some(seed) if !seed.is_empty() => Zeroizing::new(seed.as_bytes().to_vec()),
            _ if config.allow_dev_seed => {
                warn!(
                    "no master seed configured; falling back to the built-in development seed. \
                     Data encrypted this way is NOT protected"
                );
                Zeroizing::new(DEV_FALLBACK_SEED.as_bytes().to_vec())
            }
            _ => {
                return Err(Error::Initialization(
                    "master seed is required when encryption is enabled".to_string(),
                ))
            }
        };

        let manager = KeyManager {
            seed,
            iterations: config.kdf_iterations,
            epoch: AtomicU32::new(config.key_epoch),
            cache: RwLock::new(HashMap::new()),
        };

        // Eager master derivation so initialization failures surface here
        manager.key_for(MASTER_CONTEXT)?;

        Ok(manager)
    }

    /// Create a key manager directly from a seed string
    pub fn from_seed(seed: &str, iterations: u32) -> Result<Self> {
        let config = EncryptionConfig {
            enabled: true,
            master_seed: Some(seed.to_string()),
            kdf_iterations: iterations,
            key_epoch: 0,
            allow_dev_seed: false,
        };
        Self::new(&config)
    }

    /// Get the key for a context, deriving and caching it on first use
    ///
    /// Derivation is deterministic, so concurrent calls for the same context
    /// may race on the cache; the last writer simply replaces an identical
    /// entry.
    pub fn key_for(&self, context: &str) -> Result<Arc<DerivedKey>> {
        if let Some(key) = self.cache.read().get(context) {
            return Ok(Arc::clone(key));
        }

        let epoch = self.epoch.load(Ordering::Acquire);
        debug!("deriving key for context '{}' (epoch {})", context, epoch);
        let key = Arc::new(derive_key(&self.seed, context, epoch, self.iterations)?);

        self.cache
            .write()
            .insert(context.to_string(), Arc::clone(&key));

        Ok(key)
    }

    /// Current rotation epoch
    pub fn epoch(&self) -> u32 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Number of cached context keys
    pub fn cached_contexts(&self) -> usize {
        self.cache.read().len()
    }

    /// Advance the rotation epoch, drop every cached key, and re-derive the
    /// master key under the new epoch. Returns the new epoch.
    ///
    /// Ciphertext written under an earlier epoch does not decrypt afterwards;
    /// re-encrypting existing data is a migration concern handled above this
    /// layer. Callers must persist the returned epoch (the CLI writes it back
    /// to the config file) and must not rotate while encrypt or decrypt calls
    /// are in flight.
    pub fn rotate_keys(&self) -> Result<u32> {
        let next = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.cache.write().clear();
        self.key_for(MASTER_CONTEXT)?;
        warn!("key rotation complete, epoch is now {}", next);
        Ok(next)
    }
}
