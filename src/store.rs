//! Encrypted local key-value store
//!
//! Values are serialized to JSON, encrypted under a context equal to their
//! logical key, and persisted as `{"data", "iv", "timestamp"}` entries in a
//! sled database. Keys are namespaced with a prefix so other subsystems can
//! share the database without `clear` ever touching their entries.

use crate::crypto::FieldCipher;
use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sled::Db;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default key prefix for store entries
pub const DEFAULT_NAMESPACE: &str = "secure_";

/// On-disk entry shape. Changing this breaks previously written stores.
#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    /// Base64 ciphertext of the JSON-serialized value
    data: String,
    /// Base64 nonce (empty when written by a disabled cipher)
    iv: String,
    /// Write time, epoch milliseconds
    timestamp: i64,
}

/// Key-value store that encrypts every value at rest
///
/// Reads are best-effort: a missing, corrupted, or undecryptable entry
/// behaves like a cache miss. Writes propagate errors so callers know the
/// entry was not persisted. Concurrent writers to the same key are not
/// arbitrated; the last write wins.
pub struct SecureStore {
    db: Db,
    cipher: Arc<FieldCipher>,
    namespace: String,
}

impl SecureStore {
    /// Open or create a store at `path` with the default namespace
    pub fn open<P: AsRef<Path>>(path: P, cipher: Arc<FieldCipher>) -> Result<Self> {
        Self::open_with_namespace(path, cipher, DEFAULT_NAMESPACE)
    }

    /// Open or create a store with an explicit namespace prefix
    pub fn open_with_namespace<P: AsRef<Path>>(
        path: P,
        cipher: Arc<FieldCipher>,
        namespace: &str,
    ) -> Result<Self> {
        let db = sled::open(path.as_ref())?;

        let store = SecureStore {
            db,
            cipher,
            namespace: namespace.to_string(),
        };

        info!(
            "secure store opened at {:?}, namespace '{}', {} entries",
            path.as_ref(),
            store.namespace,
            store.keys()?.len()
        );

        Ok(store)
    }

    /// Open a store over an existing sled database
    ///
    /// Lets several namespaced stores share one database file.
    pub fn with_db(db: Db, cipher: Arc<FieldCipher>, namespace: &str) -> Self {
        SecureStore {
            db,
            cipher,
            namespace: namespace.to_string(),
        }
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }

    /// Serialize, encrypt, and persist a value under `key`
    pub fn set_item<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let serialized = serde_json::to_string(value)?;
        let payload = self.cipher.encrypt(&serialized, Some(key))?;

        let entry = StoredEntry {
            data: payload.ciphertext,
            iv: payload.iv,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };

        let bytes = serde_json::to_vec(&entry)?;
        self.db.insert(self.storage_key(key).as_bytes(), bytes)?;
        self.db.flush()?;

        debug!("stored entry '{}'", key);
        Ok(())
    }

    /// Read, decrypt, and deserialize the value under `key`
    ///
    /// Returns `None` for absent entries and for entries that fail to read,
    /// decrypt, or parse; failures are logged, never raised.
    pub fn get_item<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.db.get(self.storage_key(key).as_bytes()) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("failed to read entry '{}': {}", key, e);
                return None;
            }
        };

        let entry: StoredEntry = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("entry '{}' is malformed: {}", key, e);
                return None;
            }
        };

        let plaintext = match self.cipher.decrypt(&entry.data, &entry.iv, Some(key)) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                warn!("failed to decrypt entry '{}': {}", key, e);
                return None;
            }
        };

        match serde_json::from_str(&plaintext) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("entry '{}' did not deserialize: {}", key, e);
                None
            }
        }
    }

    /// When the entry under `key` was last written, epoch milliseconds
    pub fn entry_timestamp(&self, key: &str) -> Option<i64> {
        let raw = self.db.get(self.storage_key(key).as_bytes()).ok()??;
        let entry: StoredEntry = serde_json::from_slice(&raw).ok()?;
        Some(entry.timestamp)
    }

    /// Remove the entry under `key`, if any
    pub fn remove_item(&self, key: &str) -> Result<()> {
        self.db.remove(self.storage_key(key).as_bytes())?;
        self.db.flush()?;
        Ok(())
    }

    /// Remove every entry in this store's namespace
    ///
    /// Entries outside the namespace, written by other subsystems sharing
    /// the database, are left alone.
    pub fn clear(&self) -> Result<()> {
        let keys: Vec<sled::IVec> = self
            .db
            .scan_prefix(self.namespace.as_bytes())
            .keys()
            .collect::<std::result::Result<_, _>>()?;

        for key in &keys {
            self.db.remove(key)?;
        }
        self.db.flush()?;

        info!("cleared {} entries from namespace '{}'", keys.len(), self.namespace);
        Ok(())
    }

    /// Logical (de-namespaced) keys currently stored
    pub fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();

        for key in self.db.scan_prefix(self.namespace.as_bytes()).keys() {
            let key = key?;
            if let Ok(full) = std::str::from_utf8(&key) {
                keys.push(full[self.namespace.len()..].to_string());
            }
        }

        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyManager;
    use serde_json::json;

    const TEST_ITERATIONS: u32 = 1_000;

    fn test_store(dir: &tempfile::TempDir) -> SecureStore {
        let keys = KeyManager::from_seed("unit-test-seed", TEST_ITERATIONS).unwrap();
        let cipher = Arc::new(FieldCipher::new(Arc::new(keys)));
        SecureStore::open(dir.path().join("store"), cipher).unwrap()
    }

    #[test]
    fn test_set_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);

        store.set_item("session", &json!({"x": 1})).unwrap();
        let value: serde_json::Value = store.get_item("session").unwrap();

        assert_eq!(value, json!({"x": 1}));
    }

    #[test]
    fn test_missing_key_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);

        assert!(store.get_item::<serde_json::Value>("absent").is_none());
    }

    #[test]
    fn test_remove_item() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);

        store.set_item("k", &"v").unwrap();
        store.remove_item("k").unwrap();

        assert!(store.get_item::<String>("k").is_none());
    }

    #[test]
    fn test_values_are_encrypted_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);

        store.set_item("will_draft", &"all to the cat sanctuary").unwrap();

        let raw = store.db.get(b"secure_will_draft").unwrap().unwrap();
        let raw = String::from_utf8(raw.to_vec()).unwrap();
        assert!(!raw.contains("cat sanctuary"));
        assert!(raw.contains("\"iv\""));
        assert!(raw.contains("\"timestamp\""));
    }

    #[test]
    fn test_entry_shape_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);

        store.set_item("k", &"v").unwrap();

        let raw = store.db.get(b"secure_k").unwrap().unwrap();
        let entry: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert!(entry["data"].is_string());
        assert!(entry["iv"].is_string());
        assert!(entry["timestamp"].is_i64());
    }

    #[test]
    fn test_corrupted_entry_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);

        store.set_item("k", &"v").unwrap();
        store.db.insert(b"secure_k", b"not json at all".to_vec()).unwrap();

        assert!(store.get_item::<String>("k").is_none());
    }

    #[test]
    fn test_tampered_ciphertext_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);

        store.set_item("k", &"v").unwrap();

        let raw = store.db.get(b"secure_k").unwrap().unwrap();
        let mut entry: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        entry["data"] = serde_json::Value::String(format!("x{}", entry["data"].as_str().unwrap()));
        store
            .db
            .insert(b"secure_k", serde_json::to_vec(&entry).unwrap())
            .unwrap();

        assert!(store.get_item::<String>("k").is_none());
    }

    #[test]
    fn test_clear_spares_foreign_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);

        store.set_item("mine", &1).unwrap();
        store
            .db
            .insert(b"other_subsystem_key", b"raw bytes".to_vec())
            .unwrap();

        store.clear().unwrap();

        assert!(store.get_item::<i32>("mine").is_none());
        assert!(store.db.get(b"other_subsystem_key").unwrap().is_some());
    }

    #[test]
    fn test_keys_are_denamespaced() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);

        store.set_item("alpha", &1).unwrap();
        store.set_item("beta", &2).unwrap();
        store
            .db
            .insert(b"other_subsystem_key", b"raw".to_vec())
            .unwrap();

        let mut keys = store.keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_entry_timestamp_present() {
        let dir = tempfile::tempdir().unwrap();
        let store = test_store(&dir);

        store.set_item("k", &"v").unwrap();
        let ts = store.entry_timestamp("k").unwrap();
        assert!(ts > 0);
    }

    #[test]
    fn test_reopened_store_decrypts_existing_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store");

        {
            let keys = KeyManager::from_seed("unit-test-seed", TEST_ITERATIONS).unwrap();
            let cipher = Arc::new(FieldCipher::new(Arc::new(keys)));
            let store = SecureStore::open(&path, cipher).unwrap();
            store.set_item("persisted", &json!({"deep": [1, 2, 3]})).unwrap();
        }

        let keys = KeyManager::from_seed("unit-test-seed", TEST_ITERATIONS).unwrap();
        let cipher = Arc::new(FieldCipher::new(Arc::new(keys)));
        let store = SecureStore::open(&path, cipher).unwrap();

        let value: serde_json::Value = store.get_item("persisted").unwrap();
        assert_eq!(value, json!({"deep": [1, 2, 3]}));
    }

    #[test]
    fn test_namespaces_isolate_stores() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("shared")).unwrap();

        let keys = KeyManager::from_seed("unit-test-seed", TEST_ITERATIONS).unwrap();
        let cipher = Arc::new(FieldCipher::new(Arc::new(keys)));

        let a = SecureStore::with_db(db.clone(), Arc::clone(&cipher), "vault_");
        let b = SecureStore::with_db(db, Arc::clone(&cipher), "capsule_");

        a.set_item("k", &"from a").unwrap();
        b.set_item("k", &"from b").unwrap();

        a.clear().unwrap();

        assert!(a.get_item::<String>("k").is_none());
        assert_eq!(b.get_item::<String>("k").unwrap(), "from b");
    }
}
