//! Selective record encryption
//!
//! Encrypts named fields of a JSON record in place, leaving the rest in
//! plaintext. Each encrypted field is keyed under a context equal to its
//! field name, so fields can be decrypted or rotated independently, and is
//! tracked in a `_encryption` metadata map that must be stored alongside
//! the record.

use crate::crypto::cipher::FieldCipher;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Metadata key added to records with encrypted fields
pub const ENCRYPTION_META_KEY: &str = "_encryption";

/// Per-field entry in the `_encryption` map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldMeta {
    /// Base64 nonce the field was encrypted with
    pub iv: String,
    /// Always true for recorded fields
    pub encrypted: bool,
}

impl FieldCipher {
    /// Encrypt the listed fields of a JSON object in place
    ///
    /// Fields that are absent or null are skipped and not recorded. Each
    /// encrypted value is replaced by its base64 ciphertext string and noted
    /// in the `_encryption` map. With an empty field list or a disabled
    /// cipher the record is returned unchanged.
    pub fn encrypt_object(&self, record: &Value, fields: &[&str]) -> Result<Value> {
        let obj = as_object(record)?;

        if fields.is_empty() || !self.is_enabled() {
            return Ok(record.clone());
        }

        let mut out = obj.clone();
        let mut meta = match out.remove(ENCRYPTION_META_KEY) {
            Some(Value::Object(existing)) => existing,
            _ => Map::new(),
        };

        for field in fields {
            let value = match obj.get(*field) {
                Some(v) if !v.is_null() => v,
                _ => continue,
            };

            let plaintext = serde_json::to_string(value)?;
            let payload = self.encrypt(&plaintext, Some(field))?;

            out.insert((*field).to_string(), Value::String(payload.ciphertext));
            meta.insert(
                (*field).to_string(),
                serde_json::to_value(FieldMeta {
                    iv: payload.iv,
                    encrypted: true,
                })?,
            );
        }

        if !meta.is_empty() {
            out.insert(ENCRYPTION_META_KEY.to_string(), Value::Object(meta));
        }

        Ok(Value::Object(out))
    }

    /// Decrypt every field recorded in the `_encryption` map and strip the map
    ///
    /// A field that fails to decrypt is left in its encrypted state and
    /// logged; the remaining fields still decrypt. A record without the map
    /// is returned unchanged.
    pub fn decrypt_object(&self, record: &Value) -> Result<Value> {
        let obj = as_object(record)?;

        if !obj.contains_key(ENCRYPTION_META_KEY) {
            return Ok(record.clone());
        }

        if !self.is_enabled() {
            warn!("record has encrypted fields but the cipher is disabled; returning it unchanged");
            return Ok(record.clone());
        }

        let mut out = obj.clone();
        let meta = match out.remove(ENCRYPTION_META_KEY) {
            Some(Value::Object(meta)) => meta,
            _ => {
                warn!("malformed {} metadata; returning record unchanged", ENCRYPTION_META_KEY);
                return Ok(record.clone());
            }
        };

        for (field, entry) in meta {
            let entry: FieldMeta = match serde_json::from_value(entry) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("skipping field '{}': malformed metadata: {}", field, e);
                    continue;
                }
            };
            if !entry.encrypted {
                continue;
            }

            let ciphertext = match out.get(&field) {
                Some(Value::String(s)) => s.clone(),
                _ => {
                    warn!("skipping field '{}': no ciphertext string present", field);
                    continue;
                }
            };

            match self.decrypt(&ciphertext, &entry.iv, Some(&field)) {
                Ok(plaintext) => match serde_json::from_str(&plaintext) {
                    Ok(restored) => {
                        out.insert(field, restored);
                    }
                    Err(e) => {
                        warn!("field '{}' decrypted but did not parse: {}", field, e);
                    }
                },
                Err(e) => {
                    warn!("failed to decrypt field '{}': {}", field, e);
                }
            }
        }

        Ok(Value::Object(out))
    }
}

fn as_object(record: &Value) -> Result<&Map<String, Value>> {
    record
        .as_object()
        .ok_or_else(|| Error::Serialization("expected a JSON object".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::KeyManager;
    use serde_json::json;
    use std::sync::Arc;

    const TEST_ITERATIONS: u32 = 1_000;

    fn test_cipher() -> FieldCipher {
        let keys = KeyManager::from_seed("unit-test-seed", TEST_ITERATIONS).unwrap();
        FieldCipher::new(Arc::new(keys))
    }

    #[test]
    fn test_only_listed_fields_transformed() {
        let cipher = test_cipher();
        let record = json!({"a": "x", "b": "y", "c": 5});

        let encrypted = cipher.encrypt_object(&record, &["a"]).unwrap();

        assert_eq!(encrypted["b"], "y");
        assert_eq!(encrypted["c"], 5);
        assert_ne!(encrypted["a"], "x");
        assert!(encrypted["a"].is_string());

        let meta = encrypted[ENCRYPTION_META_KEY].as_object().unwrap();
        assert_eq!(meta.len(), 1);
        assert!(meta.contains_key("a"));
        assert_eq!(meta["a"]["encrypted"], true);
    }

    #[test]
    fn test_object_roundtrip_exact() {
        let cipher = test_cipher();
        let record = json!({"a": "x", "b": "y", "c": 5});

        let encrypted = cipher.encrypt_object(&record, &["a"]).unwrap();
        let decrypted = cipher.decrypt_object(&encrypted).unwrap();

        assert_eq!(decrypted, record);
        assert!(decrypted.get(ENCRYPTION_META_KEY).is_none());
    }

    #[test]
    fn test_non_string_values_roundtrip() {
        let cipher = test_cipher();
        let record = json!({
            "estate_value": 1_250_000,
            "beneficiaries": ["ana", "ben"],
            "revoked": false,
            "notes": {"draft": true}
        });

        let fields = ["estate_value", "beneficiaries", "revoked", "notes"];
        let encrypted = cipher.encrypt_object(&record, &fields).unwrap();
        for field in fields {
            assert!(encrypted[field].is_string(), "{} should be ciphertext", field);
        }

        assert_eq!(cipher.decrypt_object(&encrypted).unwrap(), record);
    }

    #[test]
    fn test_absent_and_null_fields_skipped() {
        let cipher = test_cipher();
        let record = json!({"present": "value", "nullish": null});

        let encrypted = cipher
            .encrypt_object(&record, &["present", "nullish", "missing"])
            .unwrap();

        let meta = encrypted[ENCRYPTION_META_KEY].as_object().unwrap();
        assert_eq!(meta.len(), 1);
        assert!(meta.contains_key("present"));
        assert_eq!(encrypted["nullish"], Value::Null);
    }

    #[test]
    fn test_empty_field_list_is_identity() {
        let cipher = test_cipher();
        let record = json!({"a": "x"});

        let encrypted = cipher.encrypt_object(&record, &[]).unwrap();
        assert_eq!(encrypted, record);
    }

    #[test]
    fn test_disabled_cipher_is_identity() {
        let cipher = FieldCipher::disabled();
        let record = json!({"a": "x"});

        assert_eq!(cipher.encrypt_object(&record, &["a"]).unwrap(), record);
    }

    #[test]
    fn test_record_without_metadata_decrypts_unchanged() {
        let cipher = test_cipher();
        let record = json!({"a": "x", "b": 2});

        assert_eq!(cipher.decrypt_object(&record).unwrap(), record);
    }

    #[test]
    fn test_fields_use_independent_contexts() {
        let cipher = test_cipher();
        let record = json!({"a": "same", "b": "same"});

        let encrypted = cipher.encrypt_object(&record, &["a", "b"]).unwrap();

        // Same plaintext, different field keys and nonces
        assert_ne!(encrypted["a"], encrypted["b"]);
    }

    #[test]
    fn test_corrupted_field_does_not_block_siblings() {
        let cipher = test_cipher();
        let record = json!({"a": "alpha", "b": "beta"});

        let mut encrypted = cipher.encrypt_object(&record, &["a", "b"]).unwrap();

        // Corrupt field a's ciphertext
        let corrupted = format!("x{}", encrypted["a"].as_str().unwrap());
        encrypted["a"] = Value::String(corrupted.clone());

        let decrypted = cipher.decrypt_object(&encrypted).unwrap();

        assert_eq!(decrypted["b"], "beta");
        // The corrupted field stays in its encrypted state, not null
        assert_eq!(decrypted["a"], corrupted);
        assert!(decrypted.get(ENCRYPTION_META_KEY).is_none());
    }

    #[test]
    fn test_non_object_rejected() {
        let cipher = test_cipher();
        assert!(cipher.encrypt_object(&json!("scalar"), &["a"]).is_err());
        assert!(cipher.decrypt_object(&json!([1, 2])).is_err());
    }
}
