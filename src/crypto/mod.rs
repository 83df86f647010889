//! Cryptography module for legacyvault
//!
//! Provides AES-256-GCM encryption with PBKDF2-HMAC-SHA256 key derivation.
//! Field values are encrypted on the client before they leave the device.

mod cipher;
mod kdf;
mod keys;
mod object;

pub use cipher::{
    generate_secure_token, secure_compare, sha256_hex, EncryptedPayload, FieldCipher,
};
pub use kdf::{derive_key, DerivedKey};
pub use keys::{KeyManager, MASTER_CONTEXT};
pub use object::{FieldMeta, ENCRYPTION_META_KEY};

/// Size of AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of GCM nonce in bytes
pub const NONCE_SIZE: usize = 12;

/// Size of GCM authentication tag in bytes
pub const TAG_SIZE: usize = 16;
