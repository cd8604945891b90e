//! Crypto module - passphrase-based authenticated encryption.
//!
//! This module contains:
//! - PBKDF2-HMAC-SHA256 key derivation from a passphrase
//! - AES-256-GCM encryption/decryption with random IVs
//! - The versioned JSON envelope and its structural classifier

pub mod encryption;
pub mod envelope;
pub mod key_derivation;

pub use encryption::Encryptor;
pub use envelope::{classify, decrypt, encrypt, is_envelope, Envelope, StoredForm};
pub use key_derivation::{derive_key, derive_key_new, DerivedKey, KEY_LEN, SALT_LEN};
