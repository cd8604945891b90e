//! AES-256-GCM encryption/decryption.
//!
//! AES-GCM is an AEAD cipher: it provides confidentiality and integrity.
//!
//! - 96-bit (12 byte) IV, MUST be unique per message under the same key
//! - 128-bit (16 byte) authentication tag appended to the ciphertext

use super::key_derivation::KEY_LEN;
use crate::error::{Error, Result};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::{rngs::OsRng, RngCore};

/// IV length (bytes) - 96 bits
pub const IV_LEN: usize = 12;

/// Authentication tag length (bytes) - 128 bits
pub const TAG_LEN: usize = 16;

/// Encrypts/decrypts with an already derived key.
pub struct Encryptor {
    cipher: Aes256Gcm,
}

impl Encryptor {
    /// Create an encryptor from a 32-byte key
    pub fn new(key: &[u8; KEY_LEN]) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| Error::Encryption(format!("invalid key length: {e}")))?;
        Ok(Self { cipher })
    }

    /// Encrypt with a freshly generated random IV.
    /// Returns: (iv, ciphertext || tag)
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<([u8; IV_LEN], Vec<u8>)> {
        let iv = generate_iv();
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|e| Error::Encryption(e.to_string()))?;
        Ok((iv, ciphertext))
    }

    /// Decrypt `ciphertext || tag` under `iv`.
    ///
    /// Any tag mismatch is reported as [`Error::Authentication`].
    pub fn decrypt(&self, iv: &[u8; IV_LEN], ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < TAG_LEN {
            return Err(Error::Authentication);
        }
        self.cipher
            .decrypt(Nonce::from_slice(iv), ciphertext)
            .map_err(|_| Error::Authentication)
    }
}

/// Generate a random 12-byte IV
pub fn generate_iv() -> [u8; IV_LEN] {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    iv
}
