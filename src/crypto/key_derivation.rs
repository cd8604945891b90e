//! Key derivation with PBKDF2-HMAC-SHA256.
//!
//! The same (passphrase, salt) pair always yields the same key, which is what
//! keeps previously written envelopes decryptable.

use pbkdf2::pbkdf2_hmac;
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use zeroize::Zeroizing;

/// Salt length (bytes)
pub const SALT_LEN: usize = 16;

/// Key length (bytes) - 256 bits for AES-256
pub const KEY_LEN: usize = 32;

/// PBKDF2 iteration count
pub const PBKDF2_ITERATIONS: u32 = 100_000;

/// A 256-bit key, wiped on drop. Never serialized or cached.
pub type DerivedKey = Zeroizing<[u8; KEY_LEN]>;

/// Derive an encryption key from a passphrase and salt.
///
/// # Arguments
/// * `passphrase` - User passphrase
/// * `salt` - 16-byte salt stored next to the ciphertext
pub fn derive_key(passphrase: &str, salt: &[u8; SALT_LEN]) -> DerivedKey {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key[..]);
    key
}

/// Generate a random salt for key derivation
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive a key with a fresh salt.
/// Returns both key and salt; the salt must be stored with the ciphertext.
pub fn derive_key_new(passphrase: &str) -> (DerivedKey, [u8; SALT_LEN]) {
    let salt = generate_salt();
    let key = derive_key(passphrase, &salt);
    (key, salt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_deterministic() {
        let salt = [7u8; SALT_LEN];

        let key1 = derive_key("test_password_123", &salt);
        let key2 = derive_key("test_password_123", &salt);

        assert_eq!(*key1, *key2);
    }

    #[test]
    fn test_derive_key_different_passphrase() {
        let salt = [0u8; SALT_LEN];

        let key1 = derive_key("password1", &salt);
        let key2 = derive_key("password2", &salt);

        assert_ne!(*key1, *key2);
    }

    #[test]
    fn test_derive_key_different_salt() {
        let key1 = derive_key("same_password", &[0u8; SALT_LEN]);
        let key2 = derive_key("same_password", &[1u8; SALT_LEN]);

        assert_ne!(*key1, *key2);
    }

    #[test]
    fn test_derive_key_new_uses_fresh_salt() {
        let (key1, salt1) = derive_key_new("password");
        let (key2, salt2) = derive_key_new("password");

        assert_ne!(salt1, salt2);
        assert_ne!(*key1, *key2);

        // The returned salt reproduces the returned key
        assert_eq!(*derive_key("password", &salt1), *key1);
    }

    #[test]
    fn test_known_vector() {
        // Published PBKDF2-HMAC-SHA256 vector: P="password", S="salt", c=1, dkLen=32
        let mut out = [0u8; 32];
        pbkdf2_hmac::<Sha256>(b"password", b"salt", 1, &mut out);
        assert_eq!(
            hex::encode(out),
            "120fb6cffcf8b32c43e7225256c4f837a86548c92ccc35480805987cb70be17b"
        );
    }
}
