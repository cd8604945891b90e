//! Versioned, self-describing ciphertext envelope.
//!
//! Wire format (field order is fixed):
//!
//! ```text
//! {"v":1,"alg":"AES-GCM","salt":"<base64 16B>","iv":"<base64 12B>","ct":"<base64 ciphertext+tag>"}
//! ```
//!
//! Every [`encrypt`] call derives a new key from a new salt and uses a new IV,
//! so a (key, iv) pair is never reused and two envelopes of the same
//! plaintext are unlinkable.

use super::encryption::{Encryptor, IV_LEN, TAG_LEN};
use super::key_derivation::{derive_key, derive_key_new, SALT_LEN};
use crate::error::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

/// Only supported envelope version
pub const ENVELOPE_VERSION: u64 = 1;

/// Algorithm tag written into every envelope (AES-256-GCM)
pub const ALGORITHM: &str = "AES-GCM";

#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    v: u64,
    alg: String,
    salt: String,
    iv: String,
    ct: String,
}

/// A parsed and validated envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub version: u64,
    pub algorithm: String,
    pub salt: [u8; SALT_LEN],
    pub iv: [u8; IV_LEN],
    /// Ciphertext with the GCM tag appended
    pub ciphertext: Vec<u8>,
}

/// Non-secret envelope metadata, safe to log or display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvelopeSummary {
    pub version: u64,
    pub algorithm: String,
    pub ciphertext_len: usize,
}

/// How a stored raw value should be treated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredForm {
    /// Legacy/plaintext value
    Plain,
    /// A supported envelope
    Sealed(Envelope),
    /// Envelope-shaped but unusable; must never be read as plaintext
    Unsupported(String),
}

impl Envelope {
    /// Encrypt raw bytes under a key derived from `passphrase` and a fresh salt.
    pub fn seal(plaintext: &[u8], passphrase: &str) -> Result<Self> {
        let (key, salt) = derive_key_new(passphrase);
        let (iv, ciphertext) = Encryptor::new(&key)?.encrypt(plaintext)?;
        Ok(Self {
            version: ENVELOPE_VERSION,
            algorithm: ALGORITHM.to_string(),
            salt,
            iv,
            ciphertext,
        })
    }

    /// Decrypt to raw bytes. The key is re-derived from the embedded salt.
    pub fn open(&self, passphrase: &str) -> Result<Vec<u8>> {
        let key = derive_key(passphrase, &self.salt);
        Encryptor::new(&key)?.decrypt(&self.iv, &self.ciphertext)
    }

    /// Parse and validate an envelope from its JSON form.
    pub fn parse(raw: &str) -> Result<Self> {
        let wire: WireEnvelope = serde_json::from_str(raw)
            .map_err(|e| Error::Format(format!("not an envelope: {e}")))?;
        Self::from_wire(wire)
    }

    /// Serialize to the wire format.
    pub fn to_json(&self) -> Result<String> {
        let wire = WireEnvelope {
            v: self.version,
            alg: self.algorithm.clone(),
            salt: STANDARD.encode(self.salt),
            iv: STANDARD.encode(self.iv),
            ct: STANDARD.encode(&self.ciphertext),
        };
        Ok(serde_json::to_string(&wire)?)
    }

    pub fn summary(&self) -> EnvelopeSummary {
        EnvelopeSummary {
            version: self.version,
            algorithm: self.algorithm.clone(),
            ciphertext_len: self.ciphertext.len(),
        }
    }

    fn from_wire(wire: WireEnvelope) -> Result<Self> {
        if wire.v != ENVELOPE_VERSION {
            return Err(Error::Format(format!(
                "unsupported envelope version {}",
                wire.v
            )));
        }
        if wire.alg != ALGORITHM {
            return Err(Error::Format(format!(
                "unsupported algorithm {:?}",
                wire.alg
            )));
        }

        let salt = decode_fixed::<SALT_LEN>("salt", &wire.salt)?;
        let iv = decode_fixed::<IV_LEN>("iv", &wire.iv)?;
        let ciphertext = STANDARD
            .decode(&wire.ct)
            .map_err(|e| Error::Format(format!("ct is not base64: {e}")))?;
        if ciphertext.len() < TAG_LEN {
            return Err(Error::Format("ct shorter than the GCM tag".to_string()));
        }

        Ok(Self {
            version: wire.v,
            algorithm: wire.alg,
            salt,
            iv,
            ciphertext,
        })
    }
}

fn decode_fixed<const N: usize>(field: &str, encoded: &str) -> Result<[u8; N]> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| Error::Format(format!("{field} is not base64: {e}")))?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        Error::Format(format!(
            "{field} must be {N} bytes, got {}",
            bytes.len()
        ))
    })
}

/// Serialize `value` to JSON and encrypt it. Returns the envelope JSON.
pub fn encrypt<T: Serialize + ?Sized>(value: &T, passphrase: &str) -> Result<String> {
    let plaintext = zeroize::Zeroizing::new(serde_json::to_vec(value)?);
    Envelope::seal(&plaintext, passphrase)?.to_json()
}

/// Decrypt an envelope and deserialize the JSON inside.
///
/// Fails with [`Error::Format`] for anything that is not a supported
/// envelope and with [`Error::Authentication`] on tag mismatch.
pub fn decrypt<T: DeserializeOwned>(raw: &str, passphrase: &str) -> Result<T> {
    let plaintext = zeroize::Zeroizing::new(Envelope::parse(raw)?.open(passphrase)?);
    Ok(serde_json::from_slice(&plaintext)?)
}

/// Classify a raw stored value by structure alone. Never decrypts.
///
/// A JSON object carrying the envelope keys is envelope-shaped; it is either
/// `Sealed` (valid, supported) or `Unsupported`. Anything else is `Plain`.
pub fn classify(raw: &str) -> StoredForm {
    let map = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        _ => return StoredForm::Plain,
    };
    if !looks_like_envelope(&map) {
        return StoredForm::Plain;
    }

    match serde_json::from_value::<WireEnvelope>(Value::Object(map))
        .map_err(|e| Error::Format(format!("malformed envelope: {e}")))
        .and_then(Envelope::from_wire)
    {
        Ok(envelope) => StoredForm::Sealed(envelope),
        Err(Error::Format(reason)) => StoredForm::Unsupported(reason),
        Err(other) => StoredForm::Unsupported(other.to_string()),
    }
}

/// True when `raw` is a supported envelope.
pub fn is_envelope(raw: &str) -> bool {
    matches!(classify(raw), StoredForm::Sealed(_))
}

fn looks_like_envelope(map: &Map<String, Value>) -> bool {
    // `v` plus `ct` is enough to claim the value; missing siblings then make
    // it Unsupported rather than plaintext.
    map.contains_key("v") && map.contains_key("ct")
}
