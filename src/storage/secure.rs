//! SecureStorage - transparent encryption in front of a [`StorageMedium`].
//!
//! Reads route on the structural shape of the stored value:
//!
//! | stored value          | passphrase held | result                      |
//! |-----------------------|-----------------|-----------------------------|
//! | absent                | any             | `None`                      |
//! | plaintext (legacy)    | any             | value unchanged             |
//! | envelope              | no              | `None` + warning            |
//! | envelope              | yes             | decrypted value or error    |
//! | unsupported envelope  | any             | `Error::Format`             |
//!
//! `None` is ambiguous on its own: check [`PassphraseSession::has_passphrase`]
//! before treating it as "empty".

use super::medium::StorageMedium;
use crate::crypto::envelope::{self, StoredForm};
use crate::error::{Error, Result};
use crate::session::PassphraseSession;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// What a stored entry is, without decrypting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Missing,
    Plain,
    Encrypted,
    Unsupported,
}

#[derive(Clone)]
pub struct SecureStorage {
    medium: Arc<dyn StorageMedium>,
    session: Arc<PassphraseSession>,
}

impl SecureStorage {
    pub fn new(medium: Arc<dyn StorageMedium>, session: Arc<PassphraseSession>) -> Self {
        Self { medium, session }
    }

    pub fn session(&self) -> &Arc<PassphraseSession> {
        &self.session
    }

    pub fn medium(&self) -> &Arc<dyn StorageMedium> {
        &self.medium
    }

    /// Read `name`, decrypting when needed.
    pub async fn get_item(&self, name: &str) -> Result<Option<String>> {
        let Some(raw) = self.medium.get_item(name).await? else {
            return Ok(None);
        };

        match envelope::classify(&raw) {
            StoredForm::Plain => Ok(Some(raw)),
            StoredForm::Unsupported(reason) => Err(Error::Format(reason)),
            StoredForm::Sealed(sealed) => {
                let Some(passphrase) = self.session.passphrase() else {
                    warn!("Entry '{}' is encrypted but no passphrase is held", name);
                    return Ok(None);
                };
                let plaintext = Zeroizing::new(sealed.open(&passphrase)?);
                // Stored strings come back verbatim; other JSON is re-serialized
                let value = match serde_json::from_slice::<Value>(&plaintext)? {
                    Value::String(text) => text,
                    other => serde_json::to_string(&other)?,
                };
                debug!("Decrypted entry '{}'", name);
                Ok(Some(value))
            }
        }
    }

    /// Write `name`. Encrypts when a passphrase is held, otherwise stores
    /// the value as-is.
    pub async fn set_item(&self, name: &str, value: &str) -> Result<()> {
        match self.session.passphrase() {
            Some(passphrase) => {
                let sealed = envelope::encrypt(value, &passphrase)?;
                self.medium.set_item(name, &sealed).await?;
                debug!("Stored encrypted entry '{}'", name);
            }
            None => {
                warn!(
                    "No passphrase held; storing entry '{}' without encryption",
                    name
                );
                self.medium.set_item(name, value).await?;
            }
        }
        Ok(())
    }

    /// Delete `name` regardless of lock state.
    pub async fn remove_item(&self, name: &str) -> Result<()> {
        self.medium.remove_item(name).await
    }

    /// Inspect `name` without decrypting it.
    pub async fn status(&self, name: &str) -> Result<EntryStatus> {
        let status = match self.medium.get_item(name).await? {
            None => EntryStatus::Missing,
            Some(raw) => match envelope::classify(&raw) {
                StoredForm::Plain => EntryStatus::Plain,
                StoredForm::Sealed(_) => EntryStatus::Encrypted,
                StoredForm::Unsupported(_) => EntryStatus::Unsupported,
            },
        };
        Ok(status)
    }
}
