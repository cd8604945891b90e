//! Vault - one execution context's secure storage stack.
//!
//! Wires a [`PassphraseSession`] into the storage adapter, the idle lock,
//! optional multi-tab sync and the recovery manager.

use crate::config::Config;
use crate::crypto::envelope::{self, StoredForm};
use crate::error::{Error, Result};
use crate::lock::{InactivityLock, LockState};
use crate::recovery::RecoveryManager;
use crate::session::PassphraseSession;
use crate::storage::{EntryStatus, SecureStorage, StorageMedium};
use crate::tab_sync::{SyncChannel, TabSync};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct Vault {
    storage: SecureStorage,
    lock: InactivityLock,
    recovery: RecoveryManager,
    store_names: Vec<String>,
    sync: Option<TabSync>,
}

impl Vault {
    /// Open the stack over `medium`. Starts locked when any of
    /// `store_names` already holds encrypted data.
    pub async fn open(
        medium: Arc<dyn StorageMedium>,
        config: &Config,
        store_names: &[&str],
    ) -> Result<Self> {
        let session = PassphraseSession::shared();
        let storage = SecureStorage::new(Arc::clone(&medium), Arc::clone(&session));

        let mut initial = LockState::Unlocked;
        for name in store_names {
            if storage.status(name).await? == EntryStatus::Encrypted {
                initial = LockState::Locked;
                break;
            }
        }

        let lock = InactivityLock::new(session, &config.lock, initial);
        let recovery = RecoveryManager::from_config(medium, &config.recovery);
        info!(
            "Opened vault with {} stores ({:?})",
            store_names.len(),
            initial
        );

        Ok(Self {
            storage,
            lock,
            recovery,
            store_names: store_names.iter().map(|s| s.to_string()).collect(),
            sync: None,
        })
    }

    pub fn storage(&self) -> &SecureStorage {
        &self.storage
    }

    pub fn session(&self) -> &Arc<PassphraseSession> {
        self.storage.session()
    }

    pub fn lock_timer(&self) -> &InactivityLock {
        &self.lock
    }

    pub fn recovery(&self) -> &RecoveryManager {
        &self.recovery
    }

    pub fn store_names(&self) -> &[String] {
        &self.store_names
    }

    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }

    /// Start relaying lock transitions over `channel`. Replaces any earlier
    /// membership.
    pub fn join_sync(&mut self, channel: &SyncChannel) -> &TabSync {
        self.sync.insert(TabSync::join(channel, &self.lock))
    }

    pub fn sync(&self) -> Option<&TabSync> {
        self.sync.as_ref()
    }

    /// Check `passphrase` against the first encrypted store. With nothing
    /// encrypted yet, any passphrase is accepted.
    pub async fn verify_passphrase(&self, passphrase: &str) -> Result<bool> {
        for name in &self.store_names {
            let Some(raw) = self.storage.medium().get_item(name).await? else {
                continue;
            };
            if let StoredForm::Sealed(sealed) = envelope::classify(&raw) {
                return match sealed.open(passphrase) {
                    Ok(_) => Ok(true),
                    Err(Error::Authentication) => Ok(false),
                    Err(e) => Err(e),
                };
            }
        }
        Ok(true)
    }

    /// Verify and then unlock. A wrong passphrase leaves the vault locked.
    pub async fn unlock(&self, passphrase: &str) -> Result<()> {
        if !self.verify_passphrase(passphrase).await? {
            warn!("Unlock rejected: wrong passphrase");
            return Err(Error::Authentication);
        }
        self.lock.unlock(passphrase);
        Ok(())
    }

    /// Unlock with the passphrase held in recovery data for `user_id`.
    /// Returns `false` when recovery is unavailable.
    pub async fn unlock_with_recovery(&self, user_id: &str) -> Result<bool> {
        let Some(passphrase) = self.recovery.recover_passphrase(user_id).await? else {
            return Ok(false);
        };
        match self.unlock(&passphrase).await {
            Ok(()) => Ok(true),
            Err(Error::Authentication) => {
                warn!("Recovered passphrase no longer matches stored data");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub fn lock(&self) {
        self.lock.lock();
    }

    /// Destructive reset: delete every encrypted store, drop recovery data
    /// and forget the passphrase. Plaintext stores are kept. Returns how
    /// many stores were deleted.
    pub async fn reset(&self) -> Result<usize> {
        let mut removed = 0;
        for name in &self.store_names {
            match self.storage.status(name).await? {
                EntryStatus::Encrypted | EntryStatus::Unsupported => {
                    self.storage.remove_item(name).await?;
                    debug!("Removed encrypted store '{}'", name);
                    removed += 1;
                }
                EntryStatus::Plain | EntryStatus::Missing => {}
            }
        }

        self.recovery.clear_recovery_data().await?;
        self.lock.lock();
        warn!("Vault reset: {} encrypted stores removed", removed);
        Ok(removed)
    }

    /// Stop the idle timer, deregister activity listeners and leave the sync
    /// channel.
    pub fn teardown(&self) {
        self.lock.teardown();
        if let Some(sync) = &self.sync {
            sync.shutdown();
        }
    }
}

impl Drop for Vault {
    fn drop(&mut self) {
        self.teardown();
    }
}
