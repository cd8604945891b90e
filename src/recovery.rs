//! Recovery manager - lets an authenticated user get the passphrase back on
//! the same device.
//!
//! The wrapping key is `hex(SHA-256(user_id ":" origin))`. No user secret
//! goes into it, so this is a same-device convenience: anyone who can read
//! the medium and knows the user id and origin can unwrap the passphrase.

use crate::config::RecoveryConfig;
use crate::crypto::envelope;
use crate::error::Result;
use crate::storage::StorageMedium;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Medium key holding the (single) recovery record.
pub const RECOVERY_KEY: &str = "lockbox.recovery";

/// Default record lifetime.
pub const DEFAULT_RECOVERY_TTL_DAYS: i64 = 30;

/// Stored record: `{"userId","encryptedPassphrase","timestamp"}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryRecord {
    pub user_id: String,
    /// Envelope JSON wrapping [`RecoveryPayload`]
    pub encrypted_passphrase: String,
    /// Unix milliseconds
    pub timestamp: i64,
}

impl RecoveryRecord {
    pub fn is_expired(&self, ttl: chrono::Duration, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.timestamp) > ttl.num_milliseconds()
    }
}

#[derive(Serialize)]
struct RecoveryPayloadRef<'a> {
    passphrase: &'a str,
    timestamp: i64,
}

#[derive(Deserialize)]
struct RecoveryPayload {
    passphrase: String,
}

pub struct RecoveryManager {
    medium: Arc<dyn StorageMedium>,
    origin: String,
    ttl: chrono::Duration,
}

impl RecoveryManager {
    pub fn new(medium: Arc<dyn StorageMedium>, origin: impl Into<String>) -> Self {
        Self {
            medium,
            origin: origin.into(),
            ttl: chrono::Duration::days(DEFAULT_RECOVERY_TTL_DAYS),
        }
    }

    pub fn from_config(medium: Arc<dyn StorageMedium>, config: &RecoveryConfig) -> Self {
        Self::new(medium, config.origin_host()).with_ttl(config.ttl())
    }

    pub fn with_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    fn recovery_key(&self, user_id: &str) -> Zeroizing<String> {
        let digest = Sha256::digest(format!("{}:{}", user_id, self.origin).as_bytes());
        Zeroizing::new(hex::encode(digest))
    }

    /// Wrap `passphrase` for `user_id`, replacing any existing record.
    pub async fn save_recovery_data(&self, user_id: &str, passphrase: &str) -> Result<()> {
        let timestamp = Utc::now().timestamp_millis();
        let key = self.recovery_key(user_id);
        let encrypted_passphrase = envelope::encrypt(
            &RecoveryPayloadRef {
                passphrase,
                timestamp,
            },
            &key,
        )?;

        let record = RecoveryRecord {
            user_id: user_id.to_string(),
            encrypted_passphrase,
            timestamp,
        };
        self.medium
            .set_item(RECOVERY_KEY, &serde_json::to_string(&record)?)
            .await?;

        info!("Saved recovery data");
        Ok(())
    }

    /// Same as [`save_recovery_data`](Self::save_recovery_data); call after a
    /// passphrase change.
    pub async fn update_recovery_data(&self, user_id: &str, new_passphrase: &str) -> Result<()> {
        self.save_recovery_data(user_id, new_passphrase).await
    }

    /// Unwrap the stored passphrase for `user_id`. `None` when recovery is
    /// unavailable (no record, other user, expired, undecryptable).
    pub async fn recover_passphrase(&self, user_id: &str) -> Result<Option<Zeroizing<String>>> {
        let Some(record) = self.valid_record(user_id).await? else {
            return Ok(None);
        };

        let key = self.recovery_key(user_id);
        match envelope::decrypt::<RecoveryPayload>(&record.encrypted_passphrase, &key) {
            Ok(payload) => {
                info!("Recovered passphrase from recovery data");
                Ok(Some(Zeroizing::new(payload.passphrase)))
            }
            Err(e) => {
                warn!("Recovery data cannot be decrypted: {}", e);
                Ok(None)
            }
        }
    }

    /// True when a non-expired record for `user_id` exists.
    pub async fn has_recovery_data(&self, user_id: &str) -> Result<bool> {
        Ok(self.valid_record(user_id).await?.is_some())
    }

    pub async fn clear_recovery_data(&self) -> Result<()> {
        self.medium.remove_item(RECOVERY_KEY).await?;
        debug!("Cleared recovery data");
        Ok(())
    }

    /// Load the record if it belongs to `user_id` and is still fresh.
    /// Expired and unparseable records are purged.
    async fn valid_record(&self, user_id: &str) -> Result<Option<RecoveryRecord>> {
        let Some(raw) = self.medium.get_item(RECOVERY_KEY).await? else {
            return Ok(None);
        };

        let record: RecoveryRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!("Discarding unreadable recovery data: {}", e);
                self.clear_recovery_data().await?;
                return Ok(None);
            }
        };

        if record.is_expired(self.ttl, Utc::now().timestamp_millis()) {
            info!("Recovery data expired; removing it");
            self.clear_recovery_data().await?;
            return Ok(None);
        }

        if record.user_id != user_id {
            debug!("Recovery data belongs to another user");
            return Ok(None);
        }

        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryMedium;

    fn manager() -> (RecoveryManager, MemoryMedium) {
        let medium = MemoryMedium::new();
        let manager = RecoveryManager::new(Arc::new(medium.clone()), "app.example.com");
        (manager, medium)
    }

    async fn backdate(medium: &MemoryMedium, days: i64) -> Result<()> {
        let raw = medium.get_item(RECOVERY_KEY).await?.unwrap();
        let mut record: RecoveryRecord = serde_json::from_str(&raw)?;
        record.timestamp -= chrono::Duration::days(days).num_milliseconds();
        medium
            .set_item(RECOVERY_KEY, &serde_json::to_string(&record)?)
            .await
    }

    #[tokio::test]
    async fn test_save_and_recover() -> Result<()> {
        let (manager, medium) = manager();

        manager.save_recovery_data("user-1", "p1").await?;

        let raw = medium.get_item(RECOVERY_KEY).await?.unwrap();
        assert!(!raw.contains("p1\""));
        let record: RecoveryRecord = serde_json::from_str(&raw)?;
        assert_eq!(record.user_id, "user-1");
        assert!(envelope::is_envelope(&record.encrypted_passphrase));

        let recovered = manager.recover_passphrase("user-1").await?;
        assert_eq!(recovered.as_deref().map(String::as_str), Some("p1"));
        assert!(manager.has_recovery_data("user-1").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_wire_field_names() -> Result<()> {
        let (manager, medium) = manager();
        manager.save_recovery_data("user-1", "p1").await?;

        let raw = medium.get_item(RECOVERY_KEY).await?.unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw)?;
        assert!(value.get("userId").is_some());
        assert!(value.get("encryptedPassphrase").is_some());
        assert!(value.get("timestamp").is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_other_user_gets_nothing() -> Result<()> {
        let (manager, _) = manager();
        manager.save_recovery_data("user-1", "p1").await?;

        assert!(manager.recover_passphrase("user-2").await?.is_none());
        assert!(!manager.has_recovery_data("user-2").await?);
        // The owner's record is untouched
        assert!(manager.has_recovery_data("user-1").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_expired_record_is_purged() -> Result<()> {
        let (manager, medium) = manager();
        manager.save_recovery_data("user-1", "p1").await?;
        backdate(&medium, 31).await?;

        assert!(manager.recover_passphrase("user-1").await?.is_none());
        assert!(!manager.has_recovery_data("user-1").await?);
        assert!(medium.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_record_within_ttl_is_valid() -> Result<()> {
        let (manager, medium) = manager();
        manager.save_recovery_data("user-1", "p1").await?;
        backdate(&medium, 29).await?;

        assert!(manager.recover_passphrase("user-1").await?.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_custom_ttl() -> Result<()> {
        let medium = MemoryMedium::new();
        let manager = RecoveryManager::new(Arc::new(medium.clone()), "app.example.com")
            .with_ttl(chrono::Duration::days(1));
        manager.save_recovery_data("user-1", "p1").await?;
        backdate(&medium, 2).await?;

        assert!(!manager.has_recovery_data("user-1").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_other_origin_cannot_decrypt() -> Result<()> {
        let medium = MemoryMedium::new();
        let here = RecoveryManager::new(Arc::new(medium.clone()), "app.example.com");
        let elsewhere = RecoveryManager::new(Arc::new(medium.clone()), "evil.example.com");
        here.save_recovery_data("user-1", "p1").await?;

        assert!(elsewhere.recover_passphrase("user-1").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_update_overwrites() -> Result<()> {
        let (manager, medium) = manager();
        manager.save_recovery_data("user-1", "p1").await?;

        manager.update_recovery_data("user-1", "p2").await?;

        assert_eq!(medium.len(), 1);
        let recovered = manager.recover_passphrase("user-1").await?;
        assert_eq!(recovered.as_deref().map(String::as_str), Some("p2"));
        Ok(())
    }

    #[tokio::test]
    async fn test_clear_and_corrupt_record() -> Result<()> {
        let (manager, medium) = manager();
        manager.save_recovery_data("user-1", "p1").await?;
        manager.clear_recovery_data().await?;
        assert!(!manager.has_recovery_data("user-1").await?);

        medium.set_item(RECOVERY_KEY, "{broken").await?;
        assert!(manager.recover_passphrase("user-1").await?.is_none());
        assert!(medium.is_empty());
        Ok(())
    }

    #[test]
    fn test_recovery_key_is_deterministic() {
        let (manager, _) = manager();
        assert_eq!(*manager.recovery_key("u"), *manager.recovery_key("u"));
        assert_ne!(*manager.recovery_key("u"), *manager.recovery_key("v"));
        assert_eq!(manager.recovery_key("u").len(), 64);
    }
}
