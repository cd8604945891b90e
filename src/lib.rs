//! Lockbox - client-side secure storage.
//!
//! Provides:
//! - Passphrase-derived AES-GCM envelopes for persisted application state
//! - A storage adapter that encrypts on write and passes legacy plaintext through
//! - An inactivity lock that forgets the passphrase when the user goes idle
//! - Lock/unlock relaying between contexts sharing one store
//! - Same-device passphrase recovery bound to an authenticated user id
//!
//! The passphrase lives only in memory, in one [`PassphraseSession`] per
//! context.

pub mod config;
pub mod crypto;
pub mod error;
pub mod lock;
pub mod recovery;
pub mod session;
pub mod storage;
pub mod tab_sync;
pub mod vault;

// Re-export main types
pub use config::Config;
pub use crypto::{Envelope, StoredForm};
pub use error::{Error, Result};
pub use lock::{ActivityHub, ActivityKind, ActivitySource, InactivityLock, LockCause, LockState};
pub use recovery::RecoveryManager;
pub use session::PassphraseSession;
pub use storage::{EntryStatus, FileMedium, MemoryMedium, SecureStorage, StorageMedium};
pub use tab_sync::{LockSignal, SyncChannel, TabSync};
pub use vault::Vault;
