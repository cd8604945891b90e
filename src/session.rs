//! Passphrase session - the in-memory holder of the current passphrase.
//!
//! One session exists per execution context and is shared by `Arc` handle.
//! The passphrase is never written to any storage medium.

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Holds the passphrase, or nothing when locked.
#[derive(Default)]
pub struct PassphraseSession {
    secret: RwLock<Option<Zeroizing<String>>>,
}

impl PassphraseSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session ready to be shared between components.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Replace the held passphrase. The previous value is wiped.
    pub fn set_passphrase(&self, passphrase: impl Into<String>) {
        *self.secret.write() = Some(Zeroizing::new(passphrase.into()));
    }

    /// Drop the held passphrase. Returns whether one was held.
    pub fn clear_passphrase(&self) -> bool {
        self.secret.write().take().is_some()
    }

    pub fn has_passphrase(&self) -> bool {
        self.secret.read().is_some()
    }

    /// A wiped-on-drop copy of the passphrase for a single operation.
    pub fn passphrase(&self) -> Option<Zeroizing<String>> {
        self.secret.read().clone()
    }
}

impl fmt::Debug for PassphraseSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassphraseSession")
            .field("held", &self.has_passphrase())
            .finish()
    }
}
