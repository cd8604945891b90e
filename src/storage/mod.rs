//! Storage module - the medium contract and the encrypting adapter.
//!
//! This module contains:
//! - `StorageMedium`: async string-keyed get/set/remove contract
//! - `MemoryMedium` / `FileMedium`: in-process and on-disk media
//! - `SecureStorage`: encrypts on write, decrypts on read, passes legacy
//!   plaintext through

pub mod medium;
pub mod secure;

pub use medium::{FileMedium, MemoryMedium, StorageMedium};
pub use secure::{EntryStatus, SecureStorage};
