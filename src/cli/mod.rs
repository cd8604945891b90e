//! CLI definitions and command implementations for Lockbox.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Lockbox - encrypted key-value store
#[derive(Parser)]
#[command(name = "lb")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: ~/.config/lockbox/lockbox.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Store a value (encrypted unless --plain)
    Set {
        name: String,
        value: String,

        /// Store without encryption
        #[arg(long)]
        plain: bool,
    },

    /// Print a stored value
    Get { name: String },

    /// Delete a stored value
    Remove { name: String },

    /// Show what each entry is, without decrypting anything
    Inspect,

    /// Delete all encrypted entries and recovery data
    Reset {
        /// Skip the confirmation check
        #[arg(long)]
        yes: bool,
    },

    /// Manage same-device passphrase recovery
    Recovery {
        #[command(subcommand)]
        action: RecoveryAction,
    },

    /// Show config path and current settings
    Config,
}

#[derive(Subcommand)]
pub enum RecoveryAction {
    /// Save recovery data for a user
    Save { user: String },

    /// Recover the passphrase for a user
    Restore { user: String },

    /// Check whether usable recovery data exists
    Status { user: String },

    /// Remove recovery data
    Clear,
}
