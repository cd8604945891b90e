//! Command implementations for the Lockbox CLI.
//!
//! Main commands:
//! - set / get / remove: read and write entries through the secure adapter
//! - inspect: classify entries without decrypting them
//! - reset: destructive escape hatch when the passphrase is lost
//! - recovery: same-device passphrase recovery

use super::RecoveryAction;
use anyhow::{bail, Context, Result};
use colored::Colorize;
use lockbox::config::Config;
use lockbox::recovery::RECOVERY_KEY;
use lockbox::{EntryStatus, Error, FileMedium, StorageMedium, StoredForm, Vault};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Environment variable read instead of prompting.
pub const PASSPHRASE_ENV: &str = "LOCKBOX_PASSPHRASE";

/// Prompt for a passphrase (input hidden)
fn prompt_passphrase(prompt: &str) -> Result<Zeroizing<String>> {
    print!("{}", prompt);
    io::stdout().flush()?;

    let passphrase =
        Zeroizing::new(rpassword::read_password().context("Cannot read passphrase")?);

    if passphrase.is_empty() {
        bail!("Passphrase cannot be empty");
    }

    Ok(passphrase)
}

fn passphrase_from_env() -> Option<Zeroizing<String>> {
    std::env::var(PASSPHRASE_ENV)
        .ok()
        .filter(|p| !p.is_empty())
        .map(Zeroizing::new)
}

/// Passphrase for existing data
fn read_passphrase() -> Result<Zeroizing<String>> {
    match passphrase_from_env() {
        Some(passphrase) => Ok(passphrase),
        None => prompt_passphrase("Passphrase: "),
    }
}

/// Passphrase for a store that has no encrypted data yet
fn new_passphrase() -> Result<Zeroizing<String>> {
    if let Some(passphrase) = passphrase_from_env() {
        return Ok(passphrase);
    }

    println!("\n{}", "Encryption Setup".cyan().bold());
    println!("Enter a passphrase to encrypt your store.");
    println!(
        "{}",
        "Without it (or recovery data) encrypted entries cannot be read.".yellow()
    );

    let passphrase = prompt_passphrase("Passphrase: ")?;
    let confirm = prompt_passphrase("Confirm passphrase: ")?;

    if *passphrase != *confirm {
        bail!("Passphrases do not match");
    }

    Ok(passphrase)
}

/// Open the vault over the configured store file. Every entry except the
/// recovery record is a managed store.
async fn open_vault(config: &Config) -> Result<Vault> {
    let medium = FileMedium::new(&config.store_path);
    let names: Vec<String> = medium
        .keys()
        .await
        .with_context(|| format!("Cannot read store: {}", config.store_path.display()))?
        .into_iter()
        .filter(|name| name != RECOVERY_KEY)
        .collect();
    let names: Vec<&str> = names.iter().map(String::as_str).collect();

    Ok(Vault::open(Arc::new(medium), config, &names).await?)
}

async fn unlock(vault: &Vault, passphrase: &str) -> Result<()> {
    match vault.unlock(passphrase).await {
        Ok(()) => Ok(()),
        Err(Error::Authentication) => bail!("Wrong passphrase"),
        Err(e) => Err(e.into()),
    }
}

/// The recovery record is managed by `lb recovery`, never as a plain entry
fn check_entry_name(name: &str) -> Result<()> {
    if name == RECOVERY_KEY {
        bail!(
            "'{}' is reserved for recovery data; use `lb recovery` instead",
            name
        );
    }
    Ok(())
}

/// Store `value` under `name`
pub async fn set(config: &Config, name: &str, value: &str, plain: bool) -> Result<()> {
    check_entry_name(name)?;
    let vault = open_vault(config).await?;

    if !plain {
        let passphrase = if vault.is_locked() {
            read_passphrase()?
        } else {
            new_passphrase()?
        };
        unlock(&vault, &passphrase).await?;
    }

    vault.storage().set_item(name, value).await?;

    let form = if vault.session().has_passphrase() {
        "encrypted"
    } else {
        "plaintext"
    };
    println!("  {} Stored '{}' ({})", "✓".green(), name.bold(), form);
    Ok(())
}

/// Print the value stored under `name`
pub async fn get(config: &Config, name: &str) -> Result<()> {
    let vault = open_vault(config).await?;

    match vault.storage().status(name).await? {
        EntryStatus::Missing => bail!("No entry named '{}'", name),
        EntryStatus::Encrypted => unlock(&vault, &read_passphrase()?).await?,
        EntryStatus::Plain | EntryStatus::Unsupported => {}
    }

    match vault.storage().get_item(name).await? {
        Some(value) => println!("{}", value),
        None => bail!("Entry '{}' is encrypted and the store is locked", name),
    }
    Ok(())
}

/// Delete `name`
pub async fn remove(config: &Config, name: &str) -> Result<()> {
    check_entry_name(name)?;
    let vault = open_vault(config).await?;
    vault.storage().remove_item(name).await?;
    println!("  {} Removed '{}'", "✓".green(), name.bold());
    Ok(())
}

/// List entries and their form
pub async fn inspect(config: &Config) -> Result<()> {
    let medium = FileMedium::new(&config.store_path);
    let names = medium.keys().await?;

    if names.is_empty() {
        println!("{}", "Store is empty.".yellow());
        return Ok(());
    }

    println!(
        "\n{} {} entries in {}:\n",
        "Found".green(),
        names.len().to_string().green().bold(),
        config.store_path.display().to_string().dimmed()
    );

    for name in &names {
        let Some(raw) = medium.get_item(name).await? else {
            continue;
        };

        let detail = if name == RECOVERY_KEY {
            "recovery record".cyan().to_string()
        } else {
            match lockbox::crypto::classify(&raw) {
                StoredForm::Sealed(envelope) => {
                    let summary = envelope.summary();
                    format!(
                        "{} v{} {}, {} bytes",
                        "encrypted".green(),
                        summary.version,
                        summary.algorithm,
                        summary.ciphertext_len
                    )
                }
                StoredForm::Unsupported(reason) => format!("{} ({})", "unsupported".red(), reason),
                StoredForm::Plain => format!("{}, {} bytes", "plaintext".yellow(), raw.len()),
            }
        };

        println!("  {} [{}]", name.white().bold(), detail);
    }

    println!();
    Ok(())
}

/// Delete every encrypted entry and the recovery record
pub async fn reset(config: &Config, yes: bool) -> Result<()> {
    if !yes {
        bail!("Reset permanently deletes encrypted entries; re-run with --yes");
    }

    let vault = open_vault(config).await?;
    let removed = vault.reset().await?;

    println!(
        "  {} Removed {} encrypted entries and recovery data",
        "✓".green(),
        removed
    );
    Ok(())
}

pub async fn recovery(config: &Config, action: RecoveryAction) -> Result<()> {
    let vault = open_vault(config).await?;

    match action {
        RecoveryAction::Save { user } => {
            let passphrase = read_passphrase()?;
            if !vault.verify_passphrase(&passphrase).await? {
                bail!("Wrong passphrase");
            }
            vault
                .recovery()
                .save_recovery_data(&user, &passphrase)
                .await?;
            println!(
                "  {} Saved recovery data for '{}' (valid {} days)",
                "✓".green(),
                user,
                config.recovery.ttl_days
            );
        }
        RecoveryAction::Restore { user } => {
            let Some(passphrase) = vault.recovery().recover_passphrase(&user).await? else {
                println!("{}", "Recovery unavailable.".yellow());
                return Ok(());
            };
            if !vault.verify_passphrase(&passphrase).await? {
                bail!("Recovery data does not match the current store");
            }
            eprintln!("{}", "Recovered passphrase:".cyan());
            println!("{}", passphrase.as_str());
        }
        RecoveryAction::Status { user } => {
            if vault.recovery().has_recovery_data(&user).await? {
                println!("  {} Recovery data available for '{}'", "✓".green(), user);
            } else {
                println!("{}", "No usable recovery data.".yellow());
            }
        }
        RecoveryAction::Clear => {
            vault.recovery().clear_recovery_data().await?;
            println!("  {} Cleared recovery data", "✓".green());
        }
    }

    Ok(())
}

/// Print config location and values
pub fn show_config(config_path: &Path, config: &Config) -> Result<()> {
    let exists = config_path.exists();
    println!(
        "{} {}{}",
        "Config:".cyan(),
        config_path.display(),
        if exists { "" } else { " (not created, defaults)" }
    );
    println!();
    print!(
        "{}",
        toml::to_string_pretty(config).context("Cannot serialize config to TOML")?
    );
    Ok(())
}
