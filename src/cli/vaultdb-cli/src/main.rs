//! vaultdb CLI - Inspect and migrate the encryption state of a vault database.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vaultdb_cipher::AccessError;
use vaultdb_crypto::DatabaseKey;
use vaultdb_keystore::{DatabaseKeyRepository, KeyStore, KEYSTORE_NAME};
use vaultdb_migration::config::{DEFAULT_DATABASE_NAME, DEFAULT_TEMP_DATABASE_NAME};
use vaultdb_migration::{DatabaseConfig, DatabaseEncryptionManager, EncryptionSetup, SetupOutcome};

// ============================================================================
// CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "vaultdb")]
#[command(about = "vaultdb CLI - Inspect and migrate the encryption state of a vault database")]
#[command(version)]
struct Cli {
    /// Directory holding the database and the key store
    #[arg(long, default_value = "./data", env = "VAULTDB_DATA_DIR")]
    data_dir: PathBuf,

    /// File name of the live database
    #[arg(long, default_value = DEFAULT_DATABASE_NAME, env = "VAULTDB_DATABASE_NAME")]
    database_name: String,

    /// File name of the temp database built by a migration
    #[arg(long, default_value = DEFAULT_TEMP_DATABASE_NAME, env = "VAULTDB_TEMP_DATABASE_NAME")]
    temp_database_name: String,

    /// Where the database keys are kept
    #[arg(long, value_enum, default_value_t = KeyStoreKind::Keyring, env = "VAULTDB_KEY_STORE")]
    key_store: KeyStoreKind,

    /// Service name of the keyring entries
    #[arg(long, default_value = "vaultdb", env = "VAULTDB_KEYRING_SERVICE")]
    keyring_service: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum KeyStoreKind {
    /// OS credential store
    Keyring,
    /// keystore.db in the data directory, keys in clear (development only)
    File,
}

#[derive(Subcommand)]
enum Commands {
    /// Show database files, key slots and access state
    Status,
    /// Check whether a key opens the live database
    Check {
        /// Hex key to try (defaults to the active key)
        #[arg(long, conflicts_with = "plain")]
        key: Option<String>,
        /// Try opening the database as plaintext
        #[arg(long)]
        plain: bool,
    },
    /// Encrypt the database, or re-key it if it is already encrypted
    Encrypt {
        /// Hex key to use (a random key is generated if omitted)
        #[arg(long)]
        key: Option<String>,
        /// Build the temp database but leave promotion to `finish`
        #[arg(long)]
        no_finish: bool,
    },
    /// Decrypt the database back to plaintext
    Decrypt {
        /// Build the temp database but leave promotion to `finish`
        #[arg(long)]
        no_finish: bool,
    },
    /// Promote a pending temp database, or roll back an interrupted one
    Finish,
    /// Damage the pending temp database so the next promotion is canceled
    CorruptTemp,
    /// Print the stored keys (debug only)
    DumpKey,
}

// ============================================================================
// Output Types
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum AccessStatus {
    Ok,
    WrongKey,
    NotFound,
    Corrupted,
    Error,
}

#[derive(Serialize)]
struct StatusOutput {
    data_dir: String,
    database: String,
    database_exists: bool,
    migration_pending: bool,
    promotion_interrupted: bool,
    encrypted: bool,
    has_backup_key: bool,
    access: AccessStatus,
}

#[derive(Serialize)]
struct CheckOutput {
    plain: bool,
    access: AccessStatus,
}

#[derive(Serialize)]
struct MigrateOutput {
    started: bool,
    outcome: Option<&'static str>,
}

#[derive(Serialize)]
struct FinishOutput {
    outcome: &'static str,
}

#[derive(Serialize)]
struct KeyDump {
    key: Option<String>,
    backup_key: Option<String>,
}

// ============================================================================
// Vault Handle
// ============================================================================

/// Key store, manager and setup flow over one data directory.
struct Vault {
    config: DatabaseConfig,
    keys: Arc<dyn DatabaseKeyRepository>,
    manager: DatabaseEncryptionManager,
    setup: EncryptionSetup,
}

impl Vault {
    async fn open(cli: &Cli) -> Result<Self> {
        let config = DatabaseConfig {
            data_dir: cli.data_dir.clone(),
            database_name: cli.database_name.clone(),
            temp_database_name: cli.temp_database_name.clone(),
        };

        let keystore_file = format!("{KEYSTORE_NAME}.db");
        if [&config.database_name, &config.temp_database_name]
            .iter()
            .any(|name| **name == keystore_file)
        {
            bail!("{keystore_file} is reserved for the key store");
        }

        let keys: Arc<dyn DatabaseKeyRepository> = match cli.key_store {
            KeyStoreKind::Keyring => Arc::new(
                KeyStore::open_keyring(&cli.keyring_service)
                    .await
                    .context("Failed to open keyring")?,
            ),
            KeyStoreKind::File => {
                warn!("Using the file key store, keys are kept in clear");
                Arc::new(
                    KeyStore::open(&config.data_dir)
                        .await
                        .context("Failed to open key store")?,
                )
            }
        };

        let manager = DatabaseEncryptionManager::new(config.clone(), Arc::clone(&keys))
            .context("Invalid database configuration")?;
        let setup = EncryptionSetup::new(manager.clone(), Arc::clone(&keys));

        Ok(Self {
            config,
            keys,
            manager,
            setup,
        })
    }

    async fn access(&self, key: Option<&DatabaseKey>) -> AccessStatus {
        match self.manager.check_database_access(key).await {
            Ok(()) => AccessStatus::Ok,
            Err(AccessError::WrongKey) => AccessStatus::WrongKey,
            Err(AccessError::NotFound) => AccessStatus::NotFound,
            Err(AccessError::Corrupted(_)) => AccessStatus::Corrupted,
            Err(e) => {
                warn!(error = %e, "Access check failed");
                AccessStatus::Error
            }
        }
    }
}

fn parse_key(hex_key: &str) -> Result<DatabaseKey> {
    DatabaseKey::from_hex(hex_key).context("Invalid key: expected 64 hex characters")
}

fn outcome_label(outcome: SetupOutcome) -> &'static str {
    match outcome {
        SetupOutcome::Noop => "noop",
        SetupOutcome::Success => "success",
        SetupOutcome::Canceled => "canceled",
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ============================================================================
// Commands
// ============================================================================

async fn cmd_status(vault: &Vault) -> Result<()> {
    let key = vault.keys.key().await?;
    let backup_key = vault.keys.backup_key().await?;

    let database = vault.config.database_path();
    let output = StatusOutput {
        data_dir: vault.config.data_dir().display().to_string(),
        database: database.display().to_string(),
        database_exists: tokio::fs::try_exists(&database).await?,
        migration_pending: tokio::fs::try_exists(vault.config.temp_database_path()).await?,
        promotion_interrupted: vault.config.backup_set().main_exists().await?,
        encrypted: key.is_some(),
        has_backup_key: backup_key.is_some(),
        access: vault.access(key.as_ref()).await,
    };

    print_json(&output)
}

async fn cmd_check(vault: &Vault, key: Option<String>, plain: bool) -> Result<()> {
    let key = match (key, plain) {
        (Some(hex_key), _) => Some(parse_key(&hex_key)?),
        (None, true) => None,
        (None, false) => vault.keys.key().await?,
    };

    let output = CheckOutput {
        plain: key.is_none(),
        access: vault.access(key.as_ref()).await,
    };

    print_json(&output)
}

async fn cmd_migrate(vault: &Vault, new_key: Option<DatabaseKey>, no_finish: bool) -> Result<()> {
    let started = vault
        .setup
        .start(new_key)
        .await
        .context("Failed to build the temp database")?;

    let outcome = if started && !no_finish {
        Some(outcome_label(finish(vault).await?))
    } else {
        None
    };

    print_json(&MigrateOutput { started, outcome })
}

async fn cmd_finish(vault: &Vault) -> Result<()> {
    let outcome = finish(vault).await?;
    print_json(&FinishOutput {
        outcome: outcome_label(outcome),
    })
}

async fn finish(vault: &Vault) -> Result<SetupOutcome> {
    vault
        .setup
        .finish()
        .await
        .context("Failed to finish the migration")
}

async fn cmd_corrupt_temp(vault: &Vault) -> Result<()> {
    let path = vault.config.temp_database_path();
    if !tokio::fs::try_exists(&path).await? {
        bail!("No temp database at {}", path.display());
    }

    let mut bytes = tokio::fs::read(&path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    for byte in bytes.iter_mut().take(1024) {
        *byte ^= 0xFF;
    }
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;

    warn!(path = %path.display(), "Temp database corrupted");
    println!("Corrupted {}", path.display());
    Ok(())
}

async fn cmd_dump_key(vault: &Vault) -> Result<()> {
    warn!("Printing database keys in clear");

    let key = vault.keys.key().await?;
    let backup_key = vault.keys.backup_key().await?;

    print_json(&KeyDump {
        key: key.map(|k| k.to_hex().to_string()),
        backup_key: backup_key.map(|k| k.to_hex().to_string()),
    })
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let vault = Vault::open(&cli).await?;

    match cli.command {
        Commands::Status => cmd_status(&vault).await,
        Commands::Check { key, plain } => cmd_check(&vault, key, plain).await,
        Commands::Encrypt { key, no_finish } => {
            let key = match key {
                Some(hex_key) => parse_key(&hex_key)?,
                None => DatabaseKey::generate(),
            };
            cmd_migrate(&vault, Some(key), no_finish).await
        }
        Commands::Decrypt { no_finish } => cmd_migrate(&vault, None, no_finish).await,
        Commands::Finish => cmd_finish(&vault).await,
        Commands::CorruptTemp => cmd_corrupt_temp(&vault).await,
        Commands::DumpKey => cmd_dump_key(&vault).await,
    }
}
