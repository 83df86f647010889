//! legacyvault - Client-side encryption core for the LegacyGuard vault
//!
//! Usage:
//!   legacyvault init                   - Write a starter config file
//!   legacyvault status                 - Show effective configuration
//!   legacyvault encrypt <value>        - Encrypt a value
//!   legacyvault decrypt <ct> <iv>      - Decrypt a value
//!   legacyvault rotate                 - Advance the key rotation epoch
//!   legacyvault store <get|set|...>    - Work with the encrypted local store

use clap::{Parser, Subcommand};
use legacyvault::{
    config::Config,
    crypto::{generate_secure_token, sha256_hex, FieldCipher, KeyManager},
    store::SecureStore,
    Error, Result,
};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "legacyvault")]
#[command(author = "legacyvault Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Client-side encryption core for the LegacyGuard vault")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "~/.config/legacyvault/config.json")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter configuration file
    Init {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// Show the effective configuration and store summary
    Status,

    /// Encrypt a value and print the payload as JSON
    Encrypt {
        /// Value to encrypt (read from stdin when omitted)
        value: Option<String>,

        /// Key context (field name); defaults to the master context
        #[arg(long)]
        context: Option<String>,
    },

    /// Decrypt a value
    Decrypt {
        /// Base64 ciphertext
        ciphertext: String,

        /// Base64 IV from the matching encrypt call
        iv: String,

        /// Key context used at encryption time
        #[arg(long)]
        context: Option<String>,
    },

    /// Print the SHA-256 fingerprint of a value
    Hash {
        /// Value to hash
        value: String,
    },

    /// Generate a random hex token
    Token {
        /// Token length in bytes (hex output is twice as long)
        #[arg(long, default_value_t = 32)]
        length: usize,
    },

    /// Advance the key rotation epoch and persist it
    Rotate,

    /// Encrypted local store operations
    #[command(subcommand)]
    Store(StoreCommands),
}

#[derive(Subcommand)]
enum StoreCommands {
    /// Encrypt and store a value (parsed as JSON, else stored as a string)
    Set {
        /// Logical key
        key: String,

        /// Value to store
        value: String,
    },

    /// Decrypt and print a stored value
    Get {
        /// Logical key
        key: String,
    },

    /// Remove a stored value
    Remove {
        /// Logical key
        key: String,
    },

    /// List stored keys
    List,

    /// Remove every entry in the store's namespace
    Clear,
}

fn main() {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");

    // Expand ~ in config path
    let config_path = expand_tilde(&cli.config);

    // Run the command
    if let Err(e) = run_command(cli.command, &config_path) {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run_command(command: Commands, config_path: &PathBuf) -> Result<()> {
    match command {
        Commands::Init { force } => cmd_init(config_path, force),

        Commands::Status => cmd_status(config_path),

        Commands::Encrypt { value, context } => cmd_encrypt(config_path, value, context),

        Commands::Decrypt {
            ciphertext,
            iv,
            context,
        } => cmd_decrypt(config_path, &ciphertext, &iv, context),

        Commands::Hash { value } => {
            println!("{}", sha256_hex(value.as_bytes()));
            Ok(())
        }

        Commands::Token { length } => {
            println!("{}", generate_secure_token(length));
            Ok(())
        }

        Commands::Rotate => cmd_rotate(config_path),

        Commands::Store(store_cmd) => run_store_command(store_cmd, config_path),
    }
}

fn run_store_command(command: StoreCommands, config_path: &PathBuf) -> Result<()> {
    let mut config = load_config(config_path)?;
    let cipher = resolve_cipher(&mut config)?;
    config.ensure_directories()?;
    let store = SecureStore::open_with_namespace(&config.store.path, cipher, &config.store.namespace)?;

    match command {
        StoreCommands::Set { key, value } => {
            // Store well-formed JSON as-is, anything else as a plain string
            let value: serde_json::Value = serde_json::from_str(&value)
                .unwrap_or(serde_json::Value::String(value));
            store.set_item(&key, &value)?;
            info!("stored '{}'", key);
            Ok(())
        }

        StoreCommands::Get { key } => match store.get_item::<serde_json::Value>(&key) {
            Some(value) => {
                println!("{}", serde_json::to_string_pretty(&value)?);
                Ok(())
            }
            None => Err(Error::EntryNotFound(key)),
        },

        StoreCommands::Remove { key } => {
            store.remove_item(&key)?;
            info!("removed '{}'", key);
            Ok(())
        }

        StoreCommands::List => {
            let mut keys = store.keys()?;
            keys.sort();
            for key in keys {
                println!("{}", key);
            }
            Ok(())
        }

        StoreCommands::Clear => store.clear(),
    }
}

fn cmd_init(config_path: &PathBuf, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "config file {:?} already exists (use --force to overwrite)",
            config_path
        )));
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut config = Config::from_env()?;
    config.ensure_directories()?;
    // Seeds live in the environment, never in the file we write
    config.encryption.master_seed = None;
    config.save(config_path)?;

    info!("wrote config to {:?}", config_path);
    info!(
        "set {} in the environment before encrypting anything",
        legacyvault::config::SEED_ENV_VAR
    );
    Ok(())
}

fn cmd_status(config_path: &PathBuf) -> Result<()> {
    let config = load_config(config_path)?;

    println!("encryption enabled: {}", config.encryption.enabled);
    println!("kdf iterations:     {}", config.encryption.kdf_iterations);
    println!("key epoch:          {}", config.encryption.key_epoch);
    println!("seed configured:    {}", config.has_seed());
    println!("dev seed opt-in:    {}", config.encryption.allow_dev_seed);
    println!("store path:         {:?}", config.store.path);
    println!("store namespace:    {}", config.store.namespace);

    if config.store.path.exists() {
        let db = sled::open(&config.store.path)?;
        let entries = db
            .scan_prefix(config.store.namespace.as_bytes())
            .keys()
            .count();
        println!("store entries:      {}", entries);
    } else {
        println!("store entries:      (store not created yet)");
    }

    Ok(())
}

fn cmd_encrypt(
    config_path: &PathBuf,
    value: Option<String>,
    context: Option<String>,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    let cipher = resolve_cipher(&mut config)?;

    let value = match value {
        Some(value) => value,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    let payload = cipher.encrypt(&value, context.as_deref())?;
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn cmd_decrypt(
    config_path: &PathBuf,
    ciphertext: &str,
    iv: &str,
    context: Option<String>,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    let cipher = resolve_cipher(&mut config)?;

    let plaintext = cipher.decrypt(ciphertext, iv, context.as_deref())?;
    println!("{}", plaintext);
    Ok(())
}

fn cmd_rotate(config_path: &PathBuf) -> Result<()> {
    let mut config = load_config(config_path)?;

    if !config.encryption.enabled {
        return Err(Error::Config(
            "cannot rotate keys while encryption is disabled".to_string(),
        ));
    }

    ensure_seed(&mut config)?;
    let manager = KeyManager::new(&config.encryption)?;
    let epoch = manager.rotate_keys()?;

    config.encryption.key_epoch = epoch;
    // Never write a prompted or environment-supplied seed back to disk;
    // only a seed already present in the file survives the rewrite
    let seed_from_file = Config::load_raw(config_path)
        .ok()
        .and_then(|c| c.encryption.master_seed);
    let mut to_save = config.clone();
    to_save.encryption.master_seed = seed_from_file;
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    to_save.save(config_path)?;

    warn!(
        "rotated to epoch {}; entries written under earlier epochs need migration before they \
         decrypt again",
        epoch
    );
    Ok(())
}

/// Load the config file, or fall back to environment-only defaults
fn load_config(config_path: &PathBuf) -> Result<Config> {
    if config_path.exists() {
        Config::load(config_path)
    } else {
        Config::from_env()
    }
}

/// Prompt for a seed when the config and environment provide none
fn ensure_seed(config: &mut Config) -> Result<()> {
    if config.encryption.enabled && !config.has_seed() && !config.encryption.allow_dev_seed {
        let seed = rpassword::prompt_password("Enter master seed: ")?;
        config.encryption.master_seed = Some(seed);
    }
    Ok(())
}

/// Build the cipher for the current configuration, prompting for a seed if
/// necessary
fn resolve_cipher(config: &mut Config) -> Result<Arc<FieldCipher>> {
    if !config.encryption.enabled {
        return Ok(Arc::new(FieldCipher::disabled()));
    }

    ensure_seed(config)?;
    Ok(Arc::new(FieldCipher::from_config(&config.encryption)?))
}

fn expand_tilde(path: &PathBuf) -> PathBuf {
    if path.starts_with("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(path.strip_prefix("~").unwrap());
        }
    }
    path.clone()
}
