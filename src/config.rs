//! Configuration management for legacyvault

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default PBKDF2-HMAC-SHA256 iteration count (current OWASP guidance)
pub const DEFAULT_KDF_ITERATIONS: u32 = 600_000;

/// Lowest iteration count accepted by [`Config::validate`]
pub const MIN_KDF_ITERATIONS: u32 = 100_000;

/// Default namespace prefix for secure store entries
pub const DEFAULT_STORE_NAMESPACE: &str = "secure_";

/// Environment variable holding the master seed
pub const SEED_ENV_VAR: &str = "LEGACYVAULT_MASTER_SEED";

/// Encryption configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Whether field encryption is active. Disabling it is a development
    /// convenience and turns every cipher into a logged plaintext passthrough.
    pub enabled: bool,

    /// Master seed. Usually left unset in the file and supplied via the
    /// LEGACYVAULT_MASTER_SEED environment variable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_seed: Option<String>,

    /// PBKDF2-HMAC-SHA256 iteration count
    pub kdf_iterations: u32,

    /// Current key rotation epoch. Bumped by `rotate_keys`; entries written
    /// under an older epoch need a migration before they decrypt again.
    #[serde(default)]
    pub key_epoch: u32,

    /// Opt in to a fixed built-in seed when no master seed is configured.
    /// Local development only; every use is logged as a warning.
    #[serde(default)]
    pub allow_dev_seed: bool,
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        EncryptionConfig {
            enabled: true,
            master_seed: None,
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
            key_epoch: 0,
            allow_dev_seed: false,
        }
    }
}

/// Secure store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the sled database holding encrypted entries
    pub path: PathBuf,

    /// Key prefix separating this store's entries from other subsystems
    /// sharing the database
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

fn default_namespace() -> String {
    DEFAULT_STORE_NAMESPACE.to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Encryption configuration
    pub encryption: EncryptionConfig,

    /// Secure store configuration
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Path to the data directory
    #[serde(skip)]
    pub data_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("legacyvault");

        Config {
            encryption: EncryptionConfig::default(),
            store: StoreConfig {
                path: data_dir.join("store"),
                namespace: DEFAULT_STORE_NAMESPACE.to_string(),
            },
            logging: LoggingConfig::default(),
            data_dir,
        }
    }
}

impl Config {
    /// Load configuration from a file (YAML or JSON), with environment
    /// variable substitution and overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let content = std::fs::read_to_string(path_ref)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        // Perform environment variable substitution
        let content = Self::substitute_env_vars(&content);

        let mut config = Self::parse(path_ref, &content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file exactly as written: no `${VAR}` substitution, no
    /// environment overrides, no validation. Used when the on-disk contents
    /// themselves matter, e.g. to rewrite the file without baking in values
    /// from the environment.
    pub fn load_raw<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let content = std::fs::read_to_string(path_ref)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        Self::parse(path_ref, &content)
    }

    /// Parse config content, detecting the format by file extension
    fn parse(path_ref: &Path, content: &str) -> Result<Self> {
        let config: Config = if path_ref.extension().and_then(|s| s.to_str()) == Some("yaml")
            || path_ref.extension().and_then(|s| s.to_str()) == Some("yml")
        {
            serde_yaml::from_str(content)
                .map_err(|e| Error::Config(format!("Failed to parse YAML config: {}", e)))?
        } else {
            serde_json::from_str(content)
                .map_err(|e| Error::Config(format!("Failed to parse JSON config: {}", e)))?
        };

        let mut config = config;

        // Set data_dir if not specified
        if config.data_dir == PathBuf::new() {
            config.data_dir = dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("legacyvault");
        }

        Ok(config)
    }

    /// Substitute environment variables in config content
    /// Supports ${VAR_NAME} syntax
    fn substitute_env_vars(content: &str) -> String {
        let mut result = content.to_string();

        let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

        for cap in re.captures_iter(content) {
            let full_match = &cap[0];
            let var_name = &cap[1];

            if let Ok(value) = std::env::var(var_name) {
                result = result.replace(full_match, &value);
            }
        }

        result
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(seed) = std::env::var(SEED_ENV_VAR) {
            let seed = seed.trim().to_string();
            if !seed.is_empty() {
                self.encryption.master_seed = Some(seed);
            }
        }

        if let Ok(iterations) = std::env::var("LEGACYVAULT_KDF_ITERATIONS") {
            if let Ok(n) = iterations.trim().parse::<u32>() {
                self.encryption.kdf_iterations = n;
            }
        }

        if let Ok(path) = std::env::var("LEGACYVAULT_STORE_PATH") {
            let path = path.trim();
            if !path.is_empty() {
                self.store.path = PathBuf::from(path);
            }
        }
    }

    /// Create a new config from environment variables only (for init without
    /// an existing config file)
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file (format determined by extension)
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path_ref = path.as_ref();

        let content = if path_ref.extension().and_then(|s| s.to_str()) == Some("yaml")
            || path_ref.extension().and_then(|s| s.to_str()) == Some("yml")
        {
            serde_yaml::to_string(self)
                .map_err(|e| Error::Config(format!("Failed to serialize config to YAML: {}", e)))?
        } else {
            serde_json::to_string_pretty(self)
                .map_err(|e| Error::Config(format!("Failed to serialize config to JSON: {}", e)))?
        };

        std::fs::write(path_ref, content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate the configuration
    ///
    /// The master seed itself is not checked here: interactive callers may
    /// still prompt for one. `KeyManager::new` is where a missing seed
    /// becomes a hard failure.
    pub fn validate(&self) -> Result<()> {
        if self.encryption.enabled && self.encryption.kdf_iterations < MIN_KDF_ITERATIONS {
            return Err(Error::InvalidConfig(format!(
                "kdf_iterations must be at least {}",
                MIN_KDF_ITERATIONS
            )));
        }

        if self.store.namespace.is_empty() {
            return Err(Error::InvalidConfig(
                "store namespace must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether a usable master seed is configured
    pub fn has_seed(&self) -> bool {
        self.encryption
            .master_seed
            .as_deref()
            .map(|s| !s.is_empty())
            .unwrap_or(false)
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        if let Some(parent) = self.store.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(!config.has_seed());
    }

    #[test]
    fn test_has_seed() {
        let mut config = Config::default();
        assert!(!config.has_seed());
        config.encryption.master_seed = Some(String::new());
        assert!(!config.has_seed());
        config.encryption.master_seed = Some("unit-test-seed".to_string());
        assert!(config.has_seed());
    }

    #[test]
    fn test_low_iteration_count_rejected() {
        let mut config = Config::default();
        config.encryption.kdf_iterations = MIN_KDF_ITERATIONS - 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_disabled_encryption_skips_iteration_floor() {
        let mut config = Config::default();
        config.encryption.enabled = false;
        config.encryption.kdf_iterations = 1_000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_namespace_rejected() {
        let mut config = Config::default();
        config.store.namespace = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_roundtrip_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.encryption.allow_dev_seed = true;
        config.encryption.key_epoch = 3;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.encryption.key_epoch, 3);
        assert!(loaded.encryption.allow_dev_seed);
        assert_eq!(loaded.store.namespace, DEFAULT_STORE_NAMESPACE);
    }
}
