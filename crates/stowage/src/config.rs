use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".stowage.toml";

/// Get the config file path for a directory.
pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

/// Publisher configuration, loaded from `.stowage.toml` and merged with CLI
/// flags. Every field is optional; flags win over the file, the file wins
/// over built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Registry defaults.
    #[serde(default)]
    registry: RegistryConfig,
    /// OCI provider binary defaults.
    #[serde(default)]
    provider: ProviderConfig,
    /// Login defaults.
    #[serde(default)]
    login: LoginConfigFile,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RegistryConfig {
    /// Repository the inventory lives under.
    repository: Option<String>,
    /// Inventory image tag.
    tag: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ProviderConfig {
    /// Provider binary name or path.
    binary: Option<String>,
    /// Per-invocation timeout in seconds.
    timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LoginConfigFile {
    /// OAuth2 issuer base URL.
    issuer: Option<String>,
    /// OAuth2 client identifier.
    client_id: Option<String>,
    /// Issuer family: `csp` or `uaa`.
    idp_type: Option<String>,
    /// Organization to log in to.
    org_id: Option<String>,
}

impl Config {
    /// Create a config with nothing set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Default repository for inventory operations.
    pub fn repository(&self) -> Option<&str> {
        self.registry.repository.as_deref()
    }

    /// Default inventory image tag.
    pub fn tag(&self) -> Option<&str> {
        self.registry.tag.as_deref()
    }

    /// Provider binary name or path.
    pub fn provider_binary(&self) -> Option<&str> {
        self.provider.binary.as_deref()
    }

    /// Provider per-invocation timeout.
    pub fn provider_timeout_secs(&self) -> Option<u64> {
        self.provider.timeout_secs
    }

    /// Default login issuer.
    pub fn issuer(&self) -> Option<&str> {
        self.login.issuer.as_deref()
    }

    /// Default OAuth2 client id.
    pub fn client_id(&self) -> Option<&str> {
        self.login.client_id.as_deref()
    }

    /// Default issuer family.
    pub fn idp_type(&self) -> Option<&str> {
        self.login.idp_type.as_deref()
    }

    /// Default organization.
    pub fn org_id(&self) -> Option<&str> {
        self.login.org_id.as_deref()
    }

    /// Merge with another config; `other` takes precedence field by field.
    pub fn merge(&self, other: &Config) -> Config {
        Config {
            registry: RegistryConfig {
                repository: other
                    .registry
                    .repository
                    .clone()
                    .or_else(|| self.registry.repository.clone()),
                tag: other.registry.tag.clone().or_else(|| self.registry.tag.clone()),
            },
            provider: ProviderConfig {
                binary: other
                    .provider
                    .binary
                    .clone()
                    .or_else(|| self.provider.binary.clone()),
                timeout_secs: other.provider.timeout_secs.or(self.provider.timeout_secs),
            },
            login: LoginConfigFile {
                issuer: other.login.issuer.clone().or_else(|| self.login.issuer.clone()),
                client_id: other
                    .login
                    .client_id
                    .clone()
                    .or_else(|| self.login.client_id.clone()),
                idp_type: other
                    .login
                    .idp_type
                    .clone()
                    .or_else(|| self.login.idp_type.clone()),
                org_id: other.login.org_id.clone().or_else(|| self.login.org_id.clone()),
            },
        }
    }
}

/// Load configuration from a directory's `.stowage.toml`. A missing file is
/// an empty config, not an error.
pub fn load_config(dir: &Path) -> Result<Config> {
    let path = config_path(dir);
    if !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

/// Load the effective configuration: the home-directory file overlaid by
/// the working-directory file.
pub fn load_default_config() -> Result<Config> {
    let home = dirs::home_dir()
        .map(|dir| load_config(&dir))
        .transpose()?
        .unwrap_or_default();
    let cwd = std::env::current_dir()
        .ok()
        .map(|dir| load_config(&dir))
        .transpose()?
        .unwrap_or_default();
    Ok(home.merge(&cwd))
}
