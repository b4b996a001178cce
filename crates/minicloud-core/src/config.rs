//! Configuration module for Minicloud.
//!
//! Two files are involved:
//! - `config.yaml` - application settings (server, sync defaults, logging),
//!   with loading, validation, defaults and a builder for programmatic use.
//! - `folders.json` - the list of synchronized folder pairs in the format
//!   shared with other Minicloud clients, managed by [`FolderStore`].

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::domain::{DomainError, SyncFolderConfig};

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for Minicloud.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub sync: SyncSettings,
    pub logging: LoggingConfig,
}

/// Remote server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL of the server; the API lives at `<url>/api.php`.
    pub url: String,
    /// Account login.
    pub login: String,
    /// Seconds to wait for a reply to a non-transfer request.
    pub request_timeout_secs: u64,
    /// Seconds to wait for a connection to be established.
    pub connect_timeout_secs: u64,
}

/// Defaults applied to every synchronized folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Cipher configuration for uploads; empty uploads in plain.
    pub encryption: String,
    /// Location of the folder list.
    pub folders_file: PathBuf,
    /// Derive the clock-skew offset from the server's reported time.
    pub use_server_time: bool,
    /// Prefix prepended to the password before deriving the key-encryption key.
    pub password_salt: String,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Write the configuration as YAML, creating parent directories.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/minicloud/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        config_dir().join("config.yaml")
    }

    /// URL of the API endpoint.
    pub fn api_url(&self) -> String {
        format!("{}/api.php", self.server.url.trim_end_matches('/'))
    }
}

fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("minicloud")
}

// ---------------------------------------------------------------------------
// Config::default()
// ---------------------------------------------------------------------------

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost/minicloud".to_string(),
            login: String::new(),
            request_timeout_secs: 10,
            connect_timeout_secs: 15,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            encryption: String::new(),
            folders_file: config_dir().join("folders.json"),
            use_server_time: true,
            password_salt: String::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"server.url"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- server ---
        if !(self.server.url.starts_with("http://") || self.server.url.starts_with("https://")) {
            errors.push(ValidationError {
                field: "server.url".into(),
                message: format!("must be an http(s) URL: '{}'", self.server.url),
            });
        }
        if self.server.request_timeout_secs == 0 {
            errors.push(ValidationError {
                field: "server.request_timeout_secs".into(),
                message: "must be greater than 0".into(),
            });
        }
        if self.server.connect_timeout_secs == 0 {
            errors.push(ValidationError {
                field: "server.connect_timeout_secs".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- sync ---
        if !self.sync.encryption.is_empty() {
            if let Err(e) = self.sync.encryption.parse::<crate::crypto::CipherSpec>() {
                errors.push(ValidationError {
                    field: "sync.encryption".into(),
                    message: e.to_string(),
                });
            }
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use minicloud_core::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .server_url("https://cloud.example.com")
///     .server_login("alice")
///     .sync_encryption("AES/CBC/PKCS5Padding")
///     .build();
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self::default()
    }

    // --- server ---

    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.config.server.url = url.into();
        self
    }

    pub fn server_login(mut self, login: impl Into<String>) -> Self {
        self.config.server.login = login.into();
        self
    }

    pub fn server_request_timeout_secs(mut self, seconds: u64) -> Self {
        self.config.server.request_timeout_secs = seconds;
        self
    }

    // --- sync ---

    pub fn sync_encryption(mut self, config: impl Into<String>) -> Self {
        self.config.sync.encryption = config.into();
        self
    }

    pub fn sync_folders_file(mut self, path: PathBuf) -> Self {
        self.config.sync.folders_file = path;
        self
    }

    pub fn sync_use_server_time(mut self, enabled: bool) -> Self {
        self.config.sync.use_server_time = enabled;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }
}

// ---------------------------------------------------------------------------
// FolderStore
// ---------------------------------------------------------------------------

/// Persistent list of synchronized folders
#[derive(Debug, Clone)]
pub struct FolderStore {
    path: PathBuf,
    folders: Vec<SyncFolderConfig>,
}

impl FolderStore {
    /// Loads the list at `path`; a missing file yields an empty list
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let folders = match std::fs::read_to_string(path) {
            Ok(content) if content.trim().is_empty() => Vec::new(),
            Ok(content) => serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        Ok(Self {
            path: path.to_path_buf(),
            folders,
        })
    }

    /// Writes the list back to where it was loaded from
    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(&self.folders)?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn folders(&self) -> &[SyncFolderConfig] {
        &self.folders
    }

    pub fn get(&self, local: &Path) -> Option<&SyncFolderConfig> {
        self.folders.iter().find(|f| f.local == local)
    }

    /// Adds a folder pair; each local folder may appear only once
    pub fn add(&mut self, folder: SyncFolderConfig) -> Result<(), DomainError> {
        folder.validate()?;
        if self.get(&folder.local).is_some() {
            return Err(DomainError::ValidationFailed(format!(
                "folder already configured: {}",
                folder.local.display()
            )));
        }
        self.folders.push(folder);
        Ok(())
    }

    pub fn remove(&mut self, local: &Path) -> Option<SyncFolderConfig> {
        let index = self.folders.iter().position(|f| f.local == local)?;
        Some(self.folders.remove(index))
    }

    /// Records a completed pass for `local`
    ///
    /// # Returns
    /// `false` when no such folder is configured
    pub fn update_last(&mut self, local: &Path, last: i64) -> bool {
        match self.folders.iter_mut().find(|f| f.local == local) {
            Some(folder) => {
                folder.last = last;
                true
            }
            None => false,
        }
    }
}
