//! Persisted deployer configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{DeployerError, Result};
use crate::runner::DEFAULT_COMMAND_TIMEOUT;

pub const CONFIG_DIR_NAME: &str = ".github-auto-deployer";
pub const CONFIG_FILE_NAME: &str = "config.json";

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployerConfig {
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smtp: Option<SmtpConfig>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub folders: Vec<FolderConfig>,
}

/// GitHub App credentials. Only the webhook secret is used by the server.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitHubConfig {
    #[serde(default)]
    pub app_id: i64,
    #[serde(default)]
    pub private_key_path: String,
    #[serde(default)]
    pub webhook_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub from: String,
    pub to: String,
}

impl SmtpConfig {
    pub fn is_configured(&self) -> bool {
        !self.host.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// One watched working copy as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub command: String,
    pub branch: String,
    pub repo_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_timeout_secs: Option<u64>,
    #[serde(default)]
    pub notify_on_success: bool,
}

impl FolderConfig {
    pub fn command_timeout(&self) -> Duration {
        self.command_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_COMMAND_TIMEOUT)
    }

    pub fn validate(&self) -> Result<()> {
        if self.command_timeout_secs == Some(0) {
            return Err(DeployerError::ConfigError(format!(
                "command_timeout_secs for '{}' must be greater than 0",
                self.path.display()
            )));
        }
        Ok(())
    }
}

/// `~/.github-auto-deployer/config.json`, or a relative fallback without a home dir.
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(CONFIG_DIR_NAME)
        .join(CONFIG_FILE_NAME)
}

impl DeployerConfig {
    /// Load and parse the configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let config_str = fs::read_to_string(path).map_err(|e| {
            DeployerError::ConfigError(format!(
                "Failed to read config file '{}': {} (run setup first)",
                path.display(),
                e
            ))
        })?;

        let config: DeployerConfig = serde_json::from_str(&config_str).map_err(|e| {
            DeployerError::ConfigError(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Ok(config)
    }

    /// Like [`DeployerConfig::load`], but a missing file yields the defaults.
    /// Used by the registration commands, which create the file on first save.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }

        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Environment overrides applied on top of the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(secret) = std::env::var("DEPLOYER_WEBHOOK_SECRET") {
            if !secret.is_empty() {
                self.github.webhook_secret = secret;
            }
        }
    }

    pub fn validate_for_server(&self) -> Result<()> {
        if self.github.webhook_secret.is_empty() {
            return Err(DeployerError::ConfigError(
                "github.webhook_secret must be set".to_string(),
            ));
        }
        self.folders.iter().try_for_each(FolderConfig::validate)
    }

    pub fn add_folder(&mut self, folder: FolderConfig) -> Result<()> {
        folder.validate()?;
        if self.folders.iter().any(|f| f.path == folder.path) {
            return Err(DeployerError::DuplicateTarget(folder.path));
        }
        self.folders.push(folder);
        Ok(())
    }

    pub fn remove_folder(&mut self, path: &Path) -> Result<FolderConfig> {
        let index = self
            .folders
            .iter()
            .position(|f| f.path == path)
            .ok_or_else(|| DeployerError::UnknownTarget(path.to_path_buf()))?;
        Ok(self.folders.remove(index))
    }
}
