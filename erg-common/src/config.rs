//! Configuration loading and root folder resolution
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. `ERG_ROOT_FOLDER` environment variable
//! 3. TOML config file (`root_folder` key)
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing or unreadable TOML file never aborts startup; it logs a
//! warning and falls through to the next tier.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming the root folder
pub const ROOT_FOLDER_ENV: &str = "ERG_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "ergtally.db";

/// Settings for the external image-understanding service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OracleConfig {
    /// API key (database setting and ERG_ORACLE_API_KEY take priority)
    pub api_key: Option<String>,
    /// Endpoint base URL
    pub base_url: Option<String>,
    /// Model identifier
    pub model: Option<String>,
    /// Upper bound on one oracle call, in seconds
    pub timeout_secs: Option<u64>,
    /// Oracle request budget
    pub requests_per_minute: Option<u32>,
}

/// Contents of `config.toml`
///
/// Every field is optional so partial files stay valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub port: Option<u16>,
    #[serde(default)]
    pub oracle: OracleConfig,
}

/// Resolves the root folder holding the database
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    config_path: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            cli_arg: None,
            config_path: None,
        }
    }

    /// Highest-priority override from the command line
    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    /// Use an explicit config file instead of the platform search path
    pub fn with_config_path(mut self, path: PathBuf) -> Self {
        self.config_path = Some(path);
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            debug!(module = %self.module_name, "Root folder from command line");
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                debug!(module = %self.module_name, "Root folder from {}", ROOT_FOLDER_ENV);
                return PathBuf::from(path);
            }
        }

        let config_path = self.config_path.clone().or_else(find_config_file);
        if let Some(config_path) = config_path {
            match load_toml_config(&config_path) {
                Ok(config) => {
                    if let Some(root) = config.root_folder {
                        debug!(module = %self.module_name, "Root folder from {}", config_path.display());
                        return root;
                    }
                }
                Err(e) => warn!("Ignoring config file {}: {}", config_path.display(), e),
            }
        }

        default_root_folder()
    }
}

/// Creates the root folder and locates the database inside it
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder)?;
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }

    pub fn database_exists(&self) -> bool {
        self.database_path().exists()
    }
}

/// Locate the first existing config file on this platform
///
/// Linux checks `~/.config/ergtally/config.toml` then
/// `/etc/ergtally/config.toml`; other platforms only the user config dir.
pub fn find_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("ergtally").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/ergtally/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Load the TOML config, or defaults when no file exists
pub fn load_config() -> TomlConfig {
    match find_config_file() {
        Some(path) => match load_toml_config(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("Failed to load {}: {} (using defaults)", path.display(), e);
                TomlConfig::default()
            }
        },
        None => TomlConfig::default(),
    }
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    toml::from_str(&content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
}

/// Write a TOML config atomically (temp file + rename)
///
/// The file holds an API key, so on Unix it is restricted to the owner.
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&temp_path, path)?;
    Ok(())
}

/// OS-dependent default root folder
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("ergtally"))
        .unwrap_or_else(|| PathBuf::from("./ergtally_data"))
}
