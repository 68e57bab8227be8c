//! Configuration loading and root folder resolution
//!
//! Startup never fails because of configuration: a missing or unreadable
//! TOML file logs a warning and falls back to compiled defaults.
//!
//! Root folder priority order:
//! 1. `LDK_ROOT_FOLDER` environment variable
//! 2. `LDK_ROOT` environment variable
//! 3. `root_folder` in `~/.config/lotdesk/<module>.toml`
//! 4. OS-dependent compiled default

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "lotdesk.db";

/// Logging section of the TOML config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file path (stdout when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_file: None,
        }
    }
}

/// Per-module TOML bootstrap configuration
///
/// Everything else is stored in the database `settings` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_folder: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Auto.dev API key, copied into settings on first start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autodev_api_key: Option<String>,

    /// Dealership ZIP code used as the market search origin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dealer_zip: Option<String>,
}

/// Compiled-in defaults for the current platform
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        let root_folder = if cfg!(target_os = "linux") {
            // ~/.local/share/lotdesk (or /var/lib/lotdesk for system-wide)
            dirs::data_local_dir()
                .map(|d| d.join("lotdesk"))
                .unwrap_or_else(|| PathBuf::from("/var/lib/lotdesk"))
        } else if cfg!(target_os = "macos") {
            dirs::data_dir()
                .map(|d| d.join("lotdesk"))
                .unwrap_or_else(|| PathBuf::from("/Library/Application Support/lotdesk"))
        } else if cfg!(target_os = "windows") {
            dirs::data_local_dir()
                .map(|d| d.join("lotdesk"))
                .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\lotdesk"))
        } else {
            PathBuf::from("./lotdesk_data")
        };

        Self {
            root_folder,
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

/// Resolves the root folder for one module
pub struct RootFolderResolver {
    module_name: String,
}

impl RootFolderResolver {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
        }
    }

    /// Path of this module's TOML file, if a config directory exists
    pub fn config_file_path(&self) -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("lotdesk").join(format!("{}.toml", self.module_name)))
    }

    /// Load this module's TOML config, or defaults when missing/invalid
    pub fn load_config(&self) -> TomlConfig {
        let Some(path) = self.config_file_path() else {
            return TomlConfig::default();
        };
        if !path.exists() {
            debug!("No config file at {}, using defaults", path.display());
            return TomlConfig::default();
        }
        match load_toml_config(&path) {
            Ok(config) => {
                info!("Loaded config file {}", path.display());
                config
            }
            Err(e) => {
                warn!("Ignoring config file {}: {}", path.display(), e);
                TomlConfig::default()
            }
        }
    }

    /// Resolve the root folder following the priority order
    pub fn resolve(&self) -> PathBuf {
        if let Ok(path) = std::env::var("LDK_ROOT_FOLDER") {
            if !path.is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Ok(path) = std::env::var("LDK_ROOT") {
            if !path.is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Some(root) = self.load_config().root_folder {
            return root;
        }

        CompiledDefaults::for_current_platform().root_folder
    }
}

/// Prepares the resolved root folder
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }

    /// Create the root folder (and parents) if missing
    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            info!("Created root folder: {}", self.root_folder.display());
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }

    pub fn database_exists(&self) -> bool {
        self.database_path().exists()
    }
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
}

/// Write a TOML config atomically (temp file + rename)
///
/// The file holds an API key, so on Unix it is created with mode 0600.
pub fn write_toml_config(config: &TomlConfig, target: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp_path = target.with_extension("toml.tmp");
    std::fs::write(&temp_path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&temp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    std::fs::rename(&temp_path, target)?;
    Ok(())
}
