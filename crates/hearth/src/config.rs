//! Configuration loading and validation.
//!
//! The host is configured from a TOML file. A missing file is replaced by
//! the default configuration, which is written to disk for editing.

use anyhow::Context;
use hearth_core::host::HOST_NAMESPACE;
use hearth_core::{directory, VersionCriteria, VersionTriple};
use plugin_system::PluginRequest;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;

fn default_tick_interval() -> u64 {
    50 // 20 ticks per second
}

/// Application configuration loaded from a TOML file.
///
/// # Example
///
/// ```toml
/// [host]
/// name = "hearth"
/// tick_interval_ms = 50
///
/// [plugins]
/// search_paths = ["plugins"]
///
/// [[plugins.load]]
/// name = "greeter"
/// version = "0.1.0"
/// version_policy = "minimum"
///
/// [logging]
/// level = "info"
/// json_format = false
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub host: HostSettings,
    pub plugins: PluginSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSettings {
    pub name: String,
    /// Interval between `host.tick` events in milliseconds (0 to disable)
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginSettings {
    /// Directories searched for plugin files, in priority order
    pub search_paths: Vec<PathBuf>,
    /// Plugins loaded at startup, in load order
    #[serde(default)]
    pub load: Vec<PluginEntry>,
}

/// One `[[plugins.load]]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginEntry {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub version_policy: VersionCriteria,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    #[serde(default)]
    pub json_format: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: HostSettings {
                name: "localhost".to_string(),
                tick_interval_ms: default_tick_interval(),
            },
            plugins: PluginSettings {
                search_paths: vec![PathBuf::from("plugins")],
                load: vec![
                    PluginEntry {
                        name: "greeter".to_string(),
                        version: "0.1.0".to_string(),
                        version_policy: VersionCriteria::Minimum,
                    },
                    PluginEntry {
                        name: "logger".to_string(),
                        version: "0.1.0".to_string(),
                        version_policy: VersionCriteria::Minimum,
                    },
                ],
            },
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
        }
    }
}

impl AppConfig {
    /// Loads the configuration from a TOML file.
    ///
    /// If the file does not exist, the default configuration is written to
    /// `path` and returned.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The loaded or default configuration, or an error if reading, parsing
    /// or writing the file failed.
    ///
    /// # Example
    ///
    /// ```rust
    /// let config = AppConfig::load_from_file(Path::new("hearth.toml")).await?;
    /// config.validate().map_err(|e| anyhow::anyhow!(e))?;
    /// ```
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            let config: AppConfig =
                toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Checks the host name, search paths, plugin entries and log level.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is usable, or a message naming the first
    /// problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.host.name.trim().is_empty() {
            return Err("Host name cannot be empty".to_string());
        }

        if self.plugins.search_paths.is_empty() {
            return Err("At least one plugin search path is required".to_string());
        }
        if self.plugins.search_paths.iter().any(|p| p.as_os_str().is_empty()) {
            return Err("Plugin search paths cannot be empty".to_string());
        }

        let mut seen = HashSet::new();
        for entry in &self.plugins.load {
            if entry.name == HOST_NAMESPACE || directory::validate_owner(&entry.name).is_err() {
                return Err(format!("Invalid plugin name: '{}'", entry.name));
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(format!("Plugin '{}' is listed more than once", entry.name));
            }
            if entry.version.parse::<VersionTriple>().is_err() {
                return Err(format!(
                    "Invalid version '{}' for plugin '{}'",
                    entry.version, entry.name
                ));
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }

    /// The `[[plugins.load]]` entries as load requests, in file order.
    ///
    /// # Returns
    ///
    /// An error naming the plugin whose version string does not parse.
    pub fn to_requests(&self) -> Result<Vec<PluginRequest>, String> {
        self.plugins
            .load
            .iter()
            .map(|entry| {
                let version = entry
                    .version
                    .parse::<VersionTriple>()
                    .map_err(|v| format!("Invalid version '{v}' for plugin '{}'", entry.name))?;
                Ok(PluginRequest::new(&entry.name, version, entry.version_policy))
            })
            .collect()
    }
}
