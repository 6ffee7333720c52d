use anyhow::{Context, Result, bail};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const SCHEMA_URL: &str =
    "https://raw.githubusercontent.com/nixshelf/nixshelf/main/schema/config.schema.json";

/// How nix itself is invoked
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NixConfig {
    /// The nix binary (name on PATH or absolute path)
    #[serde(default = "default_nix_binary")]
    pub binary: String,
    /// Flake registry entry packages are installed from
    #[serde(default = "default_registry")]
    pub registry: String,
    /// Channel used when none is given or none can be parsed
    #[serde(default = "default_channel")]
    pub default_channel: String,
    /// Pass `--extra-experimental-features "nix-command flakes"`
    #[serde(default = "default_true")]
    pub experimental_features: bool,
    /// `add` on current nix, `install` on releases before 2.25
    #[serde(default = "default_install_verb")]
    pub install_verb: String,
}

fn default_nix_binary() -> String {
    "nix".to_string()
}

fn default_registry() -> String {
    "nixpkgs".to_string()
}

fn default_channel() -> String {
    "nixos-unstable".to_string()
}

fn default_install_verb() -> String {
    "add".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for NixConfig {
    fn default() -> Self {
        Self {
            binary: default_nix_binary(),
            registry: default_registry(),
            default_channel: default_channel(),
            experimental_features: true,
            install_verb: default_install_verb(),
        }
    }
}

/// Package search tool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchConfig {
    #[serde(default = "default_search_binary")]
    pub binary: String,
    #[serde(default = "default_search_limit")]
    pub limit: usize,
}

fn default_search_binary() -> String {
    "nix-search".to_string()
}

fn default_search_limit() -> usize {
    50
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            binary: default_search_binary(),
            limit: default_search_limit(),
        }
    }
}

/// Where tracked installs are persisted
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct TrackingConfig {
    /// Override for the tracking file location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// nixshelf configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ShelfConfig {
    /// JSON Schema reference (optional, for editor support)
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    #[serde(default)]
    pub nix: NixConfig,

    #[serde(default)]
    pub search: SearchConfig,

    #[serde(default)]
    pub tracking: TrackingConfig,
}

impl ShelfConfig {
    /// Get the config directory path
    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .context("Could not determine config directory")
            .map(|d| d.join("nixshelf"))
    }

    /// Get the JSON config file path
    pub fn config_path() -> Result<PathBuf> {
        Self::config_dir().map(|d| d.join("config.json"))
    }

    /// Default location of the tracking file
    pub fn default_tracking_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("dev", "nixshelf", "nixshelf")
            .context("Failed to determine project directories")?;

        Ok(proj_dirs.data_dir().join("tracked.json"))
    }

    /// Tracking file path, honoring the override
    pub fn tracking_path(&self) -> Result<PathBuf> {
        match &self.tracking.path {
            Some(path) => Ok(path.clone()),
            None => Self::default_tracking_path(),
        }
    }

    /// Load config from the default location, or defaults if absent
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).context("Failed to read config file")?;
        let config: ShelfConfig =
            serde_json::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        // Add schema reference if not set
        let mut config = self.clone();
        if config.schema.is_none() {
            config.schema = Some(SCHEMA_URL.to_string());
        }

        let content =
            serde_json::to_string_pretty(&config).context("Failed to serialize config")?;

        std::fs::write(path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Settable keys, for `config set`
    pub fn keys() -> &'static [&'static str] {
        &[
            "nix.binary",
            "nix.registry",
            "nix.default_channel",
            "nix.experimental_features",
            "nix.install_verb",
            "search.binary",
            "search.limit",
            "tracking.path",
        ]
    }

    /// Set a value by dotted key
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "nix.binary" => self.nix.binary = value.to_string(),
            "nix.registry" => self.nix.registry = value.to_string(),
            "nix.default_channel" => {
                crate::nix::validate_channel(value)?;
                self.nix.default_channel = value.to_string();
            }
            "nix.experimental_features" => {
                self.nix.experimental_features = parse_bool(value)?;
            }
            "nix.install_verb" => match value {
                "add" | "install" => self.nix.install_verb = value.to_string(),
                _ => bail!("install_verb must be 'add' or 'install'"),
            },
            "search.binary" => self.search.binary = value.to_string(),
            "search.limit" => {
                self.search.limit = value
                    .parse()
                    .with_context(|| format!("Invalid limit: {}", value))?;
            }
            "tracking.path" => {
                self.tracking.path = if value.is_empty() {
                    None
                } else {
                    Some(PathBuf::from(value))
                };
            }
            _ => bail!(
                "Unknown config key '{}'. Known keys: {}",
                key,
                Self::keys().join(", ")
            ),
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => bail!("Expected a boolean, got '{}'", value),
    }
}
