//! Configuration loader using figment.
//!
//! # Configuration Priority (lowest to highest)
//!
//! 1. Built-in defaults
//! 2. Programmatic values passed to [`ConfigLoader::merge`]
//! 3. Main config file (`ipcbus.toml` or `config.toml`)
//! 4. Profile-specific config file (`ipcbus.{profile}.toml`)
//! 5. Environment variables (`IPCBUS_*`)
//!
//! YAML files (`ipcbus.yaml`, `ipcbus.yml`, ...) are searched as well when the
//! `yaml-config` feature is enabled.
//!
//! # Environment Variable Mapping
//!
//! Variables use the `IPCBUS_` prefix with `__` separating nested keys:
//!
//! - `IPCBUS_BUS__REQUEST_TIMEOUT_MS=250` → `bus.request_timeout_ms = 250`
//! - `IPCBUS_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//!
//! # Example
//!
//! ```rust,ignore
//! use ipcbus_runtime::config::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .file("./ipcbus.toml")
//!     .load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, trace};

use super::error::{ConfigError, ConfigResult};
use super::schema::IpcBusConfig;
use super::validation::validate_config;

/// Environment variable selecting the profile.
pub const PROFILE_ENV: &str = "IPCBUS_PROFILE";

/// Configuration profile for environment-specific settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Custom(String),
}

impl Profile {
    /// Returns the profile name as used in file names.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Parses a profile name, accepting the `dev` and `prod` short forms.
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Reads the profile from `IPCBUS_PROFILE`, defaulting to development.
    pub fn from_env() -> Self {
        std::env::var(PROFILE_ENV)
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Multi-source configuration loader.
pub struct ConfigLoader {
    figment: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a loader using the profile from the environment.
    pub fn new() -> Self {
        Self {
            figment: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    /// Sets the configuration profile.
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.profile = Profile::parse(profile.as_ref());
        self
    }

    /// Adds a search path for configuration files.
    ///
    /// When no search path is given, the current directory and the user
    /// config directory (`~/.config/ipcbus` on Linux) are searched.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Loads exactly this file instead of searching.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Disables `IPCBUS_*` environment overrides.
    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges configuration values programmatically, below files and environment.
    pub fn merge(mut self, config: IpcBusConfig) -> Self {
        self.figment = self.figment.merge(Serialized::defaults(config));
        self
    }

    /// Loads the configuration without validating it.
    pub fn load(self) -> ConfigResult<IpcBusConfig> {
        let profile = self.profile.clone();
        let config: IpcBusConfig = self.build_figment()?.extract()?;

        debug!(
            profile = %profile,
            request_timeout_ms = config.bus.request_timeout_ms,
            logging_level = %config.logging.level,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Loads the configuration and rejects invalid values.
    pub fn load_validated(self) -> ConfigResult<IpcBusConfig> {
        let config = self.load()?;
        validate_config(&config)?;
        Ok(config)
    }

    fn build_figment(mut self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(IpcBusConfig::default()));
        figment = figment.merge(std::mem::take(&mut self.figment));

        if let Some(path) = &self.config_file {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
            info!(path = %path.display(), "Loading configuration file");
            figment = merge_config_file(figment, path)?;
        } else {
            figment = self.load_config_files(figment)?;
        }

        if self.load_env {
            trace!("Loading environment variables with IPCBUS_ prefix");
            figment = figment.merge(Env::prefixed("IPCBUS_").split("__"));
        }

        Ok(figment)
    }

    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        let mut paths = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd);
        }
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("ipcbus"));
        }
        paths
    }

    /// Merges the first base file found, then its profile variant next to it.
    fn load_config_files(&self, mut figment: Figment) -> ConfigResult<Figment> {
        let mut base_names: Vec<&str> = Vec::new();
        #[cfg(feature = "toml-config")]
        base_names.extend(["ipcbus.toml", "config.toml"]);
        #[cfg(feature = "yaml-config")]
        base_names.extend(["ipcbus.yaml", "ipcbus.yml", "config.yaml", "config.yml"]);

        for search_path in self.resolve_search_paths() {
            for base_name in &base_names {
                let base_path = search_path.join(base_name);
                if !base_path.exists() {
                    continue;
                }
                info!(path = %base_path.display(), "Loading configuration file");
                figment = merge_config_file(figment, &base_path)?;

                if let Some((stem, ext)) = base_name.rsplit_once('.') {
                    let profile_path =
                        search_path.join(format!("{stem}.{}.{ext}", self.profile.as_str()));
                    if profile_path.exists() {
                        debug!(path = %profile_path.display(), "Loading profile-specific config");
                        figment = merge_config_file(figment, &profile_path)?;
                    }
                }
                return Ok(figment);
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(figment)
    }
}

/// Merges one file, dispatching on its extension.
fn merge_config_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    match ext {
        #[cfg(feature = "toml-config")]
        "toml" => Ok(figment.merge(Toml::file(path))),
        #[cfg(feature = "yaml-config")]
        "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
        _ => Err(ConfigError::ParseError(format!(
            "Unsupported or disabled configuration file format: .{ext}"
        ))),
    }
}

/// Loads and validates configuration from the default locations.
pub fn load_config() -> ConfigResult<IpcBusConfig> {
    ConfigLoader::new().load_validated()
}
