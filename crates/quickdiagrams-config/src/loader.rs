use std::path::{Path, PathBuf};

use quickdiagrams_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

const DATABASE_PATH_ENV: &str = "QUICKDIAGRAMS_DATABASE_PATH";

/// Reads `AppConfig` from YAML or TOML files.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Default config location: `~/.quickdiagrams/config.yml`.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".quickdiagrams")
            .join("config.yml")
    }

    /// Load the file at `path`, choosing the format by extension.
    pub fn load(path: &Path) -> Result<AppConfig> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config = Self::parse(&contents, ext)?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Load the default config file if it exists, otherwise use defaults.
    pub fn load_default() -> Result<AppConfig> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            debug!("no config at {}, using defaults", path.display());
            Ok(AppConfig::default())
        }
    }

    pub fn parse(contents: &str, ext: &str) -> Result<AppConfig> {
        match ext {
            "yml" | "yaml" => serde_yaml::from_str(contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}"))),
            "toml" => toml::from_str(contents)
                .map_err(|e| Error::Config(format!("TOML parse error: {e}"))),
            other => Err(Error::Config(format!(
                "unsupported config extension: {other}"
            ))),
        }
    }

    /// Apply environment overrides from the process environment.
    pub fn apply_env_overrides(config: &mut AppConfig) {
        Self::apply_overrides_from(config, |key| std::env::var(key).ok());
    }

    pub fn apply_overrides_from<F>(config: &mut AppConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup(DATABASE_PATH_ENV).filter(|p| !p.is_empty()) {
            debug!("{DATABASE_PATH_ENV} overrides database path");
            config.database.path = Some(PathBuf::from(path));
        }
    }
}
