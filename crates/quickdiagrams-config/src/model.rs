use std::path::PathBuf;

use serde::{Deserialize, Serialize};

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_DB_FILE: &str = "quickdiagrams.db";

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Directory for on-disk state. Defaults to `~/.quickdiagrams/data`.
    pub data_dir: Option<PathBuf>,
    /// Tracing filter used when `RUST_LOG` is not set, e.g. `info` or `quickdiagrams_db=debug`.
    pub log_level: Option<String>,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Explicit database file. Defaults to `<data_dir>/quickdiagrams.db`.
    pub path: Option<PathBuf>,
    /// Use a private in-memory store instead of a file.
    pub in_memory: bool,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            in_memory: false,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl AppConfig {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".quickdiagrams")
                .join("data")
        })
    }

    /// Resolved database file path; `database.path` wins over `data_dir`.
    pub fn database_path(&self) -> PathBuf {
        self.database
            .path
            .clone()
            .unwrap_or_else(|| self.data_dir().join(DEFAULT_DB_FILE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn database_path_defaults_under_data_dir() {
        let config = AppConfig {
            data_dir: Some(PathBuf::from("/var/lib/qd")),
            ..Default::default()
        };
        assert_eq!(
            config.database_path(),
            PathBuf::from("/var/lib/qd/quickdiagrams.db")
        );
    }

    #[test]
    fn explicit_database_path_wins() {
        let mut config = AppConfig {
            data_dir: Some(PathBuf::from("/var/lib/qd")),
            ..Default::default()
        };
        config.database.path = Some(PathBuf::from("/tmp/other.db"));
        assert_eq!(config.database_path(), PathBuf::from("/tmp/other.db"));
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config: AppConfig = serde_yaml::from_str("log_level: debug\n").unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.database.busy_timeout_ms, 5_000);
        assert!(!config.database.in_memory);
    }
}
