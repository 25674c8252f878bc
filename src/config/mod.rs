pub mod connection_config;
pub mod scan_config;
pub mod timeouts_config;

use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::config::connection_config::{ConnectionConfig, TransferConfig};
use crate::config::scan_config::ScanConfig;
use crate::config::timeouts_config::TIMEOUTS_FILE_NAME;
use crate::utils::ensure_directory_exists;

const CONFIG_FILE_NAME: &str = "config.json";
const CONFIG_DIR_NAME: &str = "txrx-bridge";

/// Logger settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `error`, `warn`, `info`, `debug` or `trace`; `RUST_LOG` takes precedence.
    pub level: String,
    /// Mirror log records to the `Log` callback.
    pub forward_to_callbacks: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "info".to_string(),
            forward_to_callbacks: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scan: ScanConfig,
    pub connection: ConnectionConfig,
    pub transfer: TransferConfig,
    pub logging: LogConfig,
    /// Directory holding `config.json` and `timeouts.json`. Not serialized;
    /// `None` keeps everything in memory.
    #[serde(skip)]
    pub config_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Platform configuration directory for this crate.
    pub fn default_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME))
    }

    /// Where the timeout tuple is persisted, if persistence is enabled.
    pub fn timeouts_path(&self) -> Option<PathBuf> {
        self.config_dir.as_ref().map(|dir| dir.join(TIMEOUTS_FILE_NAME))
    }

    /// Loads the config from `config_dir`, using defaults when no file exists.
    pub async fn load_config(config_dir: &Path) -> Result<Self> {
        let file_path = config_dir.join(CONFIG_FILE_NAME);
        let file_path_str = file_path.to_string_lossy().into_owned();

        let mut config = if !file_path.exists() {
            warn!("Config file not found at {:?}, using default.", file_path_str);
            Self::default()
        } else {
            let config_json = fs::read_to_string(&file_path).await?;
            let config: Self = serde_json::from_str(&config_json)?;
            info!("Config loaded from {:?}", file_path_str);
            config
        };
        config.config_dir = Some(config_dir.to_path_buf());
        Ok(config)
    }

    /// Saves the config into its directory.
    pub async fn save_config(&self) -> Result<()> {
        let Some(config_dir) = self.config_dir.as_ref() else {
            warn!("No config directory set, config not saved.");
            return Ok(());
        };
        ensure_directory_exists(config_dir).await?;

        let file_path = config_dir.join(CONFIG_FILE_NAME);
        let config_json = match serde_json::to_string_pretty(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize config to JSON: {}", e);
                return Err(e.into());
            }
        };

        fs::write(&file_path, config_json).await?;
        info!("Config saved to {:?}.", file_path.to_string_lossy());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_file_gives_defaults_with_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_config(dir.path()).await.unwrap();
        assert_eq!(config.connection, ConnectionConfig::default());
        assert_eq!(config.timeouts_path(), Some(dir.path().join(TIMEOUTS_FILE_NAME)));
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.config_dir = Some(dir.path().join("sub"));
        config.scan.name_filter = Some("TxRx".into());
        config.connection.max_retries = 2;
        config.save_config().await.unwrap();

        let loaded = AppConfig::load_config(&dir.path().join("sub")).await.unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{ "scan": { "min_rssi": -80 } }"#).unwrap();
        assert_eq!(config.scan.min_rssi, Some(-80));
        assert!(config.transfer.read_after_write);
        assert_eq!(config.logging.level, "info");
    }
}
