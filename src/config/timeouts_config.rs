use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::core::bluetooth::constants::{
    DEFAULT_CONNECTION_TIMEOUT_MS, DEFAULT_FIRST_READ_TIMEOUT_MS, DEFAULT_LATER_READ_TIMEOUT_MS,
    DEFAULT_WRITE_TIMEOUT_MS,
};
use crate::core::error::TxRxError;
use crate::utils::ensure_directory_exists;

pub const TIMEOUTS_FILE_NAME: &str = "timeouts.json";

/// The four durations governing connect, write and read phases, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeouts {
    /// Upper bound for establishing a session, retries included.
    pub connection_timeout: u64,
    /// Upper bound for the platform to confirm a write.
    pub write_timeout: u64,
    /// How long a read waits for the first chunk.
    pub first_read_timeout: u64,
    /// How long a read waits for each following chunk before it completes.
    pub later_read_timeout: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT_MS,
            write_timeout: DEFAULT_WRITE_TIMEOUT_MS,
            first_read_timeout: DEFAULT_FIRST_READ_TIMEOUT_MS,
            later_read_timeout: DEFAULT_LATER_READ_TIMEOUT_MS,
        }
    }
}

impl Timeouts {
    /// Builds a tuple from script numbers. All four are checked before any is used.
    pub fn from_millis(
        connection_timeout: f64,
        write_timeout: f64,
        first_read_timeout: f64,
        later_read_timeout: f64,
    ) -> Result<Self, TxRxError> {
        Ok(Timeouts {
            connection_timeout: validate_millis("connectionTimeout", connection_timeout)?,
            write_timeout: validate_millis("writeTimeout", write_timeout)?,
            first_read_timeout: validate_millis("firstReadTimeout", first_read_timeout)?,
            later_read_timeout: validate_millis("laterReadTimeout", later_read_timeout)?,
        })
    }

    pub fn connection(&self) -> Duration {
        Duration::from_millis(self.connection_timeout)
    }

    pub fn write(&self) -> Duration {
        Duration::from_millis(self.write_timeout)
    }

    pub fn first_read(&self) -> Duration {
        Duration::from_millis(self.first_read_timeout)
    }

    pub fn later_read(&self) -> Duration {
        Duration::from_millis(self.later_read_timeout)
    }

    /// Loads the persisted tuple, falling back to defaults when absent or unreadable.
    pub async fn load_config(file_path: &Path) -> Self {
        let file_path_str = file_path.to_string_lossy().into_owned();
        if !file_path.exists() {
            warn!("Timeouts file not found at {:?}, using defaults.", file_path_str);
            return Self::default();
        }

        let loaded = async {
            let json = fs::read_to_string(file_path).await?;
            let timeouts: Self = serde_json::from_str(&json)?;
            anyhow::Ok(timeouts)
        }
        .await;

        match loaded {
            Ok(timeouts) => {
                info!("Timeouts loaded from {:?}", file_path_str);
                timeouts
            }
            Err(e) => {
                error!("Failed to read timeouts from {:?}: {}, using defaults.", file_path_str, e);
                Self::default()
            }
        }
    }

    /// Saves the tuple, creating the parent directory if needed.
    pub async fn save_config(&self, file_path: &Path) -> Result<()> {
        if let Some(dir) = file_path.parent() {
            ensure_directory_exists(dir).await?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(file_path, json).await?;
        info!("Timeouts saved to {:?}", file_path.to_string_lossy());
        Ok(())
    }
}

fn validate_millis(field: &'static str, value: f64) -> Result<u64, TxRxError> {
    let valid = value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= u32::MAX as f64;
    if valid {
        Ok(value as u64)
    } else {
        Err(TxRxError::InvalidTimeoutValue { field, value })
    }
}
