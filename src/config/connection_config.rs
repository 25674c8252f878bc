use serde::{Deserialize, Serialize};

use crate::core::bluetooth::constants::{CONNECT_RETRY_DELAY_MS, MAX_CONNECT_RETRIES};
use crate::core::bluetooth::DeviceProfile;

/// Session establishment settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Number of connection attempts before giving up
    pub max_retries: u32,
    /// Pause between two attempts in milliseconds
    pub retry_delay_ms: u64,
    /// Serial profiles tried in order on a freshly connected device
    pub profiles: Vec<DeviceProfile>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        ConnectionConfig {
            max_retries: MAX_CONNECT_RETRIES,
            retry_delay_ms: CONNECT_RETRY_DELAY_MS,
            profiles: DeviceProfile::known_profiles(),
        }
    }
}

/// Read/write behaviour on an established session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Collect the device's answer after every successful write.
    pub read_after_write: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig { read_after_write: true }
    }
}
