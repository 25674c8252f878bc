//! Defines shared data structures for the Bluetooth module.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle of the single connection session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Disconnecting,
}

/// A discovered device as tracked by the registry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceRecord {
    /// Normalised address, the registry key
    pub address: String,
    /// The advertised name, or a placeholder when none was advertised
    pub name: String,
    /// The signal strength (RSSI) of the last advertisement
    pub rssi: Option<i16>,
    /// When the device was first seen in the current scan
    pub discovered_at: DateTime<Utc>,
    /// When the device was last seen
    pub last_seen: DateTime<Utc>,
    /// Last known connection state
    pub connection_state: ConnectionState,
}

/// One advertisement as reported by a backend
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    /// Platform address or id; normalised by the registry
    pub address: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}
