//! Error taxonomy of the communication core
//! Every failure the core reports, whether through a completion callback or an
//! error event, is a `TxRxError`.

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Errors reported by the TxRx communication core.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TxRxError {
    /// The operation needs a `Connected` session and there is none.
    #[error("no active connection")]
    NoActiveConnection,
    /// The device did not complete the connection within the connection timeout.
    #[error("timeout while connecting to device {0}")]
    ConnectionTimeout(String),
    /// The platform did not release the link within the connection timeout.
    #[error("timeout while disconnecting from device {0}")]
    DisconnectTimeout(String),
    /// The platform did not confirm transmission within the write timeout.
    #[error("timeout while sending data to device")]
    WriteTimeout,
    /// No data arrived within the first-read timeout.
    #[error("timeout while receiving data from device")]
    ReadTimeout,
    /// A timeout value is negative, fractional, not finite or too large.
    #[error("invalid value {value} for {field}")]
    InvalidTimeoutValue { field: &'static str, value: f64 },
    /// The address is unknown to the device registry or the platform.
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    /// The native layer cannot be reached (no adapter, bridge shut down).
    #[error("bridge unavailable: {0}")]
    BridgeUnavailable(String),
    /// A connection attempt is already in progress.
    #[error("already connecting to device {0}")]
    AlreadyConnecting(String),
    /// A session is already established.
    #[error("already connected to device {0}")]
    AlreadyConnected(String),
    /// None of the configured serial profiles was found on the device.
    #[error("serial service not found on device {0}")]
    ServiceNotFound(String),
    /// Scanning could not be started.
    #[error("unable to scan: {0}")]
    ScanUnavailable(String),
    /// Error reported by the platform Bluetooth stack.
    #[error("bluetooth error: {0}")]
    Backend(String),
    /// Persisting settings failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl TxRxError {
    /// Stable machine-readable code for the error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoActiveConnection => "NO_ACTIVE_CONNECTION",
            Self::ConnectionTimeout(_) => "CONNECTION_TIMEOUT",
            Self::DisconnectTimeout(_) => "DISCONNECT_TIMEOUT",
            Self::WriteTimeout => "WRITE_TIMEOUT",
            Self::ReadTimeout => "READ_TIMEOUT",
            Self::InvalidTimeoutValue { .. } => "INVALID_TIMEOUT_VALUE",
            Self::DeviceNotFound(_) => "DEVICE_NOT_FOUND",
            Self::BridgeUnavailable(_) => "BRIDGE_UNAVAILABLE",
            Self::AlreadyConnecting(_) => "ALREADY_CONNECTING",
            Self::AlreadyConnected(_) => "ALREADY_CONNECTED",
            Self::ServiceNotFound(_) => "SERVICE_NOT_FOUND",
            Self::ScanUnavailable(_) => "SCAN_UNAVAILABLE",
            Self::Backend(_) => "BACKEND_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Whether a connection attempt failing with this error is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::ServiceNotFound(_))
    }
}

impl Serialize for TxRxError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("TxRxError", 2)?;
        state.serialize_field("code", self.code())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

#[cfg(feature = "ble")]
impl From<bluest::Error> for TxRxError {
    fn from(e: bluest::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializes_code_and_message() {
        let json = serde_json::to_value(TxRxError::DeviceNotFound("AA:BB".into())).unwrap();
        assert_eq!(json["code"], "DEVICE_NOT_FOUND");
        assert_eq!(json["message"], "device not found: AA:BB");
    }

    #[test]
    fn test_transient_errors() {
        assert!(TxRxError::Backend("link reset".into()).is_transient());
        assert!(!TxRxError::DeviceNotFound("AA".into()).is_transient());
        assert!(!TxRxError::NoActiveConnection.is_transient());
    }
}
