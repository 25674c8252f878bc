//! Typed events delivered to registered callbacks
//! Each native notification the bridge can report is one `TxRxEvent` variant;
//! `EventKind` is the key callbacks are registered under.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::core::error::TxRxError;
use crate::logging::LogMessage;

/// A device reported by the scanner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoundDevice {
    pub address: String,
    pub name: String,
    pub rssi: Option<i16>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum TxRxEvent {
    ScanStarted,
    DeviceFound(FoundDevice),
    ScanStopped,
    ScanError(TxRxError),
    DeviceConnected { address: String },
    ConnectionError(TxRxError),
    ConnectionTimeout { address: String },
    DeviceDisconnected { address: String },
    /// Data the device sent while no read was active.
    DataNotified { data: String },
    DataRead { data: String },
    ReadError(TxRxError),
    ReadTimeout,
    DataWritten { data: String },
    WriteError(TxRxError),
    WriteTimeout,
    Log(LogMessage),
}

impl TxRxEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ScanStarted => EventKind::ScanStarted,
            Self::DeviceFound(_) => EventKind::DeviceFound,
            Self::ScanStopped => EventKind::ScanStopped,
            Self::ScanError(_) => EventKind::ScanError,
            Self::DeviceConnected { .. } => EventKind::DeviceConnected,
            Self::ConnectionError(_) => EventKind::ConnectionError,
            Self::ConnectionTimeout { .. } => EventKind::ConnectionTimeout,
            Self::DeviceDisconnected { .. } => EventKind::DeviceDisconnected,
            Self::DataNotified { .. } => EventKind::DataNotified,
            Self::DataRead { .. } => EventKind::DataRead,
            Self::ReadError(_) => EventKind::ReadError,
            Self::ReadTimeout => EventKind::ReadTimeout,
            Self::DataWritten { .. } => EventKind::DataWritten,
            Self::WriteError(_) => EventKind::WriteError,
            Self::WriteTimeout => EventKind::WriteTimeout,
            Self::Log(_) => EventKind::Log,
        }
    }
}

/// Key under which a callback is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    ScanStarted,
    DeviceFound,
    ScanStopped,
    ScanError,
    DeviceConnected,
    ConnectionError,
    ConnectionTimeout,
    DeviceDisconnected,
    DataNotified,
    DataRead,
    ReadError,
    ReadTimeout,
    DataWritten,
    WriteError,
    WriteTimeout,
    Log,
}

impl EventKind {
    pub const ALL: [EventKind; 16] = [
        EventKind::ScanStarted,
        EventKind::DeviceFound,
        EventKind::ScanStopped,
        EventKind::ScanError,
        EventKind::DeviceConnected,
        EventKind::ConnectionError,
        EventKind::ConnectionTimeout,
        EventKind::DeviceDisconnected,
        EventKind::DataNotified,
        EventKind::DataRead,
        EventKind::ReadError,
        EventKind::ReadTimeout,
        EventKind::DataWritten,
        EventKind::WriteError,
        EventKind::WriteTimeout,
        EventKind::Log,
    ];

    /// Callback name used by the scripting layer of the plugin.
    pub fn callback_name(&self) -> &'static str {
        match self {
            Self::ScanStarted => "onScanStarted",
            Self::DeviceFound => "onDeviceFound",
            Self::ScanStopped => "afterStopScan",
            Self::ScanError => "onScanError",
            Self::DeviceConnected => "onDeviceConnected",
            Self::ConnectionError => "onConnectionError",
            Self::ConnectionTimeout => "onConnectionTimeout",
            Self::DeviceDisconnected => "onDeviceDisconnected",
            Self::DataNotified => "onNotifyData",
            Self::DataRead => "onReadData",
            Self::ReadError => "onReadError",
            Self::ReadTimeout => "onReadNotifyTimeout",
            Self::DataWritten => "onWriteData",
            Self::WriteError => "onWriteError",
            Self::WriteTimeout => "onWriteTimeout",
            Self::Log => "onLog",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.callback_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEventKind(pub String);

impl fmt::Display for UnknownEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown callback name: {}", self.0)
    }
}

impl std::error::Error for UnknownEventKind {}

impl FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.callback_name() == s)
            .ok_or_else(|| UnknownEventKind(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_names_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(kind.callback_name().parse::<EventKind>(), Ok(kind));
        }
        assert!("onSomethingElse".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_kind_matches_variant() {
        assert_eq!(TxRxEvent::ReadTimeout.kind(), EventKind::ReadTimeout);
        assert_eq!(
            TxRxEvent::DeviceDisconnected { address: "AA".into() }.kind(),
            EventKind::DeviceDisconnected
        );
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(TxRxEvent::DataRead { data: "OK".into() }).unwrap();
        assert_eq!(json["event"], "dataRead");
        assert_eq!(json["payload"]["data"], "OK");

        let json = serde_json::to_value(TxRxEvent::WriteError(TxRxError::WriteTimeout)).unwrap();
        assert_eq!(json["payload"]["code"], "WRITE_TIMEOUT");
    }
}
