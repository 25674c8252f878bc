//! Serial service profiles
//! A profile tells the connection layer which GATT service and characteristics
//! carry the serial link, and how writes are framed.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::constants::{
    DEFAULT_COMMAND_END, DEFAULT_MAX_PACKET_SIZE, UUID_TXRX_RX_CHAR_V1, UUID_TXRX_RX_CHAR_V2,
    UUID_TXRX_SERVICE_V1, UUID_TXRX_SERVICE_V2, UUID_TXRX_TX_CHAR_V1, UUID_TXRX_TX_CHAR_V2,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// The serial service
    pub service_uuid: Uuid,
    /// Characteristic the device notifies its data on
    pub rx_uuid: Uuid,
    /// Characteristic written to send data to the device
    pub tx_uuid: Uuid,
    /// Terminator that closes an answer
    pub command_end: String,
    /// Largest chunk accepted by the TX characteristic
    pub max_packet_size: usize,
}

impl DeviceProfile {
    pub fn new(service_uuid: Uuid, rx_uuid: Uuid, tx_uuid: Uuid) -> Self {
        Self {
            service_uuid,
            rx_uuid,
            tx_uuid,
            command_end: DEFAULT_COMMAND_END.to_string(),
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }

    /// Profiles of the TxRx modules known to this crate.
    pub fn known_profiles() -> Vec<DeviceProfile> {
        vec![
            DeviceProfile::new(UUID_TXRX_SERVICE_V1, UUID_TXRX_RX_CHAR_V1, UUID_TXRX_TX_CHAR_V1),
            DeviceProfile::new(UUID_TXRX_SERVICE_V2, UUID_TXRX_RX_CHAR_V2, UUID_TXRX_TX_CHAR_V2),
        ]
    }

    /// Splits a payload into writes the TX characteristic accepts.
    pub fn chunks<'a>(&self, payload: &'a [u8]) -> std::slice::Chunks<'a, u8> {
        payload.chunks(self.max_packet_size.max(1))
    }

    /// True when `buffer` holds a complete answer.
    pub fn is_complete_answer(&self, buffer: &[u8]) -> bool {
        !self.command_end.is_empty() && buffer.ends_with(self.command_end.as_bytes())
    }
}
