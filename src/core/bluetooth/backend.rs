//! Platform backend seam
//! The core never talks to a radio directly. A backend discovers devices and
//! opens links; a link carries the serial traffic of one connected device.

use std::sync::Arc;

use futures_util::stream::BoxStream;

use crate::core::bluetooth::profile::DeviceProfile;
use crate::core::bluetooth::types::Advertisement;
use crate::core::error::TxRxError;

/// Stream of advertisements; ends when the platform stops scanning.
pub type AdvertisementStream = BoxStream<'static, Advertisement>;

/// Stream of data chunks notified by the device; ends when the link drops.
pub type NotificationStream = BoxStream<'static, Result<Vec<u8>, TxRxError>>;

#[async_trait::async_trait]
pub trait BleBackend: Send + Sync {
    /// Starts discovery. Dropping the stream stops it.
    async fn scan(&self) -> Result<AdvertisementStream, TxRxError>;

    /// Connects to `address` and binds the first profile the device exposes.
    async fn connect(
        &self,
        address: &str,
        profiles: &[DeviceProfile],
    ) -> Result<Arc<dyn Link>, TxRxError>;
}

/// An open serial link to one device
#[async_trait::async_trait]
pub trait Link: Send + Sync {
    /// Normalised address of the peer
    fn address(&self) -> &str;

    /// Profile bound during connection
    fn profile(&self) -> &DeviceProfile;

    /// Subscribes to the RX characteristic.
    async fn notifications(&self) -> Result<NotificationStream, TxRxError>;

    /// Writes one chunk, no larger than `profile().max_packet_size`.
    async fn write(&self, chunk: &[u8]) -> Result<(), TxRxError>;

    async fn is_connected(&self) -> bool;

    async fn disconnect(&self) -> Result<(), TxRxError>;
}
