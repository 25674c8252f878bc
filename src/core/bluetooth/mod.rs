//! Bluetooth functionality for the TxRx bridge
//! This module handles scanning, the connection session and serial transfers
//! on top of a pluggable platform backend.

mod backend;
mod connection;
pub mod constants;
mod emulator;
mod manager;
#[cfg(feature = "ble")]
mod native;
mod profile;
mod registry;
mod scanner;
mod transfer;
mod types;

// Re-export types that should be publicly accessible
pub use backend::{AdvertisementStream, BleBackend, Link, NotificationStream};
pub use connection::ConnectionManager;
pub use emulator::{EmulatedBackend, EmulatedDevice, EmulatedLink, Responder};
pub use manager::TxRxManager;
#[cfg(feature = "ble")]
pub use native::{BluestBackend, BluestLink};
pub use profile::DeviceProfile;
pub use registry::DeviceRegistry;
pub use scanner::ScanController;
pub use transfer::{TransferHandle, TransferRequest, TransferWorker, WorkerExit};
pub use types::{Advertisement, ConnectionState, DeviceRecord};
