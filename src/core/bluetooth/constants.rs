//! Constants used throughout the communication core
//! This module contains all the constant values used by the core,
//! such as profile UUIDs, default timeouts and retry settings.

use uuid::Uuid;

/// Name reported for devices that do not advertise one
pub const UNNAMED_DEVICE: &str = "Unnamed device";

/// TxRx serial service, first generation modules
pub const UUID_TXRX_SERVICE_V1: Uuid = Uuid::from_u128(0xf3770001_1164_49bc_8f22_0ac34292c217);
pub const UUID_TXRX_RX_CHAR_V1: Uuid = Uuid::from_u128(0xf3770002_1164_49bc_8f22_0ac34292c217);
pub const UUID_TXRX_TX_CHAR_V1: Uuid = Uuid::from_u128(0xf3770003_1164_49bc_8f22_0ac34292c217);

/// TxRx serial service, second generation modules
pub const UUID_TXRX_SERVICE_V2: Uuid = Uuid::from_u128(0x3cc30001_cb91_4947_bd12_80d2f0535a30);
pub const UUID_TXRX_RX_CHAR_V2: Uuid = Uuid::from_u128(0x3cc30002_cb91_4947_bd12_80d2f0535a30);
pub const UUID_TXRX_TX_CHAR_V2: Uuid = Uuid::from_u128(0x3cc30003_cb91_4947_bd12_80d2f0535a30);

/// Terminator closing a command or an answer on the serial link
pub const DEFAULT_COMMAND_END: &str = "\r\n";

/// Largest chunk written to the TX characteristic in one operation
pub const DEFAULT_MAX_PACKET_SIZE: usize = 20;

/// Default connection timeout in milliseconds
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 10_000;

/// Default write timeout in milliseconds
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 2_000;

/// Default timeout for the first chunk of an answer in milliseconds
pub const DEFAULT_FIRST_READ_TIMEOUT_MS: u64 = 2_000;

/// Default timeout between later chunks of an answer in milliseconds
pub const DEFAULT_LATER_READ_TIMEOUT_MS: u64 = 500;

/// Maximum number of connection attempts
pub const MAX_CONNECT_RETRIES: u32 = 5;

/// Delay between connection retries in milliseconds
pub const CONNECT_RETRY_DELAY_MS: u64 = 1000;
