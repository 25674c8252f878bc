//! Core functionality for the TxRx bridge
//! Session management, typed events and their dispatch, and timeout settings.

pub mod bluetooth;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod timeouts;

// Re-export commonly used types
pub use bluetooth::TxRxManager;
pub use dispatcher::{Completion, EventDispatcher, EventHandler};
pub use error::TxRxError;
pub use events::{EventKind, FoundDevice, TxRxEvent};
pub use timeouts::TimeoutStore;
