//! TxRx Bridge library
//! Native core behind a scripting-layer BLE serial plugin: device discovery,
//! one connection session at a time, timed reads and writes, and callback
//! dispatch of everything that happens.

// Module declarations
pub mod commands;
pub mod config;
pub mod core;
pub mod logging;
pub mod state;
pub mod utils;

pub use commands::TxRxBridge;
pub use config::AppConfig;
pub use state::AppState;

// Initialize logging
pub fn setup_logging(config: &config::LogConfig) {
    if let Err(e) = logging::init(config) {
        eprintln!("Logger already initialized: {}", e);
        return;
    }
    log::info!("Logging initialized");
}
