use std::sync::Mutex;

use chrono::Local;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::LogConfig;
use crate::core::dispatcher;

static FORWARDER: Mutex<Option<mpsc::UnboundedSender<LogMessage>>> = Mutex::new(None);

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct LogMessage {
    pub level: String,
    pub message: String,
    pub timestamp: String,
}

impl LogMessage {
    fn from_record(record: &Record) -> Self {
        Self {
            level: record.level().to_string(),
            message: record.args().to_string(),
            timestamp: Local::now().to_rfc3339(),
        }
    }
}

/// Writes through env_logger and mirrors records to the subscriber, if any.
pub struct BridgeLogger {
    inner: env_logger::Logger,
}

impl BridgeLogger {
    /// Installs the logger globally. The level comes from `config`, `RUST_LOG` overrides it.
    pub fn init(config: &LogConfig) -> Result<(), SetLoggerError> {
        let inner = env_logger::Builder::new()
            .filter_level(parse_level(&config.level))
            .parse_default_env()
            .build();
        let max_level = inner.filter();

        log::set_boxed_logger(Box::new(BridgeLogger { inner }))
            .map(|()| log::set_max_level(max_level))
    }

    fn forward(&self, record: &Record) {
        if record.target() == dispatcher::LOG_TARGET {
            return;
        }
        let mut forwarder = FORWARDER.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = forwarder.as_ref() {
            if tx.send(LogMessage::from_record(record)).is_err() {
                // Subscriber went away
                *forwarder = None;
            }
        }
    }
}

impl Log for BridgeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if self.inner.matches(record) {
            self.inner.log(record);
            self.forward(record);
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Installs the `BridgeLogger`. Fails if a logger is already set.
pub fn init(config: &LogConfig) -> Result<(), SetLoggerError> {
    BridgeLogger::init(config)
}

/// Starts mirroring log records into the returned channel, replacing any previous subscriber.
pub fn subscribe() -> mpsc::UnboundedReceiver<LogMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    *FORWARDER.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
    rx
}

fn parse_level(level: &str) -> LevelFilter {
    level.parse().unwrap_or(LevelFilter::Info)
}
