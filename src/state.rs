//! Application state management
//! `AppState` ties configuration, the core manager and the bridge together.
//! A host keeps one per process and passes it by reference.

use std::sync::Arc;

use log::info;
use tokio::sync::mpsc;

use crate::commands::TxRxBridge;
use crate::config::AppConfig;
use crate::core::bluetooth::BleBackend;
use crate::core::{EventDispatcher, TxRxEvent, TxRxManager};
use crate::logging::{self, LogMessage};

pub struct AppState {
    pub config: AppConfig,
    pub manager: Arc<TxRxManager>,
    pub bridge: TxRxBridge,
}

impl AppState {
    /// Creates the state on top of `backend`.
    pub async fn new(config: AppConfig, backend: Arc<dyn BleBackend>) -> Self {
        info!("Initializing TxRxManager...");
        let manager = Arc::new(TxRxManager::new(backend, &config).await);
        if config.logging.forward_to_callbacks {
            tokio::spawn(forward_logs(logging::subscribe(), manager.dispatcher().clone()));
        }
        let bridge = TxRxBridge::new(manager.clone());
        Self {
            config,
            manager,
            bridge,
        }
    }

    /// Creates the state on the platform Bluetooth adapter.
    #[cfg(feature = "ble")]
    pub async fn with_bluest(config: AppConfig) -> anyhow::Result<Self> {
        let backend = crate::core::bluetooth::BluestBackend::new().await?;
        Ok(Self::new(config, Arc::new(backend)).await)
    }

    pub fn bridge(&self) -> &TxRxBridge {
        &self.bridge
    }
}

async fn forward_logs(mut rx: mpsc::UnboundedReceiver<LogMessage>, dispatcher: EventDispatcher) {
    while let Some(message) = rx.recv().await {
        dispatcher.emit(TxRxEvent::Log(message));
    }
}
