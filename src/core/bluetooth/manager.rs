//! TxRx manager
//! The explicit context object of the core: owns the dispatcher, registry,
//! timeout store, scanner and connection manager, and is handed by reference
//! to whatever drives it.

use std::sync::Arc;

use log::{info, warn};

use crate::config::AppConfig;
use crate::config::timeouts_config::Timeouts;
use crate::core::bluetooth::backend::BleBackend;
use crate::core::bluetooth::connection::ConnectionManager;
use crate::core::bluetooth::registry::DeviceRegistry;
use crate::core::bluetooth::scanner::ScanController;
use crate::core::bluetooth::transfer::TransferRequest;
use crate::core::bluetooth::types::{ConnectionState, DeviceRecord};
use crate::core::dispatcher::{Completion, EventDispatcher, EventHandler};
use crate::core::error::TxRxError;
use crate::core::events::{EventKind, TxRxEvent};
use crate::core::timeouts::TimeoutStore;

pub struct TxRxManager {
    dispatcher: EventDispatcher,
    registry: DeviceRegistry,
    timeouts: TimeoutStore,
    scanner: ScanController,
    connection: ConnectionManager,
}

impl TxRxManager {
    /// Builds the core on top of `backend`. Must be called from within a Tokio runtime.
    pub async fn new(backend: Arc<dyn BleBackend>, config: &AppConfig) -> Self {
        let timeouts = match config.timeouts_path() {
            Some(path) => TimeoutStore::load(path).await,
            None => TimeoutStore::new(),
        };
        Self::with_timeouts(backend, config, timeouts)
    }

    pub fn with_timeouts(backend: Arc<dyn BleBackend>, config: &AppConfig, timeouts: TimeoutStore) -> Self {
        let dispatcher = EventDispatcher::new();
        let registry = DeviceRegistry::new();
        let scanner = ScanController::new(
            backend.clone(),
            registry.clone(),
            dispatcher.clone(),
            config.scan.clone(),
        );
        let connection = ConnectionManager::new(
            backend,
            registry.clone(),
            dispatcher.clone(),
            timeouts.clone(),
            config.connection.clone(),
            config.transfer.clone(),
        );
        info!("TxRx manager ready, timeouts: {:?}", timeouts.get());
        Self {
            dispatcher,
            registry,
            timeouts,
            scanner,
            connection,
        }
    }

    /// Creates a manager on the platform adapter.
    #[cfg(feature = "ble")]
    pub async fn with_bluest(config: &AppConfig) -> Result<Self, TxRxError> {
        let backend = crate::core::bluetooth::native::BluestBackend::new().await?;
        Ok(Self::new(Arc::new(backend), config).await)
    }

    pub async fn start_scan(&self) -> Result<(), TxRxError> {
        let keep = self.connection.current_address().await;
        self.scanner.start_scan(keep.as_deref()).await
    }

    pub async fn stop_scan(&self) -> Result<(), TxRxError> {
        self.scanner.stop_scan().await
    }

    pub async fn is_scanning(&self) -> bool {
        self.scanner.is_scanning().await
    }

    pub async fn connect(&self, address: &str) -> Result<(), TxRxError> {
        self.connection.connect(address).await
    }

    pub async fn disconnect(&self) -> Result<(), TxRxError> {
        self.connection.disconnect().await
    }

    /// Queues a read. The answer arrives as `DataRead`, `ReadTimeout` or `ReadError`.
    pub async fn read_data(&self) {
        self.submit(TransferRequest::Read).await;
    }

    /// Queues a write. `completion` receives the outcome once the device confirmed it.
    pub async fn write_data(&self, data: String, completion: Completion<()>) {
        self.submit(TransferRequest::Write { data, completion }).await;
    }

    async fn submit(&self, request: TransferRequest) {
        let rejected = match self.connection.transfer_handle().await {
            Ok(transfer) => transfer.submit(request).err().map(|r| (r, TxRxError::NoActiveConnection)),
            Err(e) => Some((request, e)),
        };
        if let Some((request, e)) = rejected {
            warn!("Transfer rejected: {}", e);
            request.reject(&self.dispatcher, e);
        }
    }

    pub async fn is_device_connected(&self, address: &str) -> bool {
        self.connection.is_device_connected(address).await
    }

    pub async fn connection_state(&self) -> ConnectionState {
        self.connection.state().await
    }

    pub fn get_timeouts(&self) -> Timeouts {
        self.timeouts.get()
    }

    pub async fn set_timeouts(
        &self,
        connection_timeout: f64,
        write_timeout: f64,
        first_read_timeout: f64,
        later_read_timeout: f64,
    ) -> Result<(), TxRxError> {
        self.timeouts
            .set_millis(connection_timeout, write_timeout, first_read_timeout, later_read_timeout)
            .await
    }

    pub async fn set_default_timeouts(&self) -> Result<(), TxRxError> {
        self.timeouts.reset().await
    }

    pub fn register_callback<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&TxRxEvent) + Send + Sync + 'static,
    {
        self.dispatcher.register(kind, handler);
    }

    pub fn register_callbacks<I>(&self, handlers: I)
    where
        I: IntoIterator<Item = (EventKind, EventHandler)>,
    {
        self.dispatcher.register_all(handlers);
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Devices discovered by the current scan.
    pub fn devices(&self) -> Vec<DeviceRecord> {
        self.registry.devices()
    }
}
