//! Scan controller
//! Runs one discovery task at a time and reports what it finds through the
//! dispatcher until stopped.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use log::{debug, error, info};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::config::scan_config::ScanConfig;
use crate::core::bluetooth::backend::{AdvertisementStream, BleBackend};
use crate::core::bluetooth::registry::DeviceRegistry;
use crate::core::dispatcher::EventDispatcher;
use crate::core::error::TxRxError;
use crate::core::events::TxRxEvent;

struct ScanTask {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct ScanController {
    backend: Arc<dyn BleBackend>,
    registry: DeviceRegistry,
    dispatcher: EventDispatcher,
    config: ScanConfig,
    scan_task: Mutex<Option<ScanTask>>,
}

impl ScanController {
    pub fn new(
        backend: Arc<dyn BleBackend>,
        registry: DeviceRegistry,
        dispatcher: EventDispatcher,
        config: ScanConfig,
    ) -> Self {
        Self {
            backend,
            registry,
            dispatcher,
            config,
            scan_task: Mutex::new(None),
        }
    }

    /// Starts a fresh scan, stopping the running one first.
    /// The registry is cleared except for `keep`, the device of the live session.
    pub async fn start_scan(&self, keep: Option<&str>) -> Result<(), TxRxError> {
        let mut scan_task = self.scan_task.lock().await;
        if let Some(task) = scan_task.take() {
            Self::finish(task).await;
        }
        self.registry.clear_except(keep);

        info!("Starting bluetooth scan");
        let stream = self.backend.scan().await.inspect_err(|e| {
            error!("Failed to start scan: {}", e);
        })?;

        let cancel_token = CancellationToken::new();
        self.dispatcher.emit(TxRxEvent::ScanStarted);
        let handle = tokio::spawn(Self::internal_scan_task(
            stream,
            self.registry.clone(),
            self.dispatcher.clone(),
            self.config.clone(),
            cancel_token.clone(),
        ));
        *scan_task = Some(ScanTask {
            cancel_token,
            handle,
        });
        info!("Device scan task started.");
        Ok(())
    }

    /// Stops the running scan. Does nothing when no scan is running.
    pub async fn stop_scan(&self) -> Result<(), TxRxError> {
        let task = self.scan_task.lock().await.take();
        match task {
            Some(task) => {
                info!("Stopping Bluetooth scan.");
                Self::finish(task).await;
            }
            None => debug!("No active scan task, nothing to stop."),
        }
        Ok(())
    }

    pub async fn is_scanning(&self) -> bool {
        self.scan_task
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    async fn finish(task: ScanTask) {
        task.cancel_token.cancel();
        if let Err(e) = task.handle.await {
            error!("Scan task finished with an unexpected join error: {:?}", e);
        }
    }

    async fn internal_scan_task(
        mut stream: AdvertisementStream,
        registry: DeviceRegistry,
        dispatcher: EventDispatcher,
        config: ScanConfig,
        cancel_token: CancellationToken,
    ) {
        let auto_stop = async {
            match config.duration_secs {
                Some(secs) => sleep_until(Instant::now() + Duration::from_secs(secs)).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(auto_stop);

        loop {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => break,
                _ = &mut auto_stop => {
                    info!("Scan duration elapsed.");
                    break;
                }
                next = stream.next() => match next {
                    Some(adv) => {
                        debug!("Found device - Address: {}, RSSI: {:?}", adv.address, adv.rssi);
                        if !config.accepts(adv.name.as_deref(), adv.rssi) {
                            continue;
                        }
                        if let Some(found) = registry.record_discovery(&adv) {
                            info!("Found device: Address: {}, Name: {}, RSSI: {:?}", found.address, found.name, found.rssi);
                            dispatcher.emit(TxRxEvent::DeviceFound(found));
                        }
                    }
                    None => {
                        info!("Bluetooth scan stream has ended.");
                        break;
                    }
                }
            }
        }

        drop(stream);
        dispatcher.emit(TxRxEvent::ScanStopped);
        info!("Scan stopped.");
    }
}
