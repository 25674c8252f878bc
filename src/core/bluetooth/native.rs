//! Platform radio access through bluest
//! bluest streams borrow the adapter or characteristic they come from, so each
//! one is driven by a task that forwards into a channel the core can own.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bluest::{Adapter, Characteristic, Device};
use futures_util::StreamExt;
use futures_util::stream;
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::core::bluetooth::backend::{AdvertisementStream, BleBackend, Link, NotificationStream};
use crate::core::bluetooth::profile::DeviceProfile;
use crate::core::bluetooth::types::Advertisement;
use crate::core::error::TxRxError;
use crate::utils::normalize_address;

pub struct BluestBackend {
    adapter: Adapter,
    /// Devices seen by the last scans, keyed by normalised address
    devices: Arc<Mutex<HashMap<String, Device>>>,
}

impl BluestBackend {
    pub async fn new() -> Result<Self, TxRxError> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| TxRxError::BridgeUnavailable("No Bluetooth adapter found".to_string()))?;
        adapter.wait_available().await?;
        info!("Bluetooth adapter is available.");
        Ok(Self {
            adapter,
            devices: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    async fn forward_scan(
        adapter: Adapter,
        devices: Arc<Mutex<HashMap<String, Device>>>,
        tx: mpsc::UnboundedSender<Advertisement>,
        ready: oneshot::Sender<Result<(), TxRxError>>,
    ) {
        let mut scan_stream = match adapter.scan(&[]).await {
            Ok(scan_stream) => {
                let _ = ready.send(Ok(()));
                scan_stream
            }
            Err(e) => {
                let _ = ready.send(Err(TxRxError::ScanUnavailable(e.to_string())));
                return;
            }
        };

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                next = scan_stream.next() => match next {
                    Some(discovered) => {
                        let address = normalize_address(&discovered.device.id().to_string());
                        let name = discovered
                            .adv_data
                            .local_name
                            .clone()
                            .or_else(|| discovered.device.name().ok());
                        devices
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .insert(address.clone(), discovered.device);
                        let adv = Advertisement { address, name, rssi: discovered.rssi };
                        if tx.send(adv).is_err() {
                            break;
                        }
                    }
                    None => {
                        info!("Bluetooth scan stream has ended.");
                        break;
                    }
                }
            }
        }
        debug!("Scan forwarder finished");
    }

    async fn bind_profile(
        device: &Device,
        profile: &DeviceProfile,
    ) -> Result<Option<(Characteristic, Characteristic)>, TxRxError> {
        let services = device.services().await?;
        let Some(service) = services.iter().find(|s| s.uuid() == profile.service_uuid) else {
            return Ok(None);
        };
        info!("Found serial service: {}", service.uuid());

        let mut rx_char = None;
        let mut tx_char = None;
        for characteristic in service.characteristics().await? {
            let uuid = characteristic.uuid();
            if uuid == profile.rx_uuid {
                info!("Found notification characteristic: {}", uuid);
                rx_char = Some(characteristic);
            } else if uuid == profile.tx_uuid {
                info!("Found write characteristic: {}", uuid);
                tx_char = Some(characteristic);
            }
        }
        Ok(rx_char.zip(tx_char))
    }
}

#[async_trait::async_trait]
impl BleBackend for BluestBackend {
    async fn scan(&self) -> Result<AdvertisementStream, TxRxError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(Self::forward_scan(
            self.adapter.clone(),
            self.devices.clone(),
            tx,
            ready_tx,
        ));
        ready_rx
            .await
            .map_err(|_| TxRxError::ScanUnavailable("scan task ended".to_string()))??;

        Ok(stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed())
    }

    async fn connect(
        &self,
        address: &str,
        profiles: &[DeviceProfile],
    ) -> Result<Arc<dyn Link>, TxRxError> {
        let address = normalize_address(address);
        let device = self
            .devices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&address)
            .cloned()
            .ok_or_else(|| TxRxError::DeviceNotFound(address.clone()))?;

        if !device.is_connected().await {
            info!("Initiating connection to {}...", address);
            self.adapter.connect_device(&device).await?;
        }

        info!("Connection successful, discovering services...");
        for profile in profiles {
            if let Some((rx_char, tx_char)) = Self::bind_profile(&device, profile).await? {
                return Ok(Arc::new(BluestLink {
                    address,
                    profile: profile.clone(),
                    adapter: self.adapter.clone(),
                    device,
                    rx_char,
                    tx_char,
                    forwarder: Mutex::new(None),
                }));
            }
        }

        for service in device.services().await? {
            info!("Available service: {}", service.uuid());
        }
        if let Err(e) = self.adapter.disconnect_device(&device).await {
            warn!("Failed to release {}: {}", address, e);
        }
        Err(TxRxError::ServiceNotFound(address))
    }
}

pub struct BluestLink {
    address: String,
    profile: DeviceProfile,
    adapter: Adapter,
    device: Device,
    rx_char: Characteristic,
    tx_char: Characteristic,
    forwarder: Mutex<Option<JoinHandle<()>>>,
}

impl BluestLink {
    async fn forward_notifications(
        characteristic: Characteristic,
        tx: mpsc::UnboundedSender<Result<Vec<u8>, TxRxError>>,
    ) {
        info!("Listening for notifications...");
        match characteristic.notify().await {
            Ok(mut notification_stream) => loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    next = notification_stream.next() => match next {
                        Some(result) => {
                            let failed = result.is_err();
                            if tx.send(result.map_err(TxRxError::from)).is_err() || failed {
                                break;
                            }
                        }
                        None => break,
                    }
                }
            },
            Err(e) => {
                error!("Failed to subscribe to notifications: {}", e);
                let _ = tx.send(Err(e.into()));
            }
        }
        info!("Notification stream ended");
    }
}

#[async_trait::async_trait]
impl Link for BluestLink {
    fn address(&self) -> &str {
        &self.address
    }

    fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    async fn notifications(&self) -> Result<NotificationStream, TxRxError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(Self::forward_notifications(self.rx_char.clone(), tx));
        let previous = self
            .forwarder
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
        Ok(stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed())
    }

    async fn write(&self, chunk: &[u8]) -> Result<(), TxRxError> {
        debug!("Writing {} bytes to {}", chunk.len(), self.address);
        self.tx_char.write(chunk).await?;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.device.is_connected().await
    }

    async fn disconnect(&self) -> Result<(), TxRxError> {
        let forwarder = self.forwarder.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(forwarder) = forwarder {
            forwarder.abort();
        }
        if self.device.is_connected().await {
            info!("Disconnecting from device {}", self.address);
            self.adapter.disconnect_device(&self.device).await?;
        } else {
            info!("Device {} not connected", self.address);
        }
        Ok(())
    }
}
