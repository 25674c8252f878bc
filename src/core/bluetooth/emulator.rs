//! Emulated backend
//! An in-memory radio: scripted devices that advertise, accept connections,
//! echo or answer writes and can be made to fail. Drives the tests and lets a
//! host exercise the bridge without hardware.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream;
use log::{debug, info};
use tokio::sync::mpsc;

use crate::core::bluetooth::backend::{AdvertisementStream, BleBackend, Link, NotificationStream};
use crate::core::bluetooth::profile::DeviceProfile;
use crate::core::bluetooth::types::Advertisement;
use crate::core::error::TxRxError;
use crate::utils::normalize_address;

const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(20);

/// Produces the notification chunks a device sends back for one written chunk.
pub type Responder = Arc<dyn Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync>;

/// Scripted behaviour of one emulated device
#[derive(Clone)]
pub struct EmulatedDevice {
    pub address: String,
    pub name: Option<String>,
    pub rssi: Option<i16>,
    /// Unreachable devices refuse every connection attempt.
    pub reachable: bool,
    /// Number of initial connection attempts rejected with a transient error
    pub failing_attempts: u32,
    pub connect_delay: Duration,
    pub write_delay: Duration,
    /// Time the device takes to acknowledge a platform disconnect.
    pub disconnect_delay: Duration,
    /// Serial service exposed by the device; `None` matches the first requested profile.
    pub profile: Option<DeviceProfile>,
    responder: Responder,
}

impl EmulatedDevice {
    /// A reachable device that echoes every chunk written to it.
    pub fn new(address: &str, name: Option<&str>) -> Self {
        Self {
            address: normalize_address(address),
            name: name.map(str::to_string),
            rssi: Some(-60),
            reachable: true,
            failing_attempts: 0,
            connect_delay: Duration::ZERO,
            write_delay: Duration::ZERO,
            disconnect_delay: Duration::ZERO,
            profile: None,
            responder: Arc::new(|chunk: &[u8]| vec![chunk.to_vec()]),
        }
    }

    pub fn with_rssi(mut self, rssi: Option<i16>) -> Self {
        self.rssi = rssi;
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    pub fn with_failing_attempts(mut self, attempts: u32) -> Self {
        self.failing_attempts = attempts;
        self
    }

    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    pub fn with_disconnect_delay(mut self, delay: Duration) -> Self {
        self.disconnect_delay = delay;
        self
    }

    pub fn with_profile(mut self, profile: DeviceProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn with_responder<F>(mut self, responder: F) -> Self
    where
        F: Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync + 'static,
    {
        self.responder = Arc::new(responder);
        self
    }

    /// A device that never answers writes.
    pub fn silent(self) -> Self {
        self.with_responder(|_| Vec::new())
    }

    fn advertisement(&self) -> Advertisement {
        Advertisement {
            address: self.address.clone(),
            name: self.name.clone(),
            rssi: self.rssi,
        }
    }
}

/// Live state of a link, shared between the link and the backend's test hooks
#[derive(Default)]
struct LinkState {
    connected: AtomicBool,
    notify_tx: Mutex<Option<mpsc::UnboundedSender<Result<Vec<u8>, TxRxError>>>>,
    written: Mutex<Vec<Vec<u8>>>,
    disconnect_calls: AtomicU32,
}

impl LinkState {
    fn notify(&self, data: Vec<u8>) -> bool {
        let notify_tx = self.notify_tx.lock().unwrap_or_else(|e| e.into_inner());
        notify_tx.as_ref().is_some_and(|tx| tx.send(Ok(data)).is_ok())
    }

    /// Sends a stream error while the link itself stays up.
    fn fail(&self, error: TxRxError) -> bool {
        let notify_tx = self.notify_tx.lock().unwrap_or_else(|e| e.into_inner());
        notify_tx.as_ref().is_some_and(|tx| tx.send(Err(error)).is_ok())
    }

    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        // Dropping the sender ends the notification stream
        self.notify_tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

struct EmulatorState {
    devices: Vec<EmulatedDevice>,
    links: HashMap<String, Arc<LinkState>>,
    connect_attempts: HashMap<String, u32>,
    scan_available: bool,
    scan_interval: Duration,
}

#[derive(Clone)]
pub struct EmulatedBackend {
    state: Arc<Mutex<EmulatorState>>,
}

impl EmulatedBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(EmulatorState {
                devices: Vec::new(),
                links: HashMap::new(),
                connect_attempts: HashMap::new(),
                scan_available: true,
                scan_interval: DEFAULT_SCAN_INTERVAL,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, EmulatorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_device(self, device: EmulatedDevice) -> Self {
        self.add_device(device);
        self
    }

    pub fn add_device(&self, device: EmulatedDevice) {
        self.lock().devices.push(device);
    }

    /// Makes `scan` fail as if the adapter were switched off.
    pub fn set_scan_available(&self, available: bool) {
        self.lock().scan_available = available;
    }

    /// Pause between two advertisements of the scan stream.
    pub fn set_scan_interval(&self, interval: Duration) {
        self.lock().scan_interval = interval;
    }

    fn link_state(&self, address: &str) -> Option<Arc<LinkState>> {
        self.lock().links.get(&normalize_address(address)).cloned()
    }

    /// Sends unsolicited data from the device. Returns false without a live link.
    pub fn push_notification(&self, address: &str, data: &[u8]) -> bool {
        self.link_state(address).is_some_and(|link| link.notify(data.to_vec()))
    }

    /// Drops the link from the device side.
    pub fn drop_link(&self, address: &str) {
        if let Some(link) = self.link_state(address) {
            info!("Emulated link to {} dropped", address);
            link.close();
        }
    }

    /// Breaks the notification stream with `error`, leaving the platform
    /// connection open until the core releases it.
    pub fn fail_notifications(&self, address: &str, error: TxRxError) -> bool {
        self.link_state(address).is_some_and(|link| link.fail(error))
    }

    /// Platform disconnects requested over the current or last link.
    pub fn disconnect_calls(&self, address: &str) -> u32 {
        self.link_state(address)
            .map(|link| link.disconnect_calls.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Chunks written to the device over its current or last link.
    pub fn written_chunks(&self, address: &str) -> Vec<Vec<u8>> {
        self.link_state(address)
            .map(|link| link.written.lock().unwrap_or_else(|e| e.into_inner()).clone())
            .unwrap_or_default()
    }

    /// Everything written to the device, concatenated.
    pub fn written(&self, address: &str) -> Vec<u8> {
        self.written_chunks(address).concat()
    }

    pub fn connect_attempts(&self, address: &str) -> u32 {
        self.lock()
            .connect_attempts
            .get(&normalize_address(address))
            .copied()
            .unwrap_or(0)
    }

    pub fn is_linked(&self, address: &str) -> bool {
        self.link_state(address)
            .is_some_and(|link| link.connected.load(Ordering::SeqCst))
    }
}

impl Default for EmulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl BleBackend for EmulatedBackend {
    async fn scan(&self) -> Result<AdvertisementStream, TxRxError> {
        let (advertisements, interval) = {
            let state = self.lock();
            if !state.scan_available {
                return Err(TxRxError::ScanUnavailable("Bluetooth adapter is off".to_string()));
            }
            let advertisements: Vec<Advertisement> =
                state.devices.iter().map(EmulatedDevice::advertisement).collect();
            (advertisements, state.scan_interval)
        };

        if advertisements.is_empty() {
            return Ok(stream::pending().boxed());
        }
        // Devices keep advertising until the scan is stopped
        let stream = stream::iter(advertisements.into_iter().cycle()).then(move |adv| async move {
            tokio::time::sleep(interval).await;
            adv
        });
        Ok(stream.boxed())
    }

    async fn connect(
        &self,
        address: &str,
        profiles: &[DeviceProfile],
    ) -> Result<Arc<dyn Link>, TxRxError> {
        let address = normalize_address(address);
        let (device, attempt) = {
            let mut state = self.lock();
            let device = state
                .devices
                .iter()
                .find(|d| d.address == address)
                .cloned()
                .ok_or_else(|| TxRxError::DeviceNotFound(address.clone()))?;
            let attempt = state.connect_attempts.entry(address.clone()).or_insert(0);
            *attempt += 1;
            (device, *attempt)
        };

        tokio::time::sleep(device.connect_delay).await;
        if !device.reachable {
            return Err(TxRxError::Backend(format!("device {} unreachable", address)));
        }
        if attempt <= device.failing_attempts {
            return Err(TxRxError::Backend(format!("connection attempt {} rejected", attempt)));
        }

        let profile = match &device.profile {
            Some(exposed) => profiles.iter().find(|p| p.service_uuid == exposed.service_uuid),
            None => profiles.first(),
        }
        .cloned()
        .ok_or_else(|| TxRxError::ServiceNotFound(address.clone()))?;

        let state = Arc::new(LinkState::default());
        state.connected.store(true, Ordering::SeqCst);
        self.lock().links.insert(address.clone(), state.clone());
        debug!("Emulated link to {} open", address);

        Ok(Arc::new(EmulatedLink {
            address,
            profile,
            state,
            responder: device.responder,
            write_delay: device.write_delay,
            disconnect_delay: device.disconnect_delay,
        }))
    }
}

pub struct EmulatedLink {
    address: String,
    profile: DeviceProfile,
    state: Arc<LinkState>,
    responder: Responder,
    write_delay: Duration,
    disconnect_delay: Duration,
}

#[async_trait::async_trait]
impl Link for EmulatedLink {
    fn address(&self) -> &str {
        &self.address
    }

    fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    async fn notifications(&self) -> Result<NotificationStream, TxRxError> {
        if !self.state.connected.load(Ordering::SeqCst) {
            return Err(TxRxError::NoActiveConnection);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.state.notify_tx.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);
        let incoming = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(incoming.boxed())
    }

    async fn write(&self, chunk: &[u8]) -> Result<(), TxRxError> {
        if !self.state.connected.load(Ordering::SeqCst) {
            return Err(TxRxError::Backend("link closed".to_string()));
        }
        tokio::time::sleep(self.write_delay).await;
        self.state
            .written
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(chunk.to_vec());
        for answer in (self.responder)(chunk) {
            self.state.notify(answer);
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    async fn disconnect(&self) -> Result<(), TxRxError> {
        self.state.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.disconnect_delay).await;
        self.state.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scan_cycles_advertisements() {
        let backend = EmulatedBackend::new()
            .with_device(EmulatedDevice::new("aa:bb:cc:dd:ee:01", Some("One")))
            .with_device(EmulatedDevice::new("aa:bb:cc:dd:ee:02", None));
        backend.set_scan_interval(Duration::from_millis(1));

        let seen: Vec<String> = backend
            .scan()
            .await
            .unwrap()
            .take(4)
            .map(|adv| adv.address)
            .collect()
            .await;
        assert_eq!(
            seen,
            vec!["AA:BB:CC:DD:EE:01", "AA:BB:CC:DD:EE:02", "AA:BB:CC:DD:EE:01", "AA:BB:CC:DD:EE:02"]
        );
    }

    #[tokio::test]
    async fn test_scan_unavailable() {
        let backend = EmulatedBackend::new();
        backend.set_scan_available(false);
        assert!(matches!(backend.scan().await, Err(TxRxError::ScanUnavailable(_))));
    }

    #[tokio::test]
    async fn test_echo_and_notifications() {
        let backend = EmulatedBackend::new().with_device(EmulatedDevice::new("AA:BB:CC:DD:EE:FF", None));
        let link = backend
            .connect("aa:bb:cc:dd:ee:ff", &DeviceProfile::known_profiles())
            .await
            .unwrap();
        let mut incoming = link.notifications().await.unwrap();

        link.write(b"ping").await.unwrap();
        assert!(backend.push_notification("AA:BB:CC:DD:EE:FF", b"tick"));
        assert_eq!(incoming.next().await.unwrap().unwrap(), b"ping".to_vec());
        assert_eq!(incoming.next().await.unwrap().unwrap(), b"tick".to_vec());
        assert_eq!(backend.written("AA:BB:CC:DD:EE:FF"), b"ping".to_vec());

        backend.drop_link("AA:BB:CC:DD:EE:FF");
        assert!(incoming.next().await.is_none());
        assert!(!link.is_connected().await);
    }

    #[tokio::test]
    async fn test_stream_failure_keeps_link_up() {
        let backend = EmulatedBackend::new().with_device(EmulatedDevice::new("AA:BB:CC:DD:EE:FF", None));
        let link = backend
            .connect("AA:BB:CC:DD:EE:FF", &DeviceProfile::known_profiles())
            .await
            .unwrap();
        let mut incoming = link.notifications().await.unwrap();

        let error = TxRxError::Backend("GATT failure".into());
        assert!(backend.fail_notifications("AA:BB:CC:DD:EE:FF", error.clone()));
        assert_eq!(incoming.next().await.unwrap(), Err(error));
        assert!(backend.is_linked("AA:BB:CC:DD:EE:FF"));
        assert_eq!(backend.disconnect_calls("AA:BB:CC:DD:EE:FF"), 0);

        link.disconnect().await.unwrap();
        assert!(!backend.is_linked("AA:BB:CC:DD:EE:FF"));
        assert_eq!(backend.disconnect_calls("AA:BB:CC:DD:EE:FF"), 1);
    }

    #[tokio::test]
    async fn test_profile_mismatch() {
        let v2 = DeviceProfile::known_profiles().remove(1);
        let backend = EmulatedBackend::new()
            .with_device(EmulatedDevice::new("AA:BB:CC:DD:EE:FF", None).with_profile(v2.clone()));

        let only_v1 = vec![DeviceProfile::known_profiles().remove(0)];
        let err = backend.connect("AA:BB:CC:DD:EE:FF", &only_v1).await.err().unwrap();
        assert_eq!(err, TxRxError::ServiceNotFound("AA:BB:CC:DD:EE:FF".into()));

        let link = backend
            .connect("AA:BB:CC:DD:EE:FF", &DeviceProfile::known_profiles())
            .await
            .unwrap();
        assert_eq!(link.profile(), &v2);
        assert_eq!(backend.connect_attempts("AA:BB:CC:DD:EE:FF"), 2);
    }
}
