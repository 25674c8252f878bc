#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use txrx_bridge_lib::AppConfig;
use txrx_bridge_lib::core::bluetooth::{EmulatedBackend, EmulatedDevice};
use txrx_bridge_lib::core::{Completion, EventDispatcher, EventKind, TxRxEvent, TxRxManager};

pub const DEVICE: &str = "AA:BB:CC:DD:EE:FF";
pub const OTHER_DEVICE: &str = "11:22:33:44:55:66";

const EVENT_WAIT: Duration = Duration::from_secs(3);

/// Every event delivered by a dispatcher, in delivery order.
pub struct Events {
    rx: mpsc::UnboundedReceiver<TxRxEvent>,
}

impl Events {
    pub fn record(dispatcher: &EventDispatcher) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        for kind in EventKind::ALL {
            let tx = tx.clone();
            dispatcher.register(kind, move |event: &TxRxEvent| {
                let _ = tx.send(event.clone());
            });
        }
        Self { rx }
    }

    pub async fn next(&mut self) -> TxRxEvent {
        timeout(EVENT_WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for an event")
            .expect("event channel closed")
    }

    /// Skips events until one of `kind` arrives.
    pub async fn wait_for(&mut self, kind: EventKind) -> TxRxEvent {
        loop {
            let event = self.next().await;
            if event.kind() == kind {
                return event;
            }
        }
    }

    pub async fn wait_for_found(&mut self, address: &str) {
        loop {
            if let TxRxEvent::DeviceFound(found) = self.wait_for(EventKind::DeviceFound).await {
                if found.address == address {
                    return;
                }
            }
        }
    }

    /// Events already delivered and not yet consumed.
    pub fn drain(&mut self) -> Vec<TxRxEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn count(events: &[TxRxEvent], kind: EventKind) -> usize {
    events.iter().filter(|e| e.kind() == kind).count()
}

/// A completion that forwards its result to the returned receiver.
pub fn completion<T: Send + 'static>() -> (Completion<T>, oneshot::Receiver<Result<T, txrx_bridge_lib::core::TxRxError>>) {
    let (tx, rx) = oneshot::channel();
    let completion: Completion<T> = Box::new(move |result| {
        let _ = tx.send(result);
    });
    (completion, rx)
}

pub async fn received<T>(rx: oneshot::Receiver<T>) -> T {
    timeout(EVENT_WAIT, rx)
        .await
        .expect("timed out waiting for a completion")
        .expect("completion dropped")
}

/// Defaults with fast retries and no persistence.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.connection.retry_delay_ms = 10;
    config
}

pub fn backend_with(devices: Vec<EmulatedDevice>) -> EmulatedBackend {
    let backend = EmulatedBackend::new();
    backend.set_scan_interval(Duration::from_millis(5));
    for device in devices {
        backend.add_device(device);
    }
    backend
}

pub async fn manager_for(backend: &EmulatedBackend, config: &AppConfig) -> (Arc<TxRxManager>, Events) {
    let manager = Arc::new(TxRxManager::new(Arc::new(backend.clone()), config).await);
    manager
        .set_timeouts(1000.0, 200.0, 200.0, 50.0)
        .await
        .expect("valid timeouts");
    let events = Events::record(manager.dispatcher());
    (manager, events)
}

/// Discovers `address` and stops scanning.
pub async fn discover(manager: &TxRxManager, events: &mut Events, address: &str) {
    manager.start_scan().await.expect("scan starts");
    events.wait_for_found(address).await;
    manager.stop_scan().await.expect("scan stops");
    events.wait_for(EventKind::ScanStopped).await;
}

/// A manager already connected to `DEVICE`.
pub async fn connected(backend: &EmulatedBackend, config: &AppConfig) -> (Arc<TxRxManager>, Events) {
    let (manager, mut events) = manager_for(backend, config).await;
    discover(&manager, &mut events, DEVICE).await;
    manager.connect(DEVICE).await.expect("connect accepted");
    events.wait_for(EventKind::DeviceConnected).await;
    (manager, events)
}
