mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use txrx_bridge_lib::AppState;
use txrx_bridge_lib::config::timeouts_config::Timeouts;
use txrx_bridge_lib::core::bluetooth::{EmulatedBackend, EmulatedDevice};
use txrx_bridge_lib::core::{EventHandler, EventKind, TxRxError, TxRxEvent};

use common::*;

async fn app_state(backend: &EmulatedBackend) -> (AppState, Events) {
    let state = AppState::new(test_config(), Arc::new(backend.clone())).await;
    let events = Events::record(state.manager.dispatcher());
    (state, events)
}

fn reply<T: Send + 'static>() -> (
    impl FnOnce(Result<T, TxRxError>) + Send + 'static,
    oneshot::Receiver<Result<T, TxRxError>>,
) {
    let (tx, rx) = oneshot::channel();
    (
        move |result: Result<T, TxRxError>| {
            let _ = tx.send(result);
        },
        rx,
    )
}

async fn connect_bridge(state: &AppState, events: &mut Events, address: &str) {
    state.bridge.start_scan();
    events.wait_for_found(address).await;
    state.bridge.stop_scan();
    events.wait_for(EventKind::ScanStopped).await;
    state.bridge.connect(address);
    assert_eq!(
        events.wait_for(EventKind::DeviceConnected).await,
        TxRxEvent::DeviceConnected { address: address.to_string() }
    );
}

#[tokio::test]
async fn test_set_then_get_timeouts() {
    let (state, _events) = app_state(&backend_with(vec![])).await;

    let (done, set) = reply();
    state.bridge.set_timeouts(5000.0, 2000.0, 3000.0, 1000.0, done);
    assert_eq!(received(set).await, Ok(()));

    let (done, got) = reply();
    state.bridge.get_timeouts(done);
    assert_eq!(
        received(got).await,
        Ok(Timeouts {
            connection_timeout: 5000,
            write_timeout: 2000,
            first_read_timeout: 3000,
            later_read_timeout: 1000,
        })
    );
}

#[tokio::test]
async fn test_timeouts_round_trip_for_valid_tuples() {
    let (state, _events) = app_state(&backend_with(vec![])).await;
    let tuples = [
        [0.0, 0.0, 0.0, 0.0],
        [1.0, 2.0, 3.0, 4.0],
        [u32::MAX as f64, 0.0, 250.0, 1e6],
    ];

    for [connection, write, first_read, later_read] in tuples {
        let (done, set) = reply();
        state.bridge.set_timeouts(connection, write, first_read, later_read, done);
        assert_eq!(received(set).await, Ok(()));

        let (done, got) = reply();
        state.bridge.get_timeouts(done);
        let got = received(got).await.unwrap();
        assert_eq!(
            [got.connection_timeout, got.write_timeout, got.first_read_timeout, got.later_read_timeout],
            [connection as u64, write as u64, first_read as u64, later_read as u64]
        );
    }
}

#[tokio::test]
async fn test_invalid_timeouts_change_nothing() {
    let (state, _events) = app_state(&backend_with(vec![])).await;
    let before = state.manager.get_timeouts();

    for [connection, write, first_read, later_read] in [
        [-1.0, 2000.0, 2000.0, 500.0],
        [1000.0, f64::NAN, 2000.0, 500.0],
        [1000.0, 2000.0, 2.5, 500.0],
        [1000.0, 2000.0, 2000.0, f64::INFINITY],
    ] {
        let (done, set) = reply();
        state.bridge.set_timeouts(connection, write, first_read, later_read, done);
        assert!(matches!(
            received(set).await,
            Err(TxRxError::InvalidTimeoutValue { .. })
        ));
    }
    assert_eq!(state.manager.get_timeouts(), before);
}

#[tokio::test]
async fn test_default_timeouts_restored() {
    let (state, _events) = app_state(&backend_with(vec![])).await;

    let (done, set) = reply();
    state.bridge.set_timeouts(1.0, 2.0, 3.0, 4.0, done);
    received(set).await.unwrap();

    let (done, reset) = reply();
    state.bridge.set_default_timeouts(done);
    assert_eq!(received(reset).await, Ok(()));

    let (done, got) = reply();
    state.bridge.get_timeouts(done);
    assert_eq!(received(got).await, Ok(Timeouts::default()));
    assert_eq!(Timeouts::default().connection_timeout, 10000);
}

#[tokio::test]
async fn test_is_device_connected_without_session() {
    let (state, _events) = app_state(&backend_with(vec![])).await;

    let (done, answer) = reply();
    state.bridge.is_device_connected(DEVICE, done);
    assert_eq!(received(answer).await, Ok(false));
}

#[tokio::test]
async fn test_connect_then_query() {
    let backend = backend_with(vec![
        EmulatedDevice::new(DEVICE, None),
        EmulatedDevice::new(OTHER_DEVICE, None),
    ]);
    let (state, mut events) = app_state(&backend).await;
    connect_bridge(&state, &mut events, DEVICE).await;

    let (done, answer) = reply();
    state.bridge.is_device_connected(DEVICE, done);
    assert_eq!(received(answer).await, Ok(true));

    let (done, answer) = reply();
    state.bridge.is_device_connected(OTHER_DEVICE, done);
    assert_eq!(received(answer).await, Ok(false));
}

#[tokio::test]
async fn test_stop_scan_twice() {
    let backend = backend_with(vec![EmulatedDevice::new(DEVICE, None)]);
    let (state, mut events) = app_state(&backend).await;

    state.bridge.start_scan();
    events.wait_for_found(DEVICE).await;
    state.bridge.stop_scan();
    state.bridge.stop_scan();
    events.wait_for(EventKind::ScanStopped).await;

    // Both stops have run once this answer arrives on the same lane
    let (done, answer) = reply();
    state.bridge.is_device_connected(DEVICE, done);
    received(answer).await.unwrap();
    state.manager.dispatcher().flush().await;

    let rest = events.drain();
    assert_eq!(count(&rest, EventKind::ScanStopped), 0);
    assert_eq!(count(&rest, EventKind::ScanError), 0);
}

#[tokio::test]
async fn test_transfers_fail_after_disconnect() {
    let backend = backend_with(vec![EmulatedDevice::new(DEVICE, None)]);
    let (state, mut events) = app_state(&backend).await;
    connect_bridge(&state, &mut events, DEVICE).await;

    state.bridge.disconnect();
    events.wait_for(EventKind::DeviceDisconnected).await;

    state.bridge.read_data();
    assert_eq!(
        events.wait_for(EventKind::ReadError).await,
        TxRxEvent::ReadError(TxRxError::NoActiveConnection)
    );

    let (done, written) = reply();
    state.bridge.write_data("AT\r\n", done);
    assert_eq!(received(written).await, Err(TxRxError::NoActiveConnection));
}

#[tokio::test]
async fn test_write_completions_keep_request_order() {
    let backend = backend_with(vec![EmulatedDevice::new(DEVICE, None)]);
    let (state, mut events) = app_state(&backend).await;
    connect_bridge(&state, &mut events, DEVICE).await;

    let order: Arc<Mutex<Vec<usize>>> = Arc::default();
    let (last_tx, last_rx) = oneshot::channel();
    let mut last_tx = Some(last_tx);
    for i in 0..3 {
        let order = order.clone();
        let last = if i == 2 { last_tx.take() } else { None };
        state.bridge.write_data(&format!("CMD{}\r\n", i), move |result| {
            assert_eq!(result, Ok(()));
            order.lock().unwrap().push(i);
            if let Some(last) = last {
                let _ = last.send(());
            }
        });
    }
    received(last_rx).await;

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    assert_eq!(backend.written(DEVICE), b"CMD0\r\nCMD1\r\nCMD2\r\n".to_vec());
}

#[tokio::test]
async fn test_second_registration_wins() {
    let backend = backend_with(vec![]);
    let (state, _events) = app_state(&backend).await;
    let seen: Arc<Mutex<Vec<&'static str>>> = Arc::default();

    let first = seen.clone();
    state.bridge.register_callback(EventKind::ReadError, move |_| first.lock().unwrap().push("first"));
    let second = seen.clone();
    state
        .bridge
        .register_named_callback("onReadError", move |_| second.lock().unwrap().push("second"))
        .unwrap();

    state.bridge.read_data();
    state.bridge.read_data();
    tokio::time::sleep(Duration::from_millis(50)).await;
    state.manager.dispatcher().flush().await;

    assert_eq!(*seen.lock().unwrap(), vec!["second", "second"]);
    assert!(state.bridge.register_named_callback("onNothing", |_| {}).is_err());
}

#[tokio::test]
async fn test_register_callbacks_installs_all() {
    let backend = backend_with(vec![EmulatedDevice::new(DEVICE, None)]);
    let state = AppState::new(test_config(), Arc::new(backend.clone())).await;
    let seen: Arc<Mutex<Vec<EventKind>>> = Arc::default();

    let handlers: Vec<(EventKind, EventHandler)> = [EventKind::ScanStarted, EventKind::DeviceFound]
        .into_iter()
        .map(|kind| {
            let seen = seen.clone();
            let handler: EventHandler = Arc::new(move |event: &TxRxEvent| seen.lock().unwrap().push(event.kind()));
            (kind, handler)
        })
        .collect();
    state.bridge.register_callbacks(handlers);

    state.bridge.start_scan();
    tokio::time::sleep(Duration::from_millis(50)).await;
    state.bridge.stop_scan();
    tokio::time::sleep(Duration::from_millis(20)).await;
    state.manager.dispatcher().flush().await;

    let seen = seen.lock().unwrap();
    assert_eq!(seen.first(), Some(&EventKind::ScanStarted));
    assert_eq!(seen.iter().filter(|k| **k == EventKind::DeviceFound).count(), 1);
}

#[tokio::test]
async fn test_operation_errors_become_events() {
    let backend = backend_with(vec![]);
    backend.set_scan_available(false);
    let (state, mut events) = app_state(&backend).await;

    state.bridge.start_scan();
    assert!(matches!(
        events.next().await,
        TxRxEvent::ScanError(TxRxError::ScanUnavailable(_))
    ));

    state.bridge.connect(DEVICE);
    assert_eq!(
        events.next().await,
        TxRxEvent::ConnectionError(TxRxError::DeviceNotFound(DEVICE.to_string()))
    );
}
