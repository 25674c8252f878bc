use std::time::Duration;

use anyhow::{Context, Result, bail};
use log::info;
use tokio::sync::mpsc;

use txrx_bridge_lib::core::{EventKind, TxRxEvent};
use txrx_bridge_lib::{AppConfig, AppState, setup_logging};

const USAGE: &str = "usage: txrx-bridge scan [SECONDS] | txrx-bridge send ADDRESS DATA";

#[tokio::main]
async fn main() -> Result<()> {
    let config = match AppConfig::default_dir() {
        Some(dir) => AppConfig::load_config(&dir).await?,
        None => AppConfig::default(),
    };
    setup_logging(&config.logging);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let state = AppState::with_bluest(config)
        .await
        .context("Failed to initialize AppState with the Bluetooth adapter")?;

    let (tx, mut events) = mpsc::unbounded_channel();
    for kind in EventKind::ALL {
        let tx = tx.clone();
        state.bridge.register_callback(kind, move |event: &TxRxEvent| {
            let _ = tx.send(event.clone());
        });
    }

    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["scan", rest @ ..] => {
            let secs = match rest.first() {
                Some(secs) => secs.parse().context("SECONDS must be a number")?,
                None => 10,
            };
            state.bridge.start_scan();
            let deadline = tokio::time::sleep(Duration::from_secs(secs));
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    Some(event) = events.recv() => print_event(&event),
                }
            }
            state.bridge.stop_scan();
            while let Some(event) = events.recv().await {
                print_event(&event);
                if event.kind() == EventKind::ScanStopped {
                    break;
                }
            }
        }
        ["send", address, data] => {
            info!("Looking for {}", address);
            state.bridge.start_scan();
            while let Some(event) = events.recv().await {
                print_event(&event);
                match event {
                    TxRxEvent::DeviceFound(found) if found.address.eq_ignore_ascii_case(address) => {
                        state.bridge.stop_scan();
                        state.bridge.connect(address);
                    }
                    TxRxEvent::DeviceConnected { .. } => {
                        let line = format!("{}\r\n", data);
                        state.bridge.write_data(&line, |_| {});
                    }
                    TxRxEvent::DataRead { .. } | TxRxEvent::ReadTimeout => break,
                    TxRxEvent::ConnectionError(_) | TxRxEvent::ConnectionTimeout { .. } | TxRxEvent::WriteError(_) => {
                        bail!("Could not send to {}", address)
                    }
                    _ => {}
                }
            }
            state.bridge.disconnect();
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        _ => bail!(USAGE),
    }
    Ok(())
}

fn print_event(event: &TxRxEvent) {
    match serde_json::to_string(event) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to serialize event: {}", e),
    }
}
