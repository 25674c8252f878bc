//! Bridge commands
//! This module defines every operation the scripting layer can invoke. Calls
//! never block and never fail synchronously: each one is queued on a lane and
//! its outcome comes back through the dispatcher, as an event or a completion.

use std::sync::Arc;

use log::{debug, error};
use tokio::sync::mpsc;

use crate::config::timeouts_config::Timeouts;
use crate::core::events::UnknownEventKind;
use crate::core::{Completion, EventHandler, EventKind, TxRxError, TxRxEvent, TxRxManager};

/// Commands of the control lane: scanning, session and settings.
enum ControlCommand {
    StartScan,
    StopScan,
    Connect(String),
    Disconnect,
    IsDeviceConnected(String, Completion<bool>),
    GetTimeouts(Completion<Timeouts>),
    SetTimeouts([f64; 4], Completion<()>),
    SetDefaultTimeouts(Completion<()>),
}

/// Commands of the transfer lane.
enum TransferCommand {
    Read,
    Write(String, Completion<()>),
}

/// Non-blocking facade over a `TxRxManager`
#[derive(Clone)]
pub struct TxRxBridge {
    manager: Arc<TxRxManager>,
    control: mpsc::UnboundedSender<ControlCommand>,
    transfer: mpsc::UnboundedSender<TransferCommand>,
}

impl TxRxBridge {
    /// Spawns the lanes. Must be called from within a Tokio runtime.
    pub fn new(manager: Arc<TxRxManager>) -> Self {
        let (control, control_rx) = mpsc::unbounded_channel();
        let (transfer, transfer_rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::run_control_lane(manager.clone(), control_rx));
        tokio::spawn(Self::run_transfer_lane(manager.clone(), transfer_rx));
        Self {
            manager,
            control,
            transfer,
        }
    }

    /// Starts scanning. Emits `ScanStarted`, then `DeviceFound` per new device.
    pub fn start_scan(&self) {
        self.send_control(ControlCommand::StartScan);
    }

    /// Stops scanning; a no-op when not scanning.
    pub fn stop_scan(&self) {
        self.send_control(ControlCommand::StopScan);
    }

    pub fn connect(&self, address: &str) {
        self.send_control(ControlCommand::Connect(address.to_string()));
    }

    pub fn disconnect(&self) {
        self.send_control(ControlCommand::Disconnect);
    }

    pub fn read_data(&self) {
        self.send_transfer(TransferCommand::Read);
    }

    pub fn write_data<F>(&self, data: &str, completion: F)
    where
        F: FnOnce(Result<(), TxRxError>) + Send + 'static,
    {
        self.send_transfer(TransferCommand::Write(data.to_string(), Box::new(completion)));
    }

    pub fn is_device_connected<F>(&self, address: &str, completion: F)
    where
        F: FnOnce(Result<bool, TxRxError>) + Send + 'static,
    {
        self.send_control(ControlCommand::IsDeviceConnected(
            address.to_string(),
            Box::new(completion),
        ));
    }

    pub fn get_timeouts<F>(&self, completion: F)
    where
        F: FnOnce(Result<Timeouts, TxRxError>) + Send + 'static,
    {
        self.send_control(ControlCommand::GetTimeouts(Box::new(completion)));
    }

    /// Replaces all four timeouts (milliseconds) at once, or none of them.
    pub fn set_timeouts<F>(
        &self,
        connection_timeout: f64,
        write_timeout: f64,
        first_read_timeout: f64,
        later_read_timeout: f64,
        completion: F,
    ) where
        F: FnOnce(Result<(), TxRxError>) + Send + 'static,
    {
        let values = [connection_timeout, write_timeout, first_read_timeout, later_read_timeout];
        self.send_control(ControlCommand::SetTimeouts(values, Box::new(completion)));
    }

    pub fn set_default_timeouts<F>(&self, completion: F)
    where
        F: FnOnce(Result<(), TxRxError>) + Send + 'static,
    {
        self.send_control(ControlCommand::SetDefaultTimeouts(Box::new(completion)));
    }

    /// Installs `handler` for `kind`; the last registration wins.
    pub fn register_callback<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&TxRxEvent) + Send + Sync + 'static,
    {
        self.manager.register_callback(kind, handler);
    }

    /// Same as `register_callback`, keyed by the plugin callback name (`onReadData`, ...).
    pub fn register_named_callback<F>(&self, name: &str, handler: F) -> Result<(), UnknownEventKind>
    where
        F: Fn(&TxRxEvent) + Send + Sync + 'static,
    {
        let kind: EventKind = name.parse()?;
        self.register_callback(kind, handler);
        Ok(())
    }

    pub fn register_callbacks<I>(&self, handlers: I)
    where
        I: IntoIterator<Item = (EventKind, EventHandler)>,
    {
        self.manager.register_callbacks(handlers);
    }

    pub fn manager(&self) -> &Arc<TxRxManager> {
        &self.manager
    }

    fn send_control(&self, command: ControlCommand) {
        if let Err(e) = self.control.send(command) {
            error!("Control lane is closed");
            Self::reject_control(&self.manager, e.0, TxRxError::BridgeUnavailable("control lane closed".to_string()));
        }
    }

    fn send_transfer(&self, command: TransferCommand) {
        if let Err(e) = self.transfer.send(command) {
            error!("Transfer lane is closed");
            let error = TxRxError::BridgeUnavailable("transfer lane closed".to_string());
            let dispatcher = self.manager.dispatcher();
            match e.0 {
                TransferCommand::Read => dispatcher.emit(TxRxEvent::ReadError(error)),
                TransferCommand::Write(_, completion) => {
                    dispatcher.emit(TxRxEvent::WriteError(error.clone()));
                    dispatcher.complete(completion, Err(error));
                }
            }
        }
    }

    /// Routes the failure of a control command to its error channel.
    fn reject_control(manager: &TxRxManager, command: ControlCommand, error: TxRxError) {
        let dispatcher = manager.dispatcher();
        match command {
            ControlCommand::StartScan | ControlCommand::StopScan => {
                dispatcher.emit(TxRxEvent::ScanError(error))
            }
            ControlCommand::Connect(_) | ControlCommand::Disconnect => {
                dispatcher.emit(TxRxEvent::ConnectionError(error))
            }
            ControlCommand::IsDeviceConnected(_, completion) => dispatcher.complete(completion, Err(error)),
            ControlCommand::GetTimeouts(completion) => dispatcher.complete(completion, Err(error)),
            ControlCommand::SetTimeouts(_, completion) | ControlCommand::SetDefaultTimeouts(completion) => {
                dispatcher.complete(completion, Err(error))
            }
        }
    }

    async fn run_control_lane(manager: Arc<TxRxManager>, mut rx: mpsc::UnboundedReceiver<ControlCommand>) {
        while let Some(command) = rx.recv().await {
            Self::handle_control(&manager, command).await;
        }
        debug!("Control lane closed");
    }

    async fn handle_control(manager: &TxRxManager, command: ControlCommand) {
        let dispatcher = manager.dispatcher();
        let result = match command {
            ControlCommand::StartScan => manager.start_scan().await.map_err(|e| (ControlCommand::StartScan, e)),
            ControlCommand::StopScan => manager.stop_scan().await.map_err(|e| (ControlCommand::StopScan, e)),
            ControlCommand::Connect(address) => {
                let result = manager.connect(&address).await;
                result.map_err(|e| (ControlCommand::Connect(address), e))
            }
            ControlCommand::Disconnect => manager.disconnect().await.map_err(|e| (ControlCommand::Disconnect, e)),
            ControlCommand::IsDeviceConnected(address, completion) => {
                let connected = manager.is_device_connected(&address).await;
                dispatcher.complete(completion, Ok(connected));
                Ok(())
            }
            ControlCommand::GetTimeouts(completion) => {
                dispatcher.complete(completion, Ok(manager.get_timeouts()));
                Ok(())
            }
            ControlCommand::SetTimeouts([connection, write, first_read, later_read], completion) => {
                let result = manager.set_timeouts(connection, write, first_read, later_read).await;
                dispatcher.complete(completion, result);
                Ok(())
            }
            ControlCommand::SetDefaultTimeouts(completion) => {
                dispatcher.complete(completion, manager.set_default_timeouts().await);
                Ok(())
            }
        };
        if let Err((command, e)) = result {
            error!("{}", e);
            Self::reject_control(manager, command, e);
        }
    }

    async fn run_transfer_lane(manager: Arc<TxRxManager>, mut rx: mpsc::UnboundedReceiver<TransferCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                TransferCommand::Read => manager.read_data().await,
                TransferCommand::Write(data, completion) => manager.write_data(data, completion).await,
            }
        }
        debug!("Transfer lane closed");
    }
}
