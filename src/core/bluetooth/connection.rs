//! Connection handling for the TxRx session
//! Owns the single session: `Idle -> Connecting -> Connected -> Disconnecting -> Idle`.
//! Each connect attempt gets a new generation, so completions of a superseded
//! attempt or worker are recognised and ignored.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::connection_config::{ConnectionConfig, TransferConfig};
use crate::core::bluetooth::backend::{BleBackend, Link, NotificationStream};
use crate::core::bluetooth::registry::DeviceRegistry;
use crate::core::bluetooth::transfer::{TransferHandle, TransferWorker, WorkerExit};
use crate::core::bluetooth::types::ConnectionState;
use crate::core::dispatcher::EventDispatcher;
use crate::core::error::TxRxError;
use crate::core::events::TxRxEvent;
use crate::core::timeouts::TimeoutStore;
use crate::utils::normalize_address;

#[derive(Default)]
struct Session {
    state: ConnectionState,
    address: Option<String>,
    generation: u64,
    cancel_token: Option<CancellationToken>,
    link: Option<Arc<dyn Link>>,
    transfer: Option<TransferHandle>,
    worker: Option<JoinHandle<()>>,
}

impl Session {
    /// Back to `Idle`, returning what the caller still has to shut down.
    fn reset(&mut self) -> (Option<String>, Option<Arc<dyn Link>>, Option<JoinHandle<()>>) {
        self.state = ConnectionState::Idle;
        self.generation += 1;
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
        self.transfer = None;
        (self.address.take(), self.link.take(), self.worker.take())
    }
}

enum Attempt {
    Linked(Arc<dyn Link>, NotificationStream),
    Failed(TxRxError),
    TimedOut,
    Cancelled,
}

/// Connection manager for the session
#[derive(Clone)]
pub struct ConnectionManager {
    backend: Arc<dyn BleBackend>,
    registry: DeviceRegistry,
    dispatcher: EventDispatcher,
    timeouts: TimeoutStore,
    config: ConnectionConfig,
    transfer_config: TransferConfig,
    session: Arc<Mutex<Session>>,
}

impl ConnectionManager {
    pub fn new(
        backend: Arc<dyn BleBackend>,
        registry: DeviceRegistry,
        dispatcher: EventDispatcher,
        timeouts: TimeoutStore,
        config: ConnectionConfig,
        transfer_config: TransferConfig,
    ) -> Self {
        Self {
            backend,
            registry,
            dispatcher,
            timeouts,
            config,
            transfer_config,
            session: Arc::new(Mutex::new(Session::default())),
        }
    }

    /// Moves the session to `Connecting` and establishes it in the background.
    /// The outcome is reported as `DeviceConnected`, `ConnectionTimeout` or `ConnectionError`.
    pub async fn connect(&self, address: &str) -> Result<(), TxRxError> {
        let address = normalize_address(address);
        let mut session = self.session.lock().await;
        match session.state {
            ConnectionState::Idle => {}
            ConnectionState::Connecting => {
                return Err(TxRxError::AlreadyConnecting(session.address.clone().unwrap_or_default()));
            }
            ConnectionState::Connected | ConnectionState::Disconnecting => {
                return Err(TxRxError::AlreadyConnected(session.address.clone().unwrap_or_default()));
            }
        }
        if !self.registry.contains(&address) {
            return Err(TxRxError::DeviceNotFound(address));
        }

        let cancel_token = CancellationToken::new();
        session.state = ConnectionState::Connecting;
        session.address = Some(address.clone());
        session.generation += 1;
        session.cancel_token = Some(cancel_token.clone());
        let generation = session.generation;
        drop(session);

        self.registry.set_state(&address, ConnectionState::Connecting);
        info!("Connecting to {}...", address);
        let manager = self.clone();
        tokio::spawn(async move { manager.establish(address, generation, cancel_token).await });
        Ok(())
    }

    async fn establish(self, address: String, generation: u64, cancel_token: CancellationToken) {
        let connection_timeout = self.timeouts.get().connection();
        let attempt = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => Attempt::Cancelled,
            result = timeout(connection_timeout, self.connect_with_retry(&address)) => match result {
                Ok(Ok((link, incoming))) => Attempt::Linked(link, incoming),
                Ok(Err(e)) => Attempt::Failed(e),
                Err(_) => Attempt::TimedOut,
            },
        };

        let mut session = self.session.lock().await;
        if session.generation != generation || session.state != ConnectionState::Connecting {
            drop(session);
            debug!("Connect attempt to {} was superseded", address);
            if let Attempt::Linked(link, _) = attempt {
                self.release_link(link).await;
            }
            return;
        }

        match attempt {
            Attempt::Linked(link, incoming) => {
                let (worker, transfer) = TransferWorker::new(
                    link.clone(),
                    incoming,
                    self.dispatcher.clone(),
                    self.timeouts.clone(),
                    self.transfer_config.read_after_write,
                    cancel_token.child_token(),
                );
                session.state = ConnectionState::Connected;
                session.link = Some(link);
                session.transfer = Some(transfer);
                self.registry.set_state(&address, ConnectionState::Connected);
                info!("Connected to {}", address);
                self.dispatcher.emit(TxRxEvent::DeviceConnected {
                    address: address.clone(),
                });

                let manager = self.clone();
                session.worker = Some(tokio::spawn(async move {
                    if worker.run().await == WorkerExit::LinkLost {
                        manager.on_link_lost(generation).await;
                    }
                }));
            }
            Attempt::TimedOut => {
                session.reset();
                self.registry.set_state(&address, ConnectionState::Idle);
                error!("Timeout while connecting to {} after {:?}", address, connection_timeout);
                self.dispatcher.emit(TxRxEvent::ConnectionTimeout { address });
            }
            Attempt::Failed(e) => {
                session.reset();
                self.registry.set_state(&address, ConnectionState::Idle);
                error!("Failed to connect to {}: {}", address, e);
                self.dispatcher.emit(TxRxEvent::ConnectionError(e));
            }
            // Handled by `disconnect`, which bumps the generation first
            Attempt::Cancelled => {}
        }
    }

    /// Connect with retry mechanism
    async fn connect_with_retry(
        &self,
        address: &str,
    ) -> Result<(Arc<dyn Link>, NotificationStream), TxRxError> {
        let max_retries = self.config.max_retries.max(1);
        let mut retry_count = 0;

        loop {
            match self.try_connect(address).await {
                Ok(linked) => {
                    info!("Successfully connected to device");
                    return Ok(linked);
                }
                Err(e) => {
                    retry_count += 1;
                    warn!("Connection attempt {} failed: {}", retry_count, e);
                    if !e.is_transient() || retry_count >= max_retries {
                        return Err(e);
                    }
                    info!("Retrying connection in {} ms...", self.config.retry_delay_ms);
                    tokio::time::sleep(Duration::from_millis(self.config.retry_delay_ms)).await;
                }
            }
        }
    }

    async fn try_connect(&self, address: &str) -> Result<(Arc<dyn Link>, NotificationStream), TxRxError> {
        info!("Initiating connection to {}...", address);
        let link = self.backend.connect(address, &self.config.profiles).await?;
        info!("Found serial service: {}", link.profile().service_uuid);

        info!("Setting up notifications...");
        match link.notifications().await {
            Ok(incoming) => Ok((link, incoming)),
            Err(e) => {
                if let Err(e) = link.disconnect().await {
                    debug!("Disconnect after failed subscription: {}", e);
                }
                Err(e)
            }
        }
    }

    /// Ends the session. Cancels a pending attempt when `Connecting`;
    /// does nothing when already `Idle`.
    pub async fn disconnect(&self) -> Result<(), TxRxError> {
        let mut session = self.session.lock().await;
        match session.state {
            ConnectionState::Idle | ConnectionState::Disconnecting => {
                debug!("No session to disconnect");
                Ok(())
            }
            ConnectionState::Connecting => {
                let (address, _, _) = session.reset();
                drop(session);
                if let Some(address) = address {
                    info!("Connect attempt to {} cancelled", address);
                    self.registry.set_state(&address, ConnectionState::Idle);
                    self.dispatcher.emit(TxRxEvent::DeviceDisconnected { address });
                }
                Ok(())
            }
            ConnectionState::Connected => {
                session.state = ConnectionState::Disconnecting;
                session.generation += 1;
                if let Some(token) = session.cancel_token.take() {
                    token.cancel();
                }
                session.transfer = None;
                let address = session.address.clone();
                let link = session.link.take();
                let worker = session.worker.take();
                drop(session);

                if let Some(worker) = worker {
                    if let Err(e) = worker.await {
                        error!("Transfer worker ended with a join error: {:?}", e);
                    }
                }
                if let Some(link) = link {
                    info!("Disconnecting from device {}", link.address());
                    self.release_link(link).await;
                }

                let mut session = self.session.lock().await;
                session.state = ConnectionState::Idle;
                session.address = None;
                drop(session);

                if let Some(address) = address {
                    self.registry.set_state(&address, ConnectionState::Idle);
                    info!("Successfully disconnected from {}", address);
                    self.dispatcher.emit(TxRxEvent::DeviceDisconnected { address });
                }
                Ok(())
            }
        }
    }

    async fn on_link_lost(&self, generation: u64) {
        let mut session = self.session.lock().await;
        if session.generation != generation || session.state != ConnectionState::Connected {
            return;
        }
        // The worker handle is the running task itself; dropping it detaches
        let (address, link, _) = session.reset();
        drop(session);

        if let Some(link) = link {
            self.release_link(link).await;
        }
        if let Some(address) = address {
            warn!("Link to {} lost", address);
            self.registry.set_state(&address, ConnectionState::Idle);
            self.dispatcher.emit(TxRxEvent::DeviceDisconnected { address });
        }
    }

    /// Closes the platform connection of `link`, bounded by the connection timeout.
    async fn release_link(&self, link: Arc<dyn Link>) {
        let limit = self.timeouts.get().connection();
        match timeout(limit, link.disconnect()).await {
            Ok(Ok(())) => debug!("Released link to {}", link.address()),
            Ok(Err(e)) => warn!("Platform disconnect from {} failed: {}", link.address(), e),
            Err(_) => warn!("{} after {:?}", TxRxError::DisconnectTimeout(link.address().to_string()), limit),
        }
    }

    /// True iff `address` is the device of the `Connected` session.
    pub async fn is_device_connected(&self, address: &str) -> bool {
        let session = self.session.lock().await;
        session.state == ConnectionState::Connected
            && session.address.as_deref() == Some(normalize_address(address).as_str())
    }

    pub async fn state(&self) -> ConnectionState {
        self.session.lock().await.state
    }

    /// Address of the session's device, unless `Idle`.
    pub async fn current_address(&self) -> Option<String> {
        self.session.lock().await.address.clone()
    }

    /// Request queue of the `Connected` session.
    pub async fn transfer_handle(&self) -> Result<TransferHandle, TxRxError> {
        let session = self.session.lock().await;
        match (&session.state, &session.transfer) {
            (ConnectionState::Connected, Some(transfer)) => Ok(transfer.clone()),
            _ => Err(TxRxError::NoActiveConnection),
        }
    }
}
