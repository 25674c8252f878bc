//! Transfer engine
//! One worker per session owns the notification stream and executes reads and
//! writes strictly in request order. Data arriving while no read is active is
//! reported as passive notification data.

use std::sync::Arc;

use futures_util::StreamExt;
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::backend::{Link, NotificationStream};
use crate::core::dispatcher::{Completion, EventDispatcher};
use crate::core::error::TxRxError;
use crate::core::events::TxRxEvent;
use crate::core::timeouts::TimeoutStore;

/// A queued transfer operation
pub enum TransferRequest {
    Read,
    Write {
        data: String,
        completion: Completion<()>,
    },
}

impl TransferRequest {
    /// Fails the request without touching the link.
    pub(crate) fn reject(self, dispatcher: &EventDispatcher, error: TxRxError) {
        match self {
            TransferRequest::Read => dispatcher.emit(TxRxEvent::ReadError(error)),
            TransferRequest::Write { completion, .. } => {
                dispatcher.emit(TxRxEvent::WriteError(error.clone()));
                dispatcher.complete(completion, Err(error));
            }
        }
    }
}

/// Why a worker stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Cancelled by the connection manager
    Shutdown,
    /// The notification stream ended or failed
    LinkLost,
}

/// Sending side of a worker's request queue
#[derive(Clone)]
pub struct TransferHandle {
    tx: mpsc::UnboundedSender<TransferRequest>,
}

impl TransferHandle {
    /// Queues a request; hands it back if the worker is gone.
    pub fn submit(&self, request: TransferRequest) -> Result<(), TransferRequest> {
        self.tx.send(request).map_err(|e| e.0)
    }
}

pub struct TransferWorker {
    link: Arc<dyn Link>,
    incoming: NotificationStream,
    requests: mpsc::UnboundedReceiver<TransferRequest>,
    dispatcher: EventDispatcher,
    timeouts: TimeoutStore,
    read_after_write: bool,
    cancel_token: CancellationToken,
}

impl TransferWorker {
    pub fn new(
        link: Arc<dyn Link>,
        incoming: NotificationStream,
        dispatcher: EventDispatcher,
        timeouts: TimeoutStore,
        read_after_write: bool,
        cancel_token: CancellationToken,
    ) -> (Self, TransferHandle) {
        let (tx, requests) = mpsc::unbounded_channel();
        let worker = Self {
            link,
            incoming,
            requests,
            dispatcher,
            timeouts,
            read_after_write,
            cancel_token,
        };
        (worker, TransferHandle { tx })
    }

    pub async fn run(mut self) -> WorkerExit {
        info!("Transfer worker started for {}", self.link.address());
        let exit = loop {
            tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => break WorkerExit::Shutdown,
                // Queued requests win over incoming data
                request = self.requests.recv() => match request {
                    Some(request) => {
                        if let Err(exit) = self.handle(request).await {
                            break exit;
                        }
                    }
                    None => break WorkerExit::Shutdown,
                },
                chunk = self.incoming.next() => match chunk {
                    Some(Ok(data)) => {
                        debug!("Received notification data: {:?}", data);
                        self.dispatcher.emit(TxRxEvent::DataNotified { data: decode(&data) });
                    }
                    Some(Err(e)) => {
                        warn!("Error in notification stream: {}", e);
                        break WorkerExit::LinkLost;
                    }
                    None => break WorkerExit::LinkLost,
                },
            }
        };

        // Anything still queued can no longer reach the device
        self.requests.close();
        while let Ok(request) = self.requests.try_recv() {
            request.reject(&self.dispatcher, TxRxError::NoActiveConnection);
        }
        info!("Transfer worker stopped ({:?})", exit);
        exit
    }

    async fn handle(&mut self, request: TransferRequest) -> Result<(), WorkerExit> {
        match request {
            TransferRequest::Read => self.read_answer().await,
            TransferRequest::Write { data, completion } => self.write(data, completion).await,
        }
    }

    async fn write(&mut self, data: String, completion: Completion<()>) -> Result<(), WorkerExit> {
        let write_timeout = self.timeouts.get().write();
        let link = self.link.clone();
        let send = async {
            for chunk in link.profile().chunks(data.as_bytes()) {
                link.write(chunk).await?;
            }
            Ok::<(), TxRxError>(())
        };

        let outcome = tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => None,
            result = timeout(write_timeout, send) => Some(result),
        };
        let Some(result) = outcome else {
            TransferRequest::Write { data, completion }
                .reject(&self.dispatcher, TxRxError::NoActiveConnection);
            return Err(WorkerExit::Shutdown);
        };

        match result {
            Ok(Ok(())) => {
                debug!("Sent {} bytes", data.len());
                self.dispatcher.emit(TxRxEvent::DataWritten { data });
                self.dispatcher.complete(completion, Ok(()));
                if self.read_after_write {
                    return self.read_answer().await;
                }
            }
            Ok(Err(e)) => {
                warn!("Write failed: {}", e);
                self.dispatcher.emit(TxRxEvent::WriteError(e.clone()));
                self.dispatcher.complete(completion, Err(e));
            }
            Err(_) => {
                warn!("Write not confirmed within {:?}", write_timeout);
                self.dispatcher.emit(TxRxEvent::WriteTimeout);
                self.dispatcher.complete(completion, Err(TxRxError::WriteTimeout));
            }
        }
        Ok(())
    }

    /// Collects one answer: waits `first_read` for the first chunk, then
    /// `later_read` for each following one, and stops early on the terminator.
    async fn read_answer(&mut self) -> Result<(), WorkerExit> {
        let timeouts = self.timeouts.get();
        let link = self.link.clone();
        let profile = link.profile();
        let mut buffer: Vec<u8> = Vec::new();
        let mut wait = timeouts.first_read();

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => {
                    self.dispatcher.emit(TxRxEvent::ReadError(TxRxError::NoActiveConnection));
                    return Err(WorkerExit::Shutdown);
                }
                next = timeout(wait, self.incoming.next()) => next,
            };
            match next {
                Err(_) => break,
                Ok(Some(Ok(chunk))) => {
                    debug!("Read chunk: {:?}", chunk);
                    buffer.extend_from_slice(&chunk);
                    if profile.is_complete_answer(&buffer) {
                        break;
                    }
                    wait = timeouts.later_read();
                }
                Ok(Some(Err(e))) => {
                    warn!("Error in notification stream during read: {}", e);
                    self.dispatcher.emit(TxRxEvent::ReadError(e));
                    return Err(WorkerExit::LinkLost);
                }
                Ok(None) => {
                    self.dispatcher.emit(TxRxEvent::ReadError(TxRxError::NoActiveConnection));
                    return Err(WorkerExit::LinkLost);
                }
            }
        }

        if buffer.is_empty() {
            debug!("No data within {:?}", timeouts.first_read());
            self.dispatcher.emit(TxRxEvent::ReadTimeout);
        } else {
            self.dispatcher.emit(TxRxEvent::DataRead { data: decode(&buffer) });
        }
        Ok(())
    }
}

fn decode(data: &[u8]) -> String {
    String::from_utf8_lossy(data).into_owned()
}
