//! Event dispatcher
//! Routes events and operation completions to the caller. Everything goes
//! through one queue drained by one task, so the caller sees a single ordered
//! delivery sequence and never two callbacks at once.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};

use log::{debug, error};
use tokio::sync::{mpsc, oneshot};

use crate::core::error::TxRxError;
use crate::core::events::{EventKind, TxRxEvent};

/// Log records from this module are never mirrored back as `Log` events.
pub(crate) const LOG_TARGET: &str = module_path!();

/// Handler installed for one event kind.
pub type EventHandler = Arc<dyn Fn(&TxRxEvent) + Send + Sync>;

/// Success/error callback of a single operation.
pub type Completion<T> = Box<dyn FnOnce(Result<T, TxRxError>) + Send + 'static>;

enum Delivery {
    Event(TxRxEvent),
    Callback(Box<dyn FnOnce() + Send>),
}

#[derive(Clone)]
pub struct EventDispatcher {
    handlers: Arc<RwLock<HashMap<EventKind, EventHandler>>>,
    tx: mpsc::UnboundedSender<Delivery>,
}

impl EventDispatcher {
    /// Creates the dispatcher and spawns its delivery task.
    /// Must be called from within a Tokio runtime.
    pub fn new() -> Self {
        let handlers: Arc<RwLock<HashMap<EventKind, EventHandler>>> = Arc::default();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::deliver(handlers.clone(), rx));
        Self { handlers, tx }
    }

    /// Installs `handler` for `kind`, replacing any previous one.
    pub fn register<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&TxRxEvent) + Send + Sync + 'static,
    {
        self.register_handler(kind, Arc::new(handler));
    }

    pub fn register_handler(&self, kind: EventKind, handler: EventHandler) {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        if handlers.insert(kind, handler).is_some() {
            debug!(target: LOG_TARGET, "Replaced callback for {}", kind);
        } else {
            debug!(target: LOG_TARGET, "Registered callback for {}", kind);
        }
    }

    /// Same as calling `register_handler` for every entry.
    pub fn register_all<I>(&self, handlers: I)
    where
        I: IntoIterator<Item = (EventKind, EventHandler)>,
    {
        for (kind, handler) in handlers {
            self.register_handler(kind, handler);
        }
    }

    pub fn unregister(&self, kind: EventKind) {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.remove(&kind);
    }

    pub fn is_registered(&self, kind: EventKind) -> bool {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers.contains_key(&kind)
    }

    /// Queues an event for delivery.
    pub fn emit(&self, event: TxRxEvent) {
        if self.tx.send(Delivery::Event(event)).is_err() {
            error!(target: LOG_TARGET, "Delivery task is gone, event dropped");
        }
    }

    /// Queues the completion of an operation on the same delivery sequence as events.
    pub fn complete<T: Send + 'static>(&self, completion: Completion<T>, result: Result<T, TxRxError>) {
        let callback = Box::new(move || completion(result));
        if self.tx.send(Delivery::Callback(callback)).is_err() {
            error!(target: LOG_TARGET, "Delivery task is gone, completion dropped");
        }
    }

    /// Resolves once everything queued before this call has been delivered.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        let callback = Box::new(move || {
            let _ = done_tx.send(());
        });
        if self.tx.send(Delivery::Callback(callback)).is_ok() {
            let _ = done_rx.await;
        }
    }

    async fn deliver(
        handlers: Arc<RwLock<HashMap<EventKind, EventHandler>>>,
        mut rx: mpsc::UnboundedReceiver<Delivery>,
    ) {
        while let Some(delivery) = rx.recv().await {
            match delivery {
                Delivery::Event(event) => {
                    let kind = event.kind();
                    let handler = {
                        let handlers = handlers.read().unwrap_or_else(|e| e.into_inner());
                        handlers.get(&kind).cloned()
                    };
                    match handler {
                        Some(handler) => {
                            if catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
                                error!(target: LOG_TARGET, "Callback for {} panicked", kind);
                            }
                        }
                        None => debug!(target: LOG_TARGET, "No callback for {}, event dropped", kind),
                    }
                }
                Delivery::Callback(callback) => {
                    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
                        error!(target: LOG_TARGET, "Completion callback panicked");
                    }
                }
            }
        }
        debug!(target: LOG_TARGET, "Delivery task finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> EventHandler) {
        let seen: Arc<Mutex<Vec<String>>> = Arc::default();
        let seen_for_factory = seen.clone();
        let factory = move |tag: &str| -> EventHandler {
            let seen = seen_for_factory.clone();
            let tag = tag.to_string();
            Arc::new(move |event: &TxRxEvent| {
                seen.lock().unwrap().push(format!("{}:{}", tag, event.kind()));
            })
        };
        (seen, factory)
    }

    #[tokio::test]
    async fn test_second_registration_replaces_first() {
        let dispatcher = EventDispatcher::new();
        let (seen, handler) = recorder();
        dispatcher.register_handler(EventKind::ScanStopped, handler("first"));
        dispatcher.register_handler(EventKind::ScanStopped, handler("second"));

        dispatcher.emit(TxRxEvent::ScanStopped);
        dispatcher.emit(TxRxEvent::ScanStopped);
        dispatcher.flush().await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["second:afterStopScan", "second:afterStopScan"]
        );
    }

    #[tokio::test]
    async fn test_events_and_completions_share_one_order() {
        let dispatcher = EventDispatcher::new();
        let (seen, handler) = recorder();
        dispatcher.register_all([
            (EventKind::ScanStarted, handler("a")),
            (EventKind::ScanStopped, handler("a")),
        ]);

        dispatcher.emit(TxRxEvent::ScanStarted);
        let seen_by_completion = seen.clone();
        dispatcher.complete(
            Box::new(move |result: Result<u32, TxRxError>| {
                seen_by_completion.lock().unwrap().push(format!("done:{}", result.unwrap()));
            }),
            Ok(7),
        );
        dispatcher.emit(TxRxEvent::ScanStopped);
        dispatcher.flush().await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["a:onScanStarted", "done:7", "a:afterStopScan"]
        );
    }

    #[tokio::test]
    async fn test_unregistered_events_are_dropped() {
        let dispatcher = EventDispatcher::new();
        let (seen, handler) = recorder();
        dispatcher.register_handler(EventKind::ReadTimeout, handler("x"));
        dispatcher.unregister(EventKind::ReadTimeout);
        assert!(!dispatcher.is_registered(EventKind::ReadTimeout));

        dispatcher.emit(TxRxEvent::ReadTimeout);
        dispatcher.flush().await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_panicking_callback_does_not_stop_delivery() {
        let dispatcher = EventDispatcher::new();
        let (seen, handler) = recorder();
        dispatcher.register(EventKind::WriteTimeout, |_| panic!("boom"));
        dispatcher.register_handler(EventKind::ReadTimeout, handler("ok"));

        dispatcher.emit(TxRxEvent::WriteTimeout);
        dispatcher.emit(TxRxEvent::ReadTimeout);
        dispatcher.flush().await;
        assert_eq!(*seen.lock().unwrap(), vec!["ok:onReadNotifyTimeout"]);
    }
}
