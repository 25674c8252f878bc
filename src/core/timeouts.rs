//! Timeout configuration store
//! Shared holder of the timeout tuple. Readers take a copy; writers replace
//! the whole tuple at once, after persisting it when a file is configured.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use log::info;

use crate::config::timeouts_config::Timeouts;
use crate::core::error::TxRxError;

#[derive(Clone)]
pub struct TimeoutStore {
    current: Arc<RwLock<Timeouts>>,
    file_path: Option<PathBuf>,
}

impl TimeoutStore {
    /// In-memory store starting from the defaults.
    pub fn new() -> Self {
        Self::with_timeouts(Timeouts::default(), None)
    }

    pub fn with_timeouts(timeouts: Timeouts, file_path: Option<PathBuf>) -> Self {
        Self {
            current: Arc::new(RwLock::new(timeouts)),
            file_path,
        }
    }

    /// Store backed by `file_path`, starting from the persisted tuple.
    pub async fn load(file_path: PathBuf) -> Self {
        let timeouts = Timeouts::load_config(&file_path).await;
        Self::with_timeouts(timeouts, Some(file_path))
    }

    pub fn get(&self) -> Timeouts {
        *self.current.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Replaces the tuple. Nothing changes if persisting fails.
    pub async fn set(&self, timeouts: Timeouts) -> Result<(), TxRxError> {
        if let Some(path) = &self.file_path {
            timeouts
                .save_config(path)
                .await
                .map_err(|e| TxRxError::Storage(e.to_string()))?;
        }
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = timeouts;
        info!("Timeouts updated: {:?}", timeouts);
        Ok(())
    }

    /// Validates script numbers and replaces the tuple as a unit.
    pub async fn set_millis(
        &self,
        connection_timeout: f64,
        write_timeout: f64,
        first_read_timeout: f64,
        later_read_timeout: f64,
    ) -> Result<(), TxRxError> {
        let timeouts = Timeouts::from_millis(
            connection_timeout,
            write_timeout,
            first_read_timeout,
            later_read_timeout,
        )?;
        self.set(timeouts).await
    }

    pub async fn reset(&self) -> Result<(), TxRxError> {
        self.set(Timeouts::default()).await
    }
}

impl Default for TimeoutStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_tuple_leaves_store_untouched() {
        let store = TimeoutStore::new();
        store.set_millis(5000.0, 2000.0, 3000.0, 1000.0).await.unwrap();
        let before = store.get();

        let err = store.set_millis(1.0, 2.0, 3.0, -4.0).await.unwrap_err();
        assert!(matches!(err, TxRxError::InvalidTimeoutValue { field: "laterReadTimeout", .. }));
        assert_eq!(store.get(), before);
    }

    #[tokio::test]
    async fn test_reset_restores_defaults() {
        let store = TimeoutStore::new();
        store.set_millis(1.0, 2.0, 3.0, 4.0).await.unwrap();
        store.reset().await.unwrap();
        assert_eq!(store.get(), Timeouts::default());
    }

    #[tokio::test]
    async fn test_persisted_tuple_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timeouts.json");
        let store = TimeoutStore::load(path.clone()).await;
        store.set_millis(7000.0, 1500.0, 2500.0, 250.0).await.unwrap();

        let reloaded = TimeoutStore::load(path).await;
        assert_eq!(reloaded.get(), store.get());
        assert_eq!(reloaded.get().write_timeout, 1500);
    }

    #[tokio::test]
    async fn test_failed_persist_keeps_previous_tuple() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the parent directory should be
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let store = TimeoutStore::with_timeouts(Timeouts::default(), Some(blocker.join("timeouts.json")));

        let err = store.set_millis(1.0, 2.0, 3.0, 4.0).await.unwrap_err();
        assert!(matches!(err, TxRxError::Storage(_)));
        assert_eq!(store.get(), Timeouts::default());
    }
}
