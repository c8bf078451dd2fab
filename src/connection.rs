use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};

use crate::driver::{CancelHandle, DriverConnection};
use crate::error::DriverError;
use crate::registry::ManagedConnection;

/// A registered driver connection.
///
/// Executions lock it for their whole lifecycle; the cancel primitive is captured at
/// registration so the watchdog can reach it without taking the lock.
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<Mutex<Box<dyn DriverConnection>>>,
    identity: Arc<str>,
    canceller: Arc<dyn CancelHandle>,
}

impl ConnectionHandle {
    #[must_use]
    pub fn new(connection: Box<dyn DriverConnection>) -> Self {
        let identity: Arc<str> = Arc::from(connection.identity());
        let canceller = connection.cancel_handle();
        Self {
            inner: Arc::new(Mutex::new(connection)),
            identity,
            canceller,
        }
    }

    /// `username@dsn`
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    #[must_use]
    pub fn canceller(&self) -> Arc<dyn CancelHandle> {
        Arc::clone(&self.canceller)
    }

    pub async fn lock(&self) -> MutexGuard<'_, Box<dyn DriverConnection>> {
        self.inner.lock().await
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("identity", &self.identity)
            .finish()
    }
}

#[async_trait]
impl ManagedConnection for ConnectionHandle {
    async fn close(&self) -> Result<(), DriverError> {
        self.inner.lock().await.close().await
    }
}
