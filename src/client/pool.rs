//! Pool of logged-in client sessions.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::EppClient;
use crate::codec::CodecRegistry;
use crate::error::{EppError, Result};
use crate::protocol::Login;
use crate::transport::{ConnectionDescriptor, ConnectionFactory};

/// Bounded set of logged-in [`EppClient`] sessions.
///
/// Checkout reuses an idle session or opens and logs in a new one. When
/// `size` sessions are out, checkout waits up to the timeout and then fails
/// with [`EppError::PoolTimeout`]. Closed sessions are dropped rather than
/// returned.
#[derive(Debug)]
pub struct ClientPool {
    factory: ConnectionFactory,
    registry: Arc<CodecRegistry>,
    login: Login,
    idle: Mutex<Vec<EppClient>>,
    permits: Arc<Semaphore>,
    size: usize,
    timeout: Duration,
}

impl ClientPool {
    /// Pool of at most `size` sessions for one account.
    ///
    /// When `login` selects no object services, each session selects
    /// everything its greeting offers.
    pub fn new(
        descriptor: ConnectionDescriptor,
        registry: Arc<CodecRegistry>,
        login: Login,
        size: usize,
        timeout: Duration,
    ) -> Self {
        let size = size.max(1);
        Self {
            factory: ConnectionFactory::new(descriptor),
            registry,
            login,
            idle: Mutex::new(Vec::with_capacity(size)),
            permits: Arc::new(Semaphore::new(size)),
            size,
            timeout,
        }
    }

    /// Borrow a logged-in session.
    pub async fn checkout(&self) -> Result<PooledClient<'_>> {
        let permit = tokio::time::timeout(self.timeout, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| EppError::PoolTimeout(self.timeout))?
            .map_err(|_| EppError::Server("client pool closed".to_string()))?;

        let reused = loop {
            let candidate = self.idle.lock().unwrap_or_else(PoisonError::into_inner).pop();
            match candidate {
                Some(client) if client.is_closed() => continue,
                other => break other,
            }
        };

        let client = match reused {
            Some(client) => client,
            None => self.open().await?,
        };

        Ok(PooledClient {
            pool: self,
            client: Some(client),
            _permit: permit,
        })
    }

    /// Sessions currently idle in the pool.
    pub fn idle(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Maximum number of sessions.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Log out every idle session.
    pub async fn close_idle(&self) {
        let clients = std::mem::take(&mut *self.idle.lock().unwrap_or_else(PoisonError::into_inner));
        for mut client in clients {
            if let Err(e) = client.logout().await {
                tracing::debug!("Logout of pooled session failed: {}", e);
            }
        }
    }

    async fn open(&self) -> Result<EppClient> {
        let connection = self.factory.connect().await?;
        let mut client = EppClient::from_connection(connection, Arc::clone(&self.registry)).await?;

        let mut login = self.login.clone();
        if login.object_uris.is_empty() {
            login = login.with_services_from(client.greeting());
        }
        client.login(login).await?;
        tracing::debug!(client_id = %self.login.client_id, "Pooled session opened");
        Ok(client)
    }

    fn give_back(&self, client: EppClient) {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(client);
    }
}

/// A checked-out session; returned to the pool on drop unless closed.
#[derive(Debug)]
pub struct PooledClient<'a> {
    pool: &'a ClientPool,
    client: Option<EppClient>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledClient<'_> {
    type Target = EppClient;

    fn deref(&self) -> &Self::Target {
        self.client.as_ref().expect("client is present until drop")
    }
}

impl DerefMut for PooledClient<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.client.as_mut().expect("client is present until drop")
    }
}

impl Drop for PooledClient<'_> {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            if !client.is_closed() {
                self.pool.give_back(client);
            }
        }
    }
}
