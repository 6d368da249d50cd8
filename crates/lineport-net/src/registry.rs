//! Port → server registry.
//!
//! At most one [`ConnectionServer`] exists per port within a registry. The
//! registry is an ordinary value owned by the application; two registries are
//! independent, which keeps tests isolated from each other.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use lineport_core::{ConnectionError, Port};

use crate::{config::ServerConfig, server::ConnectionServer};

/// Registry of per-port servers.
#[derive(Debug, Default)]
pub struct PortRegistry {
    servers: Mutex<HashMap<Port, Arc<ConnectionServer>>>,
    config: ServerConfig,
}

impl PortRegistry {
    /// Create an empty registry using default server configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty registry whose servers use `config`.
    pub fn with_config(config: ServerConfig) -> Self {
        Self { servers: Mutex::new(HashMap::new()), config }
    }

    /// Server for `port`, created on first use.
    ///
    /// Repeated calls with the same port return the same server.
    ///
    /// # Errors
    ///
    /// - `InvalidPort` if `port` is outside `0..=65535`
    pub fn get_server(&self, port: i64) -> Result<Arc<ConnectionServer>, ConnectionError> {
        let port = Port::new(port)?;
        let server = self
            .lock()
            .entry(port)
            .or_insert_with(|| {
                tracing::debug!(%port, "creating server");
                Arc::new(ConnectionServer::new(port, self.config.clone()))
            })
            .clone();
        Ok(server)
    }

    /// Existing server for `port`, without creating one.
    ///
    /// # Errors
    ///
    /// - `InvalidPort` if `port` is outside `0..=65535`
    /// - `ServerNotFound` if no server was created for `port`
    pub fn server(&self, port: i64) -> Result<Arc<ConnectionServer>, ConnectionError> {
        let port = Port::new(port)?;
        self.lock()
            .get(&port)
            .cloned()
            .ok_or(ConnectionError::ServerNotFound { port: port.get() })
    }

    /// Ports with a server, in ascending order.
    pub fn ports(&self) -> Vec<Port> {
        let mut ports: Vec<Port> = self.lock().keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    /// Stop every server in the registry. Servers stay registered.
    pub async fn finalize_all(&self) {
        let servers: Vec<Arc<ConnectionServer>> = self.lock().values().cloned().collect();
        for server in servers {
            server.finalize_server().await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Port, Arc<ConnectionServer>>> {
        self.servers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
