//! Per-port server: one listening socket, many accepted endpoints.
//!
//! ```text
//!                      ┌──────────────────────────────┐
//!   TcpListener ──────▶│ acceptor task                │
//!                      │   endpoint = Endpoint::new   │
//!                      │   endpoint.accept_from(..)   │──▶ read-loop task per client
//!                      └──────────────┬───────────────┘
//!                                     │ relay (Connected / Ended / ...)
//!                                     ▼
//!                      active set (unique names) ──▶ server listeners
//! ```
//!
//! The acceptor creates the next endpoint only after the previous handshake
//! finished, so name resolution for one client always sees every earlier
//! client in the active set.

use std::{
    net::SocketAddr,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use lineport_core::{
    ConnectionError, ConnectionEvent, EventDispatch, Listener, Port, SubscriptionId, disambiguate,
};
use tokio::{net::TcpListener, sync::watch, task::JoinHandle};

use crate::{config::ServerConfig, endpoint::Endpoint};

/// Running acceptor, present while the server listens.
struct Listening {
    shutdown: watch::Sender<bool>,
    acceptor: JoinHandle<()>,
}

/// Accepts clients on one port and tracks the live connections.
///
/// Obtained through [`crate::PortRegistry::get_server`]. Events from every
/// accepted endpoint are relayed to the server's own listeners, with the
/// endpoint as the source.
pub struct ConnectionServer {
    port: Port,
    config: ServerConfig,
    active: Mutex<Vec<Endpoint>>,
    blocked: AtomicBool,
    listening: tokio::sync::Mutex<Option<Listening>>,
    local_addr: Mutex<Option<SocketAddr>>,
    listeners: EventDispatch<Endpoint>,
}

impl ConnectionServer {
    /// Create a stopped server for `port`.
    pub fn new(port: Port, config: ServerConfig) -> Self {
        Self {
            port,
            config,
            active: Mutex::new(Vec::new()),
            blocked: AtomicBool::new(false),
            listening: tokio::sync::Mutex::new(None),
            local_addr: Mutex::new(None),
            listeners: EventDispatch::new(),
        }
    }

    /// Port this server was created for.
    pub fn port(&self) -> Port {
        self.port
    }

    /// Start listening if not already. Also clears the blocked flag.
    ///
    /// # Errors
    ///
    /// - `ListenBind` if the socket cannot be bound; nothing is kept
    pub async fn init_server(self: &Arc<Self>) -> Result<(), ConnectionError> {
        let mut listening = self.listening.lock().await;
        self.blocked.store(false, Ordering::SeqCst);

        if listening.is_some() {
            return Ok(());
        }

        let port = self.port.get();
        let bind_err = |reason: String| ConnectionError::ListenBind { port, reason };

        let listener = TcpListener::bind((self.config.bind_host.as_str(), port))
            .await
            .map_err(|e| bind_err(e.to_string()))?;
        let local_addr = listener.local_addr().map_err(|e| bind_err(e.to_string()))?;

        *lock(&self.local_addr) = Some(local_addr);

        let (shutdown, receiver) = watch::channel(false);
        let acceptor = tokio::spawn(Arc::clone(self).accept_loop(listener, receiver));
        *listening = Some(Listening { shutdown, acceptor });

        tracing::info!(%local_addr, "server listening");
        Ok(())
    }

    /// Gracefully close every active connection.
    ///
    /// New clients are held back while this runs. Endpoints leave the active
    /// set once their peers acknowledge the close.
    pub async fn finalize_connections(&self) {
        self.blocked.store(true, Ordering::SeqCst);

        for endpoint in self.snapshot() {
            endpoint.finalize().await;
        }

        self.blocked.store(false, Ordering::SeqCst);
    }

    /// Close every connection and stop listening.
    ///
    /// Never fails; problems while stopping the acceptor are logged. The
    /// server can be started again with [`ConnectionServer::init_server`].
    pub async fn finalize_server(&self) {
        self.finalize_connections().await;
        self.blocked.store(true, Ordering::SeqCst);

        let stopped = self.listening.lock().await.take();
        if let Some(Listening { shutdown, mut acceptor }) = stopped {
            shutdown.send_replace(true);

            match tokio::time::timeout(self.config.shutdown_grace, &mut acceptor).await {
                Ok(Ok(())) => {},
                Ok(Err(err)) => tracing::error!(port = %self.port, "acceptor task failed: {err}"),
                Err(_) => {
                    tracing::warn!(port = %self.port, "acceptor did not stop in time");
                    acceptor.abort();
                },
            }
        }

        lock(&self.active).clear();
        *lock(&self.local_addr) = None;

        tracing::info!(port = %self.port, "server stopped");
    }

    /// Returns true while the listening socket is open.
    pub fn is_listening(&self) -> bool {
        lock(&self.local_addr).is_some()
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.local_addr)
    }

    /// Returns true while new clients are held back.
    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Ordering::SeqCst)
    }

    /// Names of the active connections in connection order.
    pub fn connection_names(&self) -> Vec<String> {
        lock(&self.active).iter().map(Endpoint::name).collect()
    }

    /// Active connection with the given name.
    pub fn endpoint(&self, name: &str) -> Option<Endpoint> {
        lock(&self.active).iter().find(|e| e.name() == name).cloned()
    }

    /// Number of active connections.
    pub fn connection_count(&self) -> usize {
        lock(&self.active).len()
    }

    /// Send to one active connection.
    ///
    /// # Errors
    ///
    /// - `NotConnected` if no active connection has that name
    /// - any error from [`Endpoint::send`]
    pub async fn send_to(&self, name: &str, text: &str) -> Result<(), ConnectionError> {
        let endpoint = self.endpoint(name).ok_or(ConnectionError::NotConnected)?;
        endpoint.send(text).await
    }

    /// Send to every active connection.
    ///
    /// Returns how many sends succeeded. Failures are logged and skipped.
    pub async fn broadcast(&self, text: &str) -> usize {
        let mut delivered = 0;
        for endpoint in self.snapshot() {
            match endpoint.send(text).await {
                Ok(()) => delivered += 1,
                Err(err) => tracing::debug!(name = %endpoint.name(), "broadcast skipped: {err}"),
            }
        }
        delivered
    }

    /// Add a listener for events from every accepted connection.
    pub fn subscribe(&self, listener: Arc<dyn Listener<Endpoint>>) -> SubscriptionId {
        self.listeners.subscribe(listener)
    }

    /// Remove a listener.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }

    fn snapshot(&self) -> Vec<Endpoint> {
        lock(&self.active).clone()
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        let relay: Arc<dyn Listener<Endpoint>> = Arc::new(ServerRelay { server: Arc::downgrade(&self) });

        loop {
            if *shutdown.borrow() {
                break;
            }

            if self.is_blocked() {
                tokio::select! {
                    () = tokio::time::sleep(self.config.accept_backoff) => continue,
                    _ = shutdown.changed() => break,
                }
            }

            let endpoint = Endpoint::from_port(self.port, self.config.endpoint.clone());
            endpoint.subscribe(Arc::clone(&relay));

            let accepted = tokio::select! {
                result = endpoint.accept_from(&listener) => result,
                _ = shutdown.changed() => {
                    endpoint.abort();
                    break;
                },
            };

            if let Err(err) = accepted {
                tracing::debug!(port = %self.port, "accept failed: {err}");
                tokio::select! {
                    () = tokio::time::sleep(self.config.accept_backoff) => {},
                    _ = shutdown.changed() => break,
                }
            }
        }

        tracing::debug!(port = %self.port, "acceptor stopped");
    }

    /// Give a freshly connected endpoint a unique name and track it.
    fn admit(&self, endpoint: &Endpoint) {
        let mut active = lock(&self.active);
        let name = disambiguate(&endpoint.name(), |candidate| {
            active.iter().any(|other| !other.ptr_eq(endpoint) && other.name() == candidate)
        });
        endpoint.assign_name(name);

        if !active.iter().any(|other| other.ptr_eq(endpoint)) {
            active.push(endpoint.clone());
        }
    }

    fn release(&self, endpoint: &Endpoint) {
        lock(&self.active).retain(|other| !other.ptr_eq(endpoint));
    }
}

impl std::fmt::Debug for ConnectionServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionServer")
            .field("port", &self.port)
            .field("local_addr", &self.local_addr())
            .field("blocked", &self.is_blocked())
            .field("connections", &self.connection_names())
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Forwards endpoint events to the owning server.
///
/// Holds a weak reference so endpoints outliving their server do not keep it
/// alive.
struct ServerRelay {
    server: Weak<ConnectionServer>,
}

impl ServerRelay {
    fn forward(&self, endpoint: &Endpoint, event: &ConnectionEvent) {
        let Some(server) = self.server.upgrade() else {
            return;
        };

        match event {
            ConnectionEvent::Connected => {
                server.admit(endpoint);
                tracing::info!(name = %endpoint.name(), peer = ?endpoint.peer_addr(), "client connected");
            },
            ConnectionEvent::Ended => {
                server.release(endpoint);
                tracing::info!(name = %endpoint.name(), "client disconnected");
            },
            ConnectionEvent::MessageReceived(_) | ConnectionEvent::Failed(_) => {},
        }

        server.listeners.fire(endpoint, event);
    }
}

impl Listener<Endpoint> for ServerRelay {
    fn message_received(&self, source: &Endpoint, text: &str) {
        self.forward(source, &ConnectionEvent::MessageReceived(text.to_string()));
    }

    fn connected(&self, source: &Endpoint) {
        self.forward(source, &ConnectionEvent::Connected);
    }

    fn ended(&self, source: &Endpoint) {
        self.forward(source, &ConnectionEvent::Ended);
    }

    fn failed(&self, source: &Endpoint, message: &str) {
        self.forward(source, &ConnectionEvent::Failed(message.to_string()));
    }
}
