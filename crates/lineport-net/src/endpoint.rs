//! One TCP connection, client- or server-side.
//!
//! An [`Endpoint`] owns at most one socket. `connect` and `listen` return as
//! soon as the background task is spawned; everything that happens after
//! that (success, retries, messages, disconnects) is reported through the
//! endpoint's listeners.
//!
//! # Tasks
//!
//! - One task per connection attempt: resolves, connects (with retries) or
//!   accepts, then performs the handshake.
//! - One read-loop task per established connection: reads lines in order and
//!   fires `MessageReceived` for each, then tears down and fires `Ended`.
//!
//! `send` writes on the caller's task. The write half sits behind an async
//! mutex so concurrent senders never interleave partial lines.
//!
//! # Cancellation
//!
//! Each attempt gets its own `watch` channel. [`Endpoint::abort`] and
//! [`Endpoint::finalize`] (before the handshake) signal it, which wakes a
//! pending connect, accept, retry sleep, or read.

use std::{
    fmt, io,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use lineport_core::{
    ConnectionError, ConnectionEvent, ConnectionState, Decoded, EventDispatch, LineCodec, Listener,
    Port, SubscriptionId,
};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{
        TcpListener, TcpStream, lookup_host,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::watch,
};

use crate::config::EndpointConfig;

/// Host used when `connect` is given no host.
pub const LOCALHOST: &str = "localhost";

/// Mutable per-endpoint state, guarded by a short-lived mutex.
struct Session {
    state: ConnectionState,
    name: String,
    /// Set once the application picks a name; stops the handshake from
    /// overwriting it with the peer name.
    name_pinned: bool,
    peer: Option<SocketAddr>,
    shutdown: watch::Sender<bool>,
}

struct Inner {
    port: Port,
    config: EndpointConfig,
    codec: LineCodec,
    session: Mutex<Session>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    listeners: EventDispatch<Endpoint>,
}

/// Handle to a TCP connection.
///
/// Cheap to clone; clones share the same socket, state, and listeners.
/// `connect` and `listen` spawn Tokio tasks and must be called from within a
/// runtime.
#[derive(Clone)]
pub struct Endpoint {
    inner: Arc<Inner>,
}

impl Endpoint {
    /// Create an endpoint for `port`.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::InvalidPort` if `port` is outside `0..=65535`
    pub fn new(port: i64, config: EndpointConfig) -> Result<Self, ConnectionError> {
        Ok(Self::from_port(Port::new(port)?, config))
    }

    /// Create an endpoint for an already validated port.
    pub fn from_port(port: Port, config: EndpointConfig) -> Self {
        let codec = config.codec();
        let name = config.naming.local_name();
        let (shutdown, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                port,
                config,
                codec,
                session: Mutex::new(Session {
                    state: ConnectionState::Idle,
                    name,
                    name_pinned: false,
                    peer: None,
                    shutdown,
                }),
                writer: tokio::sync::Mutex::new(None),
                listeners: EventDispatch::new(),
            }),
        }
    }

    /// Port this endpoint connects to or accepts on.
    pub fn port(&self) -> Port {
        self.inner.port
    }

    /// Current display name.
    pub fn name(&self) -> String {
        self.session().name.clone()
    }

    /// Replace the display name. Survives later handshakes.
    pub fn set_name(&self, name: impl Into<String>) {
        let mut session = self.session();
        session.name = name.into();
        session.name_pinned = true;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.session().state
    }

    /// Returns true while a socket is established.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Returns true while waiting to retry a failed attempt that has not
    /// been cancelled.
    pub fn is_retrying(&self) -> bool {
        self.state() == ConnectionState::Retrying
    }

    /// Returns true if lines are encrypted.
    pub fn is_encoded(&self) -> bool {
        self.inner.codec.is_encrypted()
    }

    /// Remote address of the current connection.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.session().peer
    }

    /// Returns true if both handles refer to the same endpoint.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Add a listener for this endpoint's events.
    pub fn subscribe(&self, listener: Arc<dyn Listener<Endpoint>>) -> SubscriptionId {
        self.inner.listeners.subscribe(listener)
    }

    /// Remove a listener.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.listeners.unsubscribe(id)
    }

    /// Start connecting to `host` (or [`LOCALHOST`]) in the background.
    ///
    /// Failed attempts are retried up to `max_retries` times, one retry
    /// interval apart. Each retry fires an informational `Failed` event; the
    /// final failure fires a terminal one.
    ///
    /// # Errors
    ///
    /// - `AlreadyConnected` if a socket is established
    /// - `AlreadyRetrying` if an attempt is already in progress
    pub fn connect(&self, host: Option<&str>, max_retries: u32) -> Result<(), ConnectionError> {
        let shutdown = self.begin_attempt()?;
        let host = host.unwrap_or(LOCALHOST).to_string();

        tracing::debug!(port = %self.port(), %host, max_retries, "starting connect");
        tokio::spawn(self.clone().connect_with_retry(host, max_retries, shutdown));
        Ok(())
    }

    /// Accept exactly one client from `listener` in the background.
    ///
    /// # Errors
    ///
    /// - `AlreadyConnected` if a socket is established
    /// - `AlreadyRetrying` if an attempt is already in progress
    pub fn listen(&self, listener: Arc<TcpListener>) -> Result<(), ConnectionError> {
        let shutdown = self.begin_attempt()?;
        let endpoint = self.clone();

        tokio::spawn(async move {
            if let Err(err) = endpoint.accept_with(&listener, shutdown).await {
                tracing::debug!(port = %endpoint.port(), "listen ended without a client: {err}");
            }
        });
        Ok(())
    }

    /// Accept exactly one client from `listener` and complete the handshake.
    ///
    /// Unlike [`Endpoint::listen`] this waits for the accept, so the caller
    /// learns about accept failures directly (a `Failed` event is fired as
    /// well). The read loop still runs on its own task.
    pub async fn accept_from(&self, listener: &TcpListener) -> Result<(), ConnectionError> {
        let shutdown = self.begin_attempt()?;
        self.accept_with(listener, shutdown).await
    }

    /// Encode and write one message.
    ///
    /// Blocks the calling task until the line is handed to the socket. There
    /// is no queueing and no acknowledgement.
    ///
    /// # Errors
    ///
    /// - `NotConnected` if there is no socket
    /// - `Codec` if the message cannot be encoded
    /// - `Io` if the write fails
    pub async fn send(&self, text: &str) -> Result<(), ConnectionError> {
        let line = self.inner.codec.encode(text)?;
        self.write_line(&line).await
    }

    /// Ask for a graceful close.
    ///
    /// Cancels any pending retries. If connected, tells the peer to close;
    /// the local socket is released once the peer closes its side, at which
    /// point `Ended` fires.
    pub async fn finalize(&self) {
        let connected = {
            let mut session = self.session();
            match session.state {
                ConnectionState::Connected => true,
                state if state.is_attempting() => {
                    session.state = ConnectionState::Failed;
                    session.shutdown.send_replace(true);
                    false
                },
                _ => false,
            }
        };

        if connected {
            tracing::debug!(name = %self.name(), "sending close request");
            if let Err(err) = self.write_line(&LineCodec::close_line()).await {
                tracing::debug!(name = %self.name(), "close request not delivered: {err}");
            }
        }
    }

    /// Close the socket now, or stop a pending attempt.
    ///
    /// A connected endpoint fires `Ended` once its read loop unwinds.
    pub fn abort(&self) {
        let mut session = self.session();
        if session.state.is_attempting() {
            session.state = ConnectionState::Failed;
        }
        session.shutdown.send_replace(true);
    }

    /// Set the display name without pinning it (server-side disambiguation).
    pub(crate) fn assign_name(&self, name: String) {
        self.session().name = name;
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        // Listeners never run under this lock; the state is always coherent.
        self.inner.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fire(&self, event: &ConnectionEvent) {
        tracing::trace!(name = %self.name(), kind = event.kind(), "firing event");
        self.inner.listeners.fire(self, event);
    }

    /// Check preconditions and move to `Connecting` with a fresh shutdown
    /// channel.
    fn begin_attempt(&self) -> Result<watch::Receiver<bool>, ConnectionError> {
        let mut session = self.session();
        if !session.state.can_start() {
            let name = session.name.clone();
            return Err(if session.state == ConnectionState::Connected {
                ConnectionError::AlreadyConnected { name }
            } else {
                ConnectionError::AlreadyRetrying { name }
            });
        }

        let (shutdown, receiver) = watch::channel(false);
        session.state = ConnectionState::Connecting;
        session.peer = None;
        session.shutdown = shutdown;
        Ok(receiver)
    }

    /// Move from `from` to `to`. Fails if the attempt was cancelled meanwhile.
    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let mut session = self.session();
        if session.state != from {
            return false;
        }
        session.state = to;
        true
    }

    async fn connect_with_retry(
        self,
        host: String,
        max_retries: u32,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let port = self.port().get();
        let catalog = Arc::clone(&self.inner.config.catalog);
        let mut remaining = max_retries;

        loop {
            let attempt = tokio::select! {
                result = open_stream(&host, port) => result,
                _ = shutdown.changed() => {
                    tracing::debug!(%host, port, "connect cancelled");
                    return;
                },
            };

            let err = match attempt {
                Ok(stream) => {
                    if let Err(err) = self.establish(stream, shutdown).await {
                        tracing::debug!(%host, port, "handshake abandoned: {err}");
                    }
                    return;
                },
                Err(err) => err,
            };

            let reason = match &err {
                ConnectionError::HostResolution { host, reason } => {
                    format!("{}: {reason}", catalog.server_not_found(host))
                },
                other => other.to_string(),
            };

            if remaining == 0 || !err.is_transient() {
                if self.transition(ConnectionState::Connecting, ConnectionState::Failed) {
                    tracing::debug!(%host, port, "giving up: {reason}");
                    self.fire(&ConnectionEvent::Failed(catalog.cant_connect(&host, port, &reason)));
                }
                return;
            }

            if !self.transition(ConnectionState::Connecting, ConnectionState::Retrying) {
                return;
            }

            tracing::debug!(%host, port, remaining, "connect failed, retrying: {reason}");
            self.fire(&ConnectionEvent::Failed(catalog.retrying(&host, port, remaining, &reason)));

            tokio::select! {
                () = tokio::time::sleep(self.inner.config.retry_interval) => {},
                _ = shutdown.changed() => {
                    tracing::debug!(%host, port, "retry cancelled");
                    return;
                },
            }

            remaining -= 1;
            if !self.transition(ConnectionState::Retrying, ConnectionState::Connecting) {
                return;
            }
        }
    }

    async fn accept_with(
        &self,
        listener: &TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), ConnectionError> {
        let accepted = tokio::select! {
            result = listener.accept() => result.map_err(ConnectionError::from),
            _ = shutdown.changed() => Err(ConnectionError::Io("accept cancelled".to_string())),
        };

        match accepted {
            Ok((stream, peer)) => {
                tracing::debug!(port = %self.port(), %peer, "accepted client");
                self.establish(stream, shutdown).await
            },
            Err(err) => {
                let cancelled = !self.transition(ConnectionState::Connecting, ConnectionState::Failed);
                if !cancelled {
                    let message =
                        self.inner.config.catalog.accept_failed(self.port().get(), &err.to_string());
                    self.fire(&ConnectionEvent::Failed(message));
                }
                Err(err)
            },
        }
    }

    /// Take ownership of a fresh socket: store the write half, fire
    /// `Connected`, and start the read loop.
    async fn establish(
        &self,
        stream: TcpStream,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), ConnectionError> {
        let peer = stream.peer_addr().ok();
        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!("set_nodelay failed: {err}");
        }
        let (read_half, write_half) = stream.into_split();

        // A concurrent `send` or the previous connection's teardown may
        // briefly hold the writer. The state is re-checked once it is ours.
        let mut writer = self.inner.writer.lock().await;

        {
            let mut session = self.session();
            if session.state != ConnectionState::Connecting {
                return Err(ConnectionError::Io("attempt cancelled".to_string()));
            }
            session.state = ConnectionState::Connected;
            session.peer = peer;
            if let (false, Some(peer)) = (session.name_pinned, peer) {
                session.name = self.inner.config.naming.peer_name(peer);
            }
        }

        *writer = Some(write_half);
        drop(writer);

        tracing::debug!(name = %self.name(), ?peer, "connected");
        self.fire(&ConnectionEvent::Connected);

        tokio::spawn(self.clone().read_loop(read_half, shutdown));
        Ok(())
    }

    async fn read_loop(self, read_half: OwnedReadHalf, mut shutdown: watch::Receiver<bool>) {
        let release = ReleaseGuard { endpoint: &self };
        let mut reader = BufReader::new(read_half);
        let mut line = Vec::new();
        let limit = self.inner.codec.line_limit();

        loop {
            line.clear();
            let read = tokio::select! {
                result = read_line(&mut reader, &mut line, limit) => result,
                _ = shutdown.changed() => {
                    tracing::debug!(name = %self.name(), "connection aborted");
                    break;
                },
            };

            match read {
                Ok(0) => {
                    tracing::debug!(name = %self.name(), "peer closed connection");
                    break;
                },
                Ok(_) => {},
                Err(err) => {
                    tracing::debug!(name = %self.name(), "read failed: {err}");
                    break;
                },
            }

            match self.inner.codec.decode_bytes(&line) {
                Ok(Decoded::Message(text)) => self.fire(&ConnectionEvent::MessageReceived(text)),
                Ok(Decoded::Close) => {
                    tracing::debug!(name = %self.name(), "peer requested close");
                    break;
                },
                Err(err) => {
                    let err = ConnectionError::from(err);
                    let message =
                        self.inner.config.catalog.decode_failed(&self.name(), &err.to_string());
                    tracing::warn!("{message}");
                    break;
                },
            }
        }

        drop(reader);
        release.finish().await;
    }

    async fn write_line(&self, line: &str) -> Result<(), ConnectionError> {
        let mut writer = self.inner.writer.lock().await;
        let Some(stream) = writer.as_mut() else {
            return Err(ConnectionError::NotConnected);
        };

        stream.write_all(line.as_bytes()).await?;
        stream.flush().await?;
        Ok(())
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let session = self.session();
        f.debug_struct("Endpoint")
            .field("port", &self.inner.port)
            .field("name", &session.name)
            .field("state", &session.state)
            .field("peer", &session.peer)
            .field("encoded", &self.inner.codec.is_encrypted())
            .finish()
    }
}

/// Releases the socket when the read loop exits, however it exits.
///
/// The normal path calls [`ReleaseGuard::finish`], which shuts the write half
/// down and fires `Ended`. If the loop unwinds instead (a listener panicked),
/// `Drop` still detaches the socket so the endpoint does not report itself
/// as connected forever.
struct ReleaseGuard<'a> {
    endpoint: &'a Endpoint,
}

impl ReleaseGuard<'_> {
    async fn finish(self) {
        let endpoint = self.endpoint;

        let writer = endpoint.inner.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(err) = writer.shutdown().await {
                tracing::debug!(name = %endpoint.name(), "socket shutdown failed: {err}");
            }
        }

        detach(endpoint);
        std::mem::forget(self);

        tracing::debug!(name = %endpoint.name(), "connection ended");
        endpoint.fire(&ConnectionEvent::Ended);
    }
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut writer) = self.endpoint.inner.writer.try_lock() {
            writer.take();
        }
        detach(self.endpoint);
    }
}

fn detach(endpoint: &Endpoint) {
    let mut session = endpoint.session();
    if session.state == ConnectionState::Connected {
        session.state = ConnectionState::Disconnected;
    }
    session.peer = None;
}

/// Read one `\n`-terminated line, at most `limit + 1` bytes.
///
/// Returns the number of bytes read; `0` means end of stream. An overlong
/// line comes back truncated without its newline, which the codec rejects.
async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>, limit: usize) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    reader.take(cap).read_until(b'\n', buf).await
}

/// Resolve `host` and connect to the first address that accepts.
async fn open_stream(host: &str, port: u16) -> Result<TcpStream, ConnectionError> {
    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|e| ConnectionError::HostResolution {
            host: host.to_string(),
            reason: e.to_string(),
        })?
        .collect();

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }

    Err(match last_err {
        Some(err) => ConnectionError::from(err),
        None => ConnectionError::HostResolution {
            host: host.to_string(),
            reason: "no addresses found".to_string(),
        },
    })
}
