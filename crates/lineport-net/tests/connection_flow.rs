//! End-to-end tests over loopback sockets.
//!
//! Every test runs its own registry with the server bound to an ephemeral
//! port on 127.0.0.1, so tests can run in parallel.

use std::{sync::Arc, time::Duration};

use lineport_net::{
    ConnectionError, ConnectionEvent, ConnectionServer, ConnectionState, Endpoint, EndpointConfig,
    FnListener, Listener, PortRegistry, ServerConfig,
};
use tokio::{
    net::TcpListener,
    sync::mpsc::{self, UnboundedReceiver},
};

const WAIT: Duration = Duration::from_secs(5);
const LOOPBACK: &str = "127.0.0.1";

/// Events seen by one listener, with the source's name at delivery time.
struct Events {
    rx: UnboundedReceiver<(String, ConnectionEvent)>,
}

impl Events {
    async fn next(&mut self) -> (String, ConnectionEvent) {
        tokio::time::timeout(WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("listener dropped")
    }

    /// Skip events until one matches.
    async fn until(&mut self, wanted: impl Fn(&ConnectionEvent) -> bool) -> (String, ConnectionEvent) {
        loop {
            let (name, event) = self.next().await;
            if wanted(&event) {
                return (name, event);
            }
        }
    }

    async fn connected(&mut self) -> String {
        self.until(|e| *e == ConnectionEvent::Connected).await.0
    }

    async fn ended(&mut self) -> String {
        self.until(|e| *e == ConnectionEvent::Ended).await.0
    }

    async fn message(&mut self) -> String {
        match self.until(|e| matches!(e, ConnectionEvent::MessageReceived(_))).await.1 {
            ConnectionEvent::MessageReceived(text) => text,
            other => panic!("unexpected event {other:?}"),
        }
    }

    fn assert_quiet(&mut self) {
        assert!(self.rx.try_recv().is_err(), "unexpected pending event");
    }
}

fn recorder() -> (Arc<dyn Listener<Endpoint>>, Events) {
    let (tx, rx) = mpsc::unbounded_channel();
    let listener = FnListener::new(move |source: &Endpoint, event: &ConnectionEvent| {
        let _ = tx.send((source.name(), event.clone()));
    });
    (Arc::new(listener), Events { rx })
}

fn loopback_config(endpoint: EndpointConfig) -> ServerConfig {
    ServerConfig { bind_host: LOOPBACK.to_string(), endpoint, ..Default::default() }
}

/// Start a loopback server and return it with its events and bound port.
async fn start_server(registry: &PortRegistry) -> (Arc<ConnectionServer>, Events, i64) {
    let server = registry.get_server(0).unwrap();
    let (listener, events) = recorder();
    server.subscribe(listener);
    server.init_server().await.unwrap();

    let port = server.local_addr().expect("bound").port();
    (server, events, i64::from(port))
}

fn client(port: i64, config: EndpointConfig) -> (Endpoint, Events) {
    let endpoint = Endpoint::new(port, config).unwrap();
    let (listener, events) = recorder();
    endpoint.subscribe(listener);
    (endpoint, events)
}

/// A loopback port with nothing listening on it.
async fn refused_port() -> i64 {
    let listener = TcpListener::bind((LOOPBACK, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    i64::from(port)
}

#[tokio::test]
async fn hello_then_graceful_close() {
    let registry = PortRegistry::with_config(loopback_config(EndpointConfig::default()));
    let (server, mut server_events, port) = start_server(&registry).await;
    let (client, mut client_events) = client(port, EndpointConfig::default());

    client.connect(Some(LOOPBACK), 0).unwrap();
    client_events.connected().await;
    assert_eq!(server_events.connected().await, LOOPBACK);
    assert!(client.is_connected());
    assert_eq!(server.connection_count(), 1);

    client.send("hello").await.unwrap();
    assert_eq!(server_events.message().await, "hello");

    client.finalize().await;
    server_events.ended().await;
    client_events.ended().await;

    assert!(!client.is_connected());
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(client.peer_addr().is_none());
    assert_eq!(server.connection_count(), 0);

    registry.finalize_all().await;
}

#[tokio::test]
async fn retries_then_gives_up() {
    let port = refused_port().await;
    let config = EndpointConfig { retry_interval: Duration::from_millis(20), ..Default::default() };
    let (client, mut events) = client(port, config);

    client.connect(Some(LOOPBACK), 2).unwrap();

    let mut failures = Vec::new();
    while failures.len() < 3 {
        let (_, event) = events.next().await;
        assert!(!client.is_connected());
        match event {
            ConnectionEvent::Failed(message) => failures.push(message),
            other => panic!("unexpected event {other:?}"),
        }
    }

    assert!(failures[0].contains("retrying (2 left)"), "{}", failures[0]);
    assert!(failures[1].contains("retrying (1 left)"), "{}", failures[1]);
    assert!(failures[2].starts_with("can't connect"), "{}", failures[2]);
    assert!(!failures[2].contains("retrying"), "{}", failures[2]);

    assert_eq!(client.state(), ConnectionState::Failed);
    assert!(!client.is_retrying());
    assert!(!client.is_connected());
}

#[tokio::test]
async fn finalize_cancels_pending_retries() {
    let port = refused_port().await;
    let config = EndpointConfig { retry_interval: Duration::from_secs(30), ..Default::default() };
    let (client, mut events) = client(port, config);

    client.connect(Some(LOOPBACK), 10).unwrap();
    let (_, first) = events.next().await;
    assert!(matches!(first, ConnectionEvent::Failed(ref m) if m.contains("retrying")));
    assert!(client.is_retrying());

    client.finalize().await;
    assert!(!client.is_retrying());
    assert_eq!(client.state(), ConnectionState::Failed);

    tokio::time::sleep(Duration::from_millis(100)).await;
    events.assert_quiet();
}

#[tokio::test]
async fn colliding_names_get_suffixes() {
    let registry = PortRegistry::with_config(loopback_config(EndpointConfig::default()));
    let (server, mut server_events, port) = start_server(&registry).await;

    let (first, _first_events) = client(port, EndpointConfig::default());
    first.connect(Some(LOOPBACK), 0).unwrap();
    assert_eq!(server_events.connected().await, "127.0.0.1");

    let (second, _second_events) = client(port, EndpointConfig::default());
    second.connect(Some(LOOPBACK), 0).unwrap();
    assert_eq!(server_events.connected().await, "127.0.0.1_2");

    assert_eq!(server.connection_names(), vec!["127.0.0.1", "127.0.0.1_2"]);
    assert!(server.endpoint("127.0.0.1_2").is_some());

    // A freed name is reused by the next client.
    first.abort();
    assert_eq!(server_events.ended().await, "127.0.0.1");

    let (third, _third_events) = client(port, EndpointConfig::default());
    third.connect(Some(LOOPBACK), 0).unwrap();
    assert_eq!(server_events.connected().await, "127.0.0.1");

    registry.finalize_all().await;
}

#[tokio::test]
async fn messages_arrive_in_send_order() {
    let registry = PortRegistry::with_config(loopback_config(EndpointConfig::default()));
    let (_server, mut server_events, port) = start_server(&registry).await;
    let (client, mut client_events) = client(port, EndpointConfig::default());

    client.connect(Some(LOOPBACK), 0).unwrap();
    client_events.connected().await;

    for text in ["m1", "m2", "m3"] {
        client.send(text).await.unwrap();
    }

    assert_eq!(server_events.message().await, "m1");
    assert_eq!(server_events.message().await, "m2");
    assert_eq!(server_events.message().await, "m3");

    registry.finalize_all().await;
}

#[tokio::test]
async fn payload_shapes_survive_the_wire() {
    let registry = PortRegistry::with_config(loopback_config(EndpointConfig::default()));
    let (_server, mut server_events, port) = start_server(&registry).await;
    let (client, mut client_events) = client(port, EndpointConfig::default());

    client.connect(Some(LOOPBACK), 0).unwrap();
    client_events.connected().await;

    client.send("first\nsecond").await.unwrap();
    assert_eq!(server_events.message().await, "first\nsecond");

    // A payload equal to the close literal is data, not a close request.
    client.send("@@END_CONNECTION").await.unwrap();
    assert_eq!(server_events.message().await, "@@END_CONNECTION");

    client.send("\\leading escape").await.unwrap();
    assert_eq!(server_events.message().await, "\\leading escape");

    client.send("").await.unwrap();
    assert_eq!(server_events.message().await, "");

    assert!(client.is_connected());
    registry.finalize_all().await;
}

#[tokio::test]
async fn encrypted_lines_roundtrip() {
    let shared = || EndpointConfig::default().with_passphrase("correct horse");
    let registry = PortRegistry::with_config(loopback_config(shared()));
    let (server, mut server_events, port) = start_server(&registry).await;
    let (client, mut client_events) = client(port, shared());

    assert!(client.is_encoded());
    client.connect(Some(LOOPBACK), 0).unwrap();
    client_events.connected().await;
    let name = server_events.connected().await;

    client.send("over the wire").await.unwrap();
    assert_eq!(server_events.message().await, "over the wire");

    server.send_to(&name, "and back").await.unwrap();
    assert_eq!(client_events.message().await, "and back");

    registry.finalize_all().await;
}

#[tokio::test]
async fn wrong_key_ends_without_delivery() {
    let server_config = EndpointConfig::default().with_passphrase("server key");
    let registry = PortRegistry::with_config(loopback_config(server_config));
    let (server, mut server_events, port) = start_server(&registry).await;
    let (client, mut client_events) =
        client(port, EndpointConfig::default().with_passphrase("client key"));

    client.connect(Some(LOOPBACK), 0).unwrap();
    client_events.connected().await;
    server_events.connected().await;

    client.send("secret").await.unwrap();

    // Nothing is delivered between the handshake and the teardown.
    let (_, event) = server_events.next().await;
    assert_eq!(event, ConnectionEvent::Ended);
    client_events.ended().await;

    assert_eq!(server.connection_count(), 0);
    registry.finalize_all().await;
}

#[tokio::test]
async fn connect_preconditions() {
    let registry = PortRegistry::with_config(loopback_config(EndpointConfig::default()));
    let (_server, _server_events, port) = start_server(&registry).await;
    let (client, mut client_events) = client(port, EndpointConfig::default());

    client.connect(Some(LOOPBACK), 0).unwrap();
    client_events.connected().await;

    assert!(matches!(
        client.connect(Some(LOOPBACK), 0),
        Err(ConnectionError::AlreadyConnected { .. })
    ));
    let listener = Arc::new(TcpListener::bind((LOOPBACK, 0)).await.unwrap());
    assert!(matches!(client.listen(listener), Err(ConnectionError::AlreadyConnected { .. })));

    let refused = refused_port().await;
    let config = EndpointConfig { retry_interval: Duration::from_secs(30), ..Default::default() };
    let (retrying, mut retry_events) = self::client(refused, config);
    retrying.connect(Some(LOOPBACK), 3).unwrap();
    retry_events.next().await;
    assert!(matches!(
        retrying.connect(Some(LOOPBACK), 3),
        Err(ConnectionError::AlreadyRetrying { .. })
    ));
    retrying.abort();

    registry.finalize_all().await;
}

#[tokio::test]
async fn reconnect_after_drop() {
    let registry = PortRegistry::with_config(loopback_config(EndpointConfig::default()));
    let (server, mut server_events, port) = start_server(&registry).await;
    let (client, mut client_events) = client(port, EndpointConfig::default());

    client.connect(Some(LOOPBACK), 0).unwrap();
    client_events.connected().await;
    server_events.connected().await;

    server.finalize_connections().await;
    client_events.ended().await;
    server_events.ended().await;
    assert!(!server.is_blocked());

    client.connect(Some(LOOPBACK), 0).unwrap();
    client_events.connected().await;
    server_events.connected().await;
    assert_eq!(server.connection_count(), 1);

    registry.finalize_all().await;
}

#[tokio::test]
async fn pinned_name_survives_handshake() {
    let registry = PortRegistry::with_config(loopback_config(EndpointConfig::default()));
    let (_server, _server_events, port) = start_server(&registry).await;
    let (client, mut client_events) = client(port, EndpointConfig::default());

    client.set_name("console");
    client.connect(Some(LOOPBACK), 0).unwrap();
    assert_eq!(client_events.connected().await, "console");

    registry.finalize_all().await;
}

#[tokio::test]
async fn server_stops_and_restarts() {
    let registry = PortRegistry::with_config(loopback_config(EndpointConfig::default()));
    let (server, mut server_events, port) = start_server(&registry).await;
    let (client, mut client_events) = client(port, EndpointConfig::default());

    client.connect(Some(LOOPBACK), 0).unwrap();
    client_events.connected().await;
    server_events.connected().await;

    server.finalize_server().await;
    assert!(!server.is_listening());
    assert_eq!(server.connection_count(), 0);
    client_events.ended().await;

    // The old address no longer accepts clients.
    let (late, mut late_events) = self::client(port, EndpointConfig::default());
    late.connect(Some(LOOPBACK), 0).unwrap();
    let (_, event) = late_events.next().await;
    assert!(matches!(event, ConnectionEvent::Failed(ref m) if m.starts_with("can't connect")));

    server.init_server().await.unwrap();
    assert!(server.is_listening());
    assert!(Arc::ptr_eq(&server, &registry.get_server(0).unwrap()));

    let port = i64::from(server.local_addr().unwrap().port());
    let (again, mut again_events) = self::client(port, EndpointConfig::default());
    again.connect(Some(LOOPBACK), 0).unwrap();
    again_events.connected().await;

    registry.finalize_all().await;
}

#[tokio::test]
async fn broadcast_reaches_every_client() {
    let registry = PortRegistry::with_config(loopback_config(EndpointConfig::default()));
    let (server, mut server_events, port) = start_server(&registry).await;

    let (a, mut a_events) = client(port, EndpointConfig::default());
    let (b, mut b_events) = client(port, EndpointConfig::default());
    a.connect(Some(LOOPBACK), 0).unwrap();
    server_events.connected().await;
    b.connect(Some(LOOPBACK), 0).unwrap();
    server_events.connected().await;

    assert_eq!(server.broadcast("to all").await, 2);
    assert_eq!(a_events.message().await, "to all");
    assert_eq!(b_events.message().await, "to all");

    registry.finalize_all().await;
}

#[tokio::test]
async fn standalone_listen_accepts_one_client() {
    let listener = Arc::new(TcpListener::bind((LOOPBACK, 0)).await.unwrap());
    let port = i64::from(listener.local_addr().unwrap().port());

    let (accepting, mut accepting_events) = client(port, EndpointConfig::default());
    accepting.listen(Arc::clone(&listener)).unwrap();
    assert_eq!(accepting.state(), ConnectionState::Connecting);

    let (dialing, mut dialing_events) = client(port, EndpointConfig::default());
    dialing.connect(Some(LOOPBACK), 0).unwrap();

    accepting_events.connected().await;
    dialing_events.connected().await;

    accepting.send("ping").await.unwrap();
    assert_eq!(dialing_events.message().await, "ping");

    accepting.abort();
    accepting_events.ended().await;
    dialing_events.ended().await;
}
