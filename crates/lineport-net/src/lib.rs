//! Lineport networking.
//!
//! Tokio runtime glue around [`lineport_core`]: real sockets, background
//! tasks, and the per-port server registry.
//!
//! # Architecture
//!
//! ```text
//!   PortRegistry ──▶ ConnectionServer (one per port)
//!                         │ acceptor task
//!                         ▼
//!                    Endpoint ◀──── TCP ────▶ Endpoint (client, connect + retry)
//!                         │                        │
//!                         ▼                        ▼
//!                  server listeners         endpoint listeners
//! ```
//!
//! # Components
//!
//! - [`Endpoint`]: one TCP connection with connect-with-retry and a read loop
//! - [`ConnectionServer`]: listening socket, active set, event relay
//! - [`PortRegistry`]: at most one server per port
//! - [`EndpointConfig`] / [`ServerConfig`]: runtime knobs with defaults
//!
//! Every operation that spawns work must run inside a Tokio runtime.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
mod endpoint;
mod registry;
mod server;

pub use config::{EndpointConfig, ServerConfig};
pub use endpoint::{Endpoint, LOCALHOST};
pub use lineport_core::{
    ConnectionError, ConnectionEvent, ConnectionState, FnListener, Listener, Port, SubscriptionId,
};
pub use registry::PortRegistry;
pub use server::ConnectionServer;
