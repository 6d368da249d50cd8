//! Lineport core
//!
//! Pure building blocks for point-to-point TCP line messaging. Nothing in
//! this crate touches a socket: `lineport-net` owns the I/O and uses these
//! types to decide what goes on the wire and what subscribers hear about.
//!
//! # Components
//!
//! - [`Port`]: validated TCP port
//! - [`LineCodec`]: one message per line, optional encryption
//! - [`EventDispatch`]: ordered subscriber list with synchronous delivery
//! - [`ConnectionState`]: lifecycle of a single endpoint
//! - [`NamingStrategy`] and [`disambiguate`]: display names for connections
//! - [`MessageCatalog`]: human-readable failure strings
//!
//! # Wire Format
//!
//! ```text
//! payload "a\nb"  ──sentinel──▶  "a@#@b"  ──cipher?──▶  "…"  ──escape──▶  "…\n"
//! ```
//!
//! The literal line `@@END_CONNECTION` asks the peer to close gracefully.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod catalog;
pub mod codec;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod naming;
pub mod port;
pub mod state;

pub use catalog::{EnglishCatalog, MessageCatalog};
pub use codec::{CLOSE_LITERAL, Decoded, LINE_BREAK_SENTINEL, LineCodec};
pub use dispatch::{EventDispatch, FnListener, Listener, SubscriptionId};
pub use error::{CodecError, ConnectionError};
pub use event::ConnectionEvent;
pub use lineport_crypto::{CipherError, LineCipher, XChaChaLineCipher};
pub use naming::{AddressNaming, NamingStrategy, disambiguate, increment_name, short_host_name};
pub use port::Port;
pub use state::ConnectionState;
