//! Endpoint lifecycle state.
//!
//! ```text
//! ┌──────┐ connect/listen ┌────────────┐  handshake  ┌───────────┐
//! │ Idle │───────────────>│ Connecting │────────────>│ Connected │
//! └──────┘                └────────────┘             └───────────┘
//!                           │      ↑                       │
//!                   failure │      │ retry tick            │ read loop exit
//!                           ↓      │                       ↓
//!                         ┌──────────┐               ┌──────────────┐
//!                         │ Retrying │               │ Disconnected │
//!                         └──────────┘               └──────────────┘
//!                           │ exhausted / cancelled
//!                           ↓
//!                       ┌────────┐
//!                       │ Failed │
//!                       └────────┘
//! ```
//!
//! `Failed` and `Disconnected` are terminal for one attempt. A new `connect`
//! or `listen` starts over from `Connecting`.

use std::fmt;

/// Where an endpoint is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Never connected
    #[default]
    Idle,
    /// Resolving, connecting, or accepting
    Connecting,
    /// Waiting for the next attempt after a failure
    Retrying,
    /// Socket established, read loop running
    Connected,
    /// Read loop exited after a successful connection
    Disconnected,
    /// Gave up, or was cancelled before connecting
    Failed,
}

impl ConnectionState {
    /// Returns true while a connection attempt is underway.
    pub fn is_attempting(self) -> bool {
        matches!(self, Self::Connecting | Self::Retrying)
    }

    /// Returns true if a new `connect` or `listen` may start.
    pub fn can_start(self) -> bool {
        matches!(self, Self::Idle | Self::Disconnected | Self::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Retrying => "retrying",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}
