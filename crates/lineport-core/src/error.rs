//! Error types for lineport connections.
//!
//! Two layers: [`CodecError`] for turning lines into messages and back, and
//! [`ConnectionError`] for everything an endpoint or server reports to its
//! caller. Errors raised on background tasks never reach a caller directly;
//! they are turned into `Failed`/`Ended` events.

use std::io;

use lineport_crypto::CipherError;
use thiserror::Error;

/// Errors from encoding or decoding a single wire line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Inbound line could not be decrypted with the configured cipher
    #[error("decryption failed: {0}")]
    Decryption(#[source] CipherError),

    /// Outbound line could not be encrypted
    #[error("encryption failed: {0}")]
    Encryption(#[source] CipherError),

    /// Line exceeds the configured maximum length
    #[error("line too long: {len} bytes exceeds limit of {max}")]
    LineTooLong {
        /// Length of the offending line in bytes
        len: usize,
        /// Configured limit
        max: usize,
    },

    /// Inbound line is not UTF-8 text
    #[error("line is not valid UTF-8")]
    InvalidUtf8,
}

/// Errors reported by endpoints, servers, and the port registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Port outside the TCP range
    #[error("port must be between {min} and {max}, got {value}")]
    InvalidPort {
        /// Rejected value
        value: i64,
        /// Lowest valid port
        min: u16,
        /// Highest valid port
        max: u16,
    },

    /// `connect`/`listen` called on a connected endpoint
    #[error("already connected to {name}")]
    AlreadyConnected {
        /// Display name of the current peer
        name: String,
    },

    /// `connect`/`listen` called while an attempt is still in progress
    #[error("already trying to connect to {name}")]
    AlreadyRetrying {
        /// Display name of the endpoint
        name: String,
    },

    /// `send` called without a socket
    #[error("not connected")]
    NotConnected,

    /// Host name did not resolve to any address
    #[error("host not found: {host}: {reason}")]
    HostResolution {
        /// Host that failed to resolve
        host: String,
        /// Resolver error
        reason: String,
    },

    /// Socket-level failure
    #[error("i/o error: {0}")]
    Io(String),

    /// Peer line failed to decrypt; ends that endpoint's read loop
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Any other framing failure
    #[error("codec error: {0}")]
    Codec(CodecError),

    /// Server could not bind its listening socket
    #[error("failed to listen on port {port}: {reason}")]
    ListenBind {
        /// Port that failed to bind
        port: u16,
        /// Bind error
        reason: String,
    },

    /// No server registered for the port
    #[error("no server registered on port {port}")]
    ServerNotFound {
        /// Requested port
        port: u16,
    },
}

impl ConnectionError {
    /// Returns true if a fresh connection attempt may succeed.
    ///
    /// Only resolution and socket failures are retried by the connect loop.
    /// Precondition failures and decode failures are never transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::HostResolution { .. } | Self::Io(_))
    }
}

impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<CodecError> for ConnectionError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Decryption(cause) => Self::Decryption(cause.to_string()),
            other => Self::Codec(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_and_io_errors_are_transient() {
        assert!(
            ConnectionError::HostResolution {
                host: "nowhere.invalid".to_string(),
                reason: "no such host".to_string(),
            }
            .is_transient()
        );
        assert!(ConnectionError::Io("connection refused".to_string()).is_transient());
    }

    #[test]
    fn precondition_failures_are_fatal() {
        assert!(!ConnectionError::InvalidPort { value: -1, min: 0, max: 65535 }.is_transient());
        assert!(!ConnectionError::AlreadyConnected { name: "host".to_string() }.is_transient());
        assert!(!ConnectionError::AlreadyRetrying { name: "host".to_string() }.is_transient());
        assert!(!ConnectionError::NotConnected.is_transient());
        assert!(!ConnectionError::Decryption("bad tag".to_string()).is_transient());
        assert!(
            !ConnectionError::ListenBind { port: 80, reason: "denied".to_string() }.is_transient()
        );
    }

    #[test]
    fn decryption_codec_error_maps_to_decryption() {
        let err: ConnectionError = CodecError::Decryption(CipherError::AuthenticationFailed).into();
        assert!(matches!(err, ConnectionError::Decryption(_)));

        let err: ConnectionError = CodecError::InvalidUtf8.into();
        assert_eq!(err, ConnectionError::Codec(CodecError::InvalidUtf8));
    }

    #[test]
    fn io_error_converts() {
        let err: ConnectionError = io::Error::new(io::ErrorKind::ConnectionRefused, "refused").into();
        assert_eq!(err, ConnectionError::Io("refused".to_string()));
    }
}
