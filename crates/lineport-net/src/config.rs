//! Runtime configuration for endpoints and servers.

use std::{sync::Arc, time::Duration};

use lineport_core::{
    AddressNaming, EnglishCatalog, LineCipher, LineCodec, MessageCatalog, NamingStrategy,
    XChaChaLineCipher, codec::DEFAULT_MAX_LINE_LEN,
};

/// Pause between connection attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// How long the acceptor sleeps while new connections are blocked.
pub const DEFAULT_ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// How long `finalize_server` waits for the acceptor to exit.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Interface servers bind to by default.
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// Endpoint configuration.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    /// Pause between failed connection attempts
    pub retry_interval: Duration,
    /// Longest accepted wire line in bytes, excluding the newline
    pub max_line_len: usize,
    /// Encrypts every line when set
    pub cipher: Option<Arc<dyn LineCipher>>,
    /// Produces default display names
    pub naming: Arc<dyn NamingStrategy>,
    /// Produces failure text for `Failed` events
    pub catalog: Arc<dyn MessageCatalog>,
}

impl EndpointConfig {
    /// Encrypt lines with a key derived from `passphrase`.
    #[must_use]
    pub fn with_passphrase(mut self, passphrase: &str) -> Self {
        self.cipher = Some(Arc::new(XChaChaLineCipher::from_passphrase(passphrase)));
        self
    }

    /// Codec matching this configuration.
    pub fn codec(&self) -> LineCodec {
        let codec = match &self.cipher {
            Some(cipher) => LineCodec::with_cipher(Arc::clone(cipher)),
            None => LineCodec::new(),
        };
        codec.max_line_len(self.max_line_len)
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            retry_interval: DEFAULT_RETRY_INTERVAL,
            max_line_len: DEFAULT_MAX_LINE_LEN,
            cipher: None,
            naming: Arc::new(AddressNaming),
            catalog: Arc::new(EnglishCatalog),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind (e.g., "0.0.0.0" or "127.0.0.1")
    pub bind_host: String,
    /// Sleep between checks while new connections are blocked
    pub accept_backoff: Duration,
    /// Upper bound on waiting for the acceptor during shutdown
    pub shutdown_grace: Duration,
    /// Configuration for every accepted endpoint
    pub endpoint: EndpointConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: DEFAULT_BIND_HOST.to_string(),
            accept_backoff: DEFAULT_ACCEPT_BACKOFF,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            endpoint: EndpointConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_codec_is_plain() {
        let config = EndpointConfig::default();
        assert!(!config.codec().is_encrypted());
        assert_eq!(config.codec().line_limit(), DEFAULT_MAX_LINE_LEN);
    }

    #[test]
    fn passphrase_enables_encryption() {
        let config = EndpointConfig { max_line_len: 64, ..Default::default() }.with_passphrase("k");
        let codec = config.codec();

        assert!(codec.is_encrypted());
        assert_eq!(codec.line_limit(), 64);
    }
}
