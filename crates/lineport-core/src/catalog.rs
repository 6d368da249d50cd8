//! Human-readable failure strings.
//!
//! Endpoints build the text of `Failed` events and decode warnings through a
//! [`MessageCatalog`], so an application can swap in translated templates
//! without touching connection logic.

use std::fmt;

/// Source of user-facing status and failure text.
pub trait MessageCatalog: Send + Sync + fmt::Debug {
    /// Terminal connect failure after all retries.
    fn cant_connect(&self, host: &str, port: u16, reason: &str) -> String;

    /// Connect failure that will be retried.
    fn retrying(&self, host: &str, port: u16, remaining: u32, reason: &str) -> String;

    /// Host name resolved to no address.
    fn server_not_found(&self, host: &str) -> String;

    /// Accepting a client on a listening socket failed.
    fn accept_failed(&self, port: u16, reason: &str) -> String;

    /// An inbound line could not be decoded.
    fn decode_failed(&self, name: &str, reason: &str) -> String;
}

/// Built-in English templates.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnglishCatalog;

impl MessageCatalog for EnglishCatalog {
    fn cant_connect(&self, host: &str, port: u16, reason: &str) -> String {
        format!("can't connect to server {host}:{port}: {reason}")
    }

    fn retrying(&self, host: &str, port: u16, remaining: u32, reason: &str) -> String {
        format!("can't connect to server {host}:{port}, retrying ({remaining} left): {reason}")
    }

    fn server_not_found(&self, host: &str) -> String {
        format!("server not found: {host}")
    }

    fn accept_failed(&self, port: u16, reason: &str) -> String {
        format!("can't accept connection on port {port}: {reason}")
    }

    fn decode_failed(&self, name: &str, reason: &str) -> String {
        format!("can't decode message from {name}: {reason}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn english_templates_fill_placeholders() {
        let catalog = EnglishCatalog;

        assert_eq!(
            catalog.cant_connect("localhost", 9000, "connection refused"),
            "can't connect to server localhost:9000: connection refused"
        );
        assert_eq!(
            catalog.retrying("example.org", 80, 2, "timed out"),
            "can't connect to server example.org:80, retrying (2 left): timed out"
        );
    }
}
