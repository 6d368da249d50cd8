//! Error types for line cipher operations

use thiserror::Error;

/// Errors from line encryption and decryption.
///
/// Every decryption failure is reported as a distinct variant so callers can
/// tell a wrong key apart from a line that was never ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CipherError {
    /// Line is not valid lowercase or uppercase hex
    #[error("malformed ciphertext: {reason}")]
    Malformed {
        /// What was wrong with the encoding
        reason: String,
    },

    /// Decoded line is shorter than a nonce plus authentication tag
    #[error("ciphertext too short: need at least {minimum} bytes, got {actual}")]
    TooShort {
        /// Minimum sealed length
        minimum: usize,
        /// Actual decoded length
        actual: usize,
    },

    /// Authentication tag did not verify (wrong key or tampered line)
    #[error("decryption failed: authentication failed")]
    AuthenticationFailed,

    /// Plaintext decrypted but is not UTF-8
    #[error("decrypted plaintext is not valid UTF-8")]
    InvalidUtf8,

    /// OS random source unavailable when generating a nonce
    #[error("random source unavailable: {0}")]
    Rng(String),
}

impl CipherError {
    /// Returns true if this error means the line could not be authenticated.
    ///
    /// Authentication failures point at a key mismatch between peers; the
    /// other variants point at a peer that is not speaking the protocol.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::AuthenticationFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_tag_mismatch_is_authentication() {
        assert!(CipherError::AuthenticationFailed.is_authentication());
        assert!(!CipherError::InvalidUtf8.is_authentication());
        assert!(!CipherError::Malformed { reason: "odd length".to_string() }.is_authentication());
        assert!(!CipherError::TooShort { minimum: 40, actual: 3 }.is_authentication());
    }

    #[test]
    fn display_names_the_bounds() {
        let err = CipherError::TooShort { minimum: 40, actual: 3 };
        assert_eq!(err.to_string(), "ciphertext too short: need at least 40 bytes, got 3");
    }
}
