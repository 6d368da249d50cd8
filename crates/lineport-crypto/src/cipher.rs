//! Stateful line cipher used by connection endpoints.

use std::fmt;

use crate::{
    encryption::{NONCE_SIZE, decrypt_line, encrypt_line},
    error::CipherError,
    key::LineKey,
};

/// Symmetric whole-line cipher.
///
/// Endpoints encrypt every outbound line after line-break substitution and
/// decrypt every inbound line before restoring line breaks. Implementations
/// must fail `decrypt` distinguishably when the key is wrong or the input is
/// corrupted instead of returning garbage text.
pub trait LineCipher: Send + Sync + fmt::Debug {
    /// Encrypt one line. The result must not contain `\n` or `\r`.
    fn encrypt(&self, plaintext: &str) -> Result<String, CipherError>;

    /// Decrypt one line produced by the peer's [`LineCipher::encrypt`].
    fn decrypt(&self, line: &str) -> Result<String, CipherError>;
}

/// `XChaCha20-Poly1305` line cipher with random per-line nonces.
#[derive(Debug, Clone)]
pub struct XChaChaLineCipher {
    key: LineKey,
}

impl XChaChaLineCipher {
    /// Create a cipher from an existing key.
    pub fn new(key: LineKey) -> Self {
        Self { key }
    }

    /// Create a cipher from a shared passphrase.
    pub fn from_passphrase(passphrase: &str) -> Self {
        Self::new(LineKey::from_passphrase(passphrase.as_bytes()))
    }
}

impl LineCipher for XChaChaLineCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let mut nonce = [0u8; NONCE_SIZE];
        getrandom::fill(&mut nonce).map_err(|e| CipherError::Rng(e.to_string()))?;

        Ok(encrypt_line(plaintext, &self.key, nonce))
    }

    fn decrypt(&self, line: &str) -> Result<String, CipherError> {
        decrypt_line(line, &self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cipher_roundtrip_with_shared_passphrase() {
        let sender = XChaChaLineCipher::from_passphrase("shared secret");
        let receiver = XChaChaLineCipher::from_passphrase("shared secret");

        let line = sender.encrypt("meet at noon").unwrap();
        assert_eq!(receiver.decrypt(&line).unwrap(), "meet at noon");
    }

    #[test]
    fn repeated_encryptions_differ() {
        let cipher = XChaChaLineCipher::from_passphrase("shared secret");

        let a = cipher.encrypt("ping").unwrap();
        let b = cipher.encrypt("ping").unwrap();

        assert_ne!(a, b, "random nonces must make ciphertexts differ");
    }

    #[test]
    fn mismatched_passphrase_is_an_authentication_failure() {
        let sender = XChaChaLineCipher::from_passphrase("key A");
        let receiver = XChaChaLineCipher::from_passphrase("key B");

        let line = sender.encrypt("hello").unwrap();
        let err = receiver.decrypt(&line).unwrap_err();

        assert!(err.is_authentication(), "unexpected error: {err}");
    }

    #[test]
    fn encrypted_line_has_no_line_breaks() {
        let cipher = XChaChaLineCipher::from_passphrase("k");
        let line = cipher.encrypt("first\nsecond\r\nthird").unwrap();

        assert!(!line.contains('\n'));
        assert!(!line.contains('\r'));
    }
}
