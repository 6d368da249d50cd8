//! Line encryption using `XChaCha20-Poly1305`
//!
//! Both functions are pure: the nonce is provided by the caller. This keeps
//! the wire format testable with fixed inputs.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};

use crate::{error::CipherError, key::LineKey};

/// Size of the `XChaCha20` nonce prefixed to every sealed line
pub const NONCE_SIZE: usize = 24;

/// Poly1305 tag size (16 bytes)
const POLY1305_TAG_SIZE: usize = 16;

/// Encrypt one line of text.
///
/// Returns `hex(nonce || ciphertext || tag)`, which contains no line breaks.
///
/// # Security
///
/// The caller MUST NOT reuse a nonce with the same key. Production callers
/// draw it from the OS RNG (see [`crate::XChaChaLineCipher`]).
pub fn encrypt_line(plaintext: &str, key: &LineKey, nonce: [u8; NONCE_SIZE]) -> String {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    let Ok(ciphertext) = cipher.encrypt(XNonce::from_slice(&nonce), plaintext.as_bytes()) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);

    hex::encode(sealed)
}

/// Decrypt one line produced by [`encrypt_line`].
///
/// # Errors
///
/// - `Malformed`: line is not hex
/// - `TooShort`: line cannot hold a nonce and a tag
/// - `AuthenticationFailed`: wrong key or tampered line
/// - `InvalidUtf8`: plaintext is not text
pub fn decrypt_line(line: &str, key: &LineKey) -> Result<String, CipherError> {
    let sealed =
        hex::decode(line).map_err(|e| CipherError::Malformed { reason: e.to_string() })?;

    let minimum = NONCE_SIZE + POLY1305_TAG_SIZE;
    if sealed.len() < minimum {
        return Err(CipherError::TooShort { minimum, actual: sealed.len() });
    }

    let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    let plaintext = cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CipherError::AuthenticationFailed)?;

    String::from_utf8(plaintext).map_err(|_| CipherError::InvalidUtf8)
}
