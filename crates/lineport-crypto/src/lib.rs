//! Lineport line cipher
//!
//! Symmetric encryption for single wire lines. Every line is sealed on its
//! own, so a receiver can decrypt any line without keeping state between
//! messages.
//!
//! # Key Lifecycle
//!
//! ```text
//! Shared passphrase
//!        │
//!        ▼
//! HKDF-SHA256 → Line Key (32 bytes, zeroized on drop)
//!        │
//!        ▼
//! XChaCha20-Poly1305 (random 24-byte nonce per line)
//!        │
//!        ▼
//! hex(nonce || ciphertext || tag) → one wire line
//! ```
//!
//! The hex alphabet never contains a line break, so an encrypted line always
//! survives line framing untouched.
//!
//! # Security
//!
//! - The Poly1305 tag rejects a wrong key or a tampered line
//! - Nonces are random, never derived from a counter, so two peers sharing a
//!   key cannot collide by sending the same sequence of messages
//! - There is no replay protection: the transport is point-to-point TCP and
//!   the cipher only hides payloads from observers of the socket

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod cipher;
mod encryption;
mod error;
mod key;

pub use cipher::{LineCipher, XChaChaLineCipher};
pub use encryption::{NONCE_SIZE, decrypt_line, encrypt_line};
pub use error::CipherError;
pub use key::{KEY_SIZE, LineKey};
