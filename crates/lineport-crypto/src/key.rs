//! Line key derivation using HKDF

use std::fmt;

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

/// Size of a line key in bytes.
pub const KEY_SIZE: usize = 32;

/// Label used for line key derivation
const LINE_KEY_LABEL: &[u8] = b"lineportLineKeyV1";

/// Symmetric key shared by both ends of a connection.
///
/// Key material is zeroized when the key is dropped.
#[derive(Clone)]
pub struct LineKey {
    key: [u8; KEY_SIZE],
}

impl LineKey {
    /// Wrap raw key material.
    pub fn from_bytes(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Derive a key from a shared passphrase.
    ///
    /// Deterministic: both peers configured with the same passphrase end up
    /// with the same key. The passphrase is used as HKDF input keying
    /// material with no salt, so it should carry enough entropy on its own.
    pub fn from_passphrase(passphrase: &[u8]) -> Self {
        let hkdf = Hkdf::<Sha256>::new(None, passphrase);

        let mut key = [0u8; KEY_SIZE];
        let Ok(()) = hkdf.expand(LINE_KEY_LABEL, &mut key) else {
            unreachable!("32 bytes is a valid HKDF-SHA256 output length");
        };

        Self { key }
    }

    /// Raw key bytes for the AEAD.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl Drop for LineKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl fmt::Debug for LineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineKey").field("key", &"<redacted>").finish()
    }
}
