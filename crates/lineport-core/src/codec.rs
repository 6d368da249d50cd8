//! Line framing.
//!
//! Every message travels as exactly one `\n`-terminated line. Outbound text
//! has each `\n` replaced by [`LINE_BREAK_SENTINEL`]; inbound lines get the
//! sentinel turned back into `\n`. With a cipher configured, the whole
//! substituted line is encrypted before it is written and decrypted after it
//! is read.
//!
//! # Escaping
//!
//! Payload `@` and [`ESCAPE_CHAR`] characters are prefixed with
//! [`ESCAPE_CHAR`] before line breaks are substituted, so every unescaped `@`
//! on the wire belongs to a sentinel:
//!
//! ```text
//! payload  "@#\n"   ──escape──▶  "\@#"  ──sentinel──▶  "\@#@#@"
//! ```
//!
//! Decoding walks the line once: an escaped character is taken literally, a
//! sentinel becomes `\n`, anything else is copied. Lines from peers that do
//! not escape still decode; a stray `@` or trailing [`ESCAPE_CHAR`] is kept
//! as is.
//!
//! # Close Literal
//!
//! A line consisting of [`CLOSE_LITERAL`] asks the receiver to end its read
//! loop without error. An encoded payload never equals it: the literal starts
//! with an unescaped `@` that is not a sentinel. Encrypted lines are hex.
//!
//! Only `\n` delimits lines. A `\r` inside a payload is carried through
//! unchanged.

use std::{fmt, sync::Arc};

use lineport_crypto::LineCipher;

use crate::error::CodecError;

/// Token that stands in for `\n` inside a wire line.
pub const LINE_BREAK_SENTINEL: &str = "@#@";

/// Wire line that requests a graceful close.
pub const CLOSE_LITERAL: &str = "@@END_CONNECTION";

/// Prefix marking a payload character to be taken literally.
pub const ESCAPE_CHAR: char = '\\';

/// Default upper bound on a single wire line, excluding the newline.
pub const DEFAULT_MAX_LINE_LEN: usize = 1024 * 1024;

/// Result of decoding one inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A payload, with line breaks restored
    Message(String),
    /// The peer asked to close the connection
    Close,
}

/// Encoder/decoder for one endpoint's wire lines.
#[derive(Clone)]
pub struct LineCodec {
    cipher: Option<Arc<dyn LineCipher>>,
    max_line_len: usize,
}

impl LineCodec {
    /// Plain-text codec with the default line limit.
    pub fn new() -> Self {
        Self { cipher: None, max_line_len: DEFAULT_MAX_LINE_LEN }
    }

    /// Codec that encrypts every line with `cipher`.
    pub fn with_cipher(cipher: Arc<dyn LineCipher>) -> Self {
        Self { cipher: Some(cipher), ..Self::new() }
    }

    /// Override the maximum wire line length.
    #[must_use]
    pub fn max_line_len(mut self, max: usize) -> Self {
        self.max_line_len = max;
        self
    }

    /// Configured maximum wire line length in bytes.
    pub fn line_limit(&self) -> usize {
        self.max_line_len
    }

    /// Returns true if lines are encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    /// Encode `text` into one wire line, including the trailing `\n`.
    ///
    /// # Errors
    ///
    /// - `CodecError::Encryption` if the cipher fails
    /// - `CodecError::LineTooLong` if the encoded line exceeds the limit
    pub fn encode(&self, text: &str) -> Result<String, CodecError> {
        let substituted = substitute(text);

        let payload = match &self.cipher {
            Some(cipher) => cipher.encrypt(&substituted).map_err(CodecError::Encryption)?,
            None => substituted,
        };

        if payload.len() > self.max_line_len {
            return Err(CodecError::LineTooLong { len: payload.len(), max: self.max_line_len });
        }

        let mut line = payload;
        line.push('\n');
        Ok(line)
    }

    /// The graceful-close line, including the trailing `\n`.
    pub fn close_line() -> String {
        format!("{CLOSE_LITERAL}\n")
    }

    /// Decode one raw line as read from the socket.
    ///
    /// A single trailing `\n` is stripped if present.
    pub fn decode_bytes(&self, raw: &[u8]) -> Result<Decoded, CodecError> {
        let line = std::str::from_utf8(raw).map_err(|_| CodecError::InvalidUtf8)?;
        self.decode(line)
    }

    /// Decode one line of text.
    ///
    /// A single trailing `\n` is stripped if present.
    ///
    /// # Errors
    ///
    /// - `CodecError::LineTooLong` if the line exceeds the limit
    /// - `CodecError::Decryption` if the cipher rejects the line
    pub fn decode(&self, line: &str) -> Result<Decoded, CodecError> {
        let line = line.strip_suffix('\n').unwrap_or(line);

        if line.len() > self.max_line_len {
            return Err(CodecError::LineTooLong { len: line.len(), max: self.max_line_len });
        }

        if line == CLOSE_LITERAL {
            return Ok(Decoded::Close);
        }

        let text = match &self.cipher {
            Some(cipher) => restore(&cipher.decrypt(line).map_err(CodecError::Decryption)?),
            None => restore(line),
        };

        Ok(Decoded::Message(text))
    }
}

impl Default for LineCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LineCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineCodec")
            .field("encrypted", &self.is_encrypted())
            .field("max_line_len", &self.max_line_len)
            .finish()
    }
}

/// Escape `@` and [`ESCAPE_CHAR`], then replace line breaks by the sentinel.
fn substitute(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\n' => out.push_str(LINE_BREAK_SENTINEL),
            '@' | ESCAPE_CHAR => {
                out.push(ESCAPE_CHAR);
                out.push(ch);
            },
            _ => out.push(ch),
        }
    }
    out
}

/// Inverse of [`substitute`].
fn restore(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.char_indices();

    while let Some((at, ch)) = chars.next() {
        if ch == ESCAPE_CHAR {
            // A trailing escape has nothing to protect and is kept.
            out.push(chars.next().map_or(ESCAPE_CHAR, |(_, escaped)| escaped));
        } else if line[at..].starts_with(LINE_BREAK_SENTINEL) {
            out.push('\n');
            // Skip the rest of the sentinel; it is ASCII.
            chars.nth(LINE_BREAK_SENTINEL.len() - 2);
        } else {
            out.push(ch);
        }
    }
    out
}
