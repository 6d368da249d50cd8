//! Fuzz target for inbound line decoding
//!
//! Every byte sequence a peer can send ends up in `LineCodec::decode_bytes`.
//!
//! # Strategy
//!
//! - Random bytes: arbitrary data, including invalid UTF-8
//! - Same input through a plain and an encrypted codec
//! - Small line limit so the length check is reached often
//!
//! # Invariants
//!
//! - NEVER panic on malformed input
//! - A decoded message encodes and decodes back to itself
//! - Only the exact close literal decodes as a close request

#![no_main]

use std::sync::{Arc, OnceLock};

use libfuzzer_sys::fuzz_target;
use lineport_core::{CLOSE_LITERAL, Decoded, LineCodec};
use lineport_crypto::XChaChaLineCipher;

fn codecs() -> &'static [LineCodec; 2] {
    static CODECS: OnceLock<[LineCodec; 2]> = OnceLock::new();
    CODECS.get_or_init(|| {
        let cipher = Arc::new(XChaChaLineCipher::from_passphrase("fuzz"));
        [LineCodec::new().max_line_len(4096), LineCodec::with_cipher(cipher).max_line_len(4096)]
    })
}

fuzz_target!(|data: &[u8]| {
    for codec in codecs() {
        match codec.decode_bytes(data) {
            Ok(Decoded::Message(text)) => {
                if let Ok(line) = codec.encode(&text) {
                    assert_eq!(codec.decode(&line).ok(), Some(Decoded::Message(text)));
                }
            },
            Ok(Decoded::Close) => {
                let line = data.strip_suffix(b"\n").unwrap_or(data);
                assert_eq!(line, CLOSE_LITERAL.as_bytes());
            },
            Err(_) => {},
        }
    }
});
