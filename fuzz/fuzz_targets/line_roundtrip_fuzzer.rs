//! Fuzz target for outbound encoding
//!
//! # Strategy
//!
//! - Arbitrary payload text, with or without a passphrase
//! - Payloads seeded with close literals, sentinels and escape characters
//!
//! # Invariants
//!
//! - An encoded payload is exactly one wire line
//! - A payload never decodes as a close request
//! - Every payload decodes back to itself, sentinels included

#![no_main]

use std::sync::Arc;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use lineport_core::{CLOSE_LITERAL, Decoded, LineCodec};
use lineport_crypto::XChaChaLineCipher;

#[derive(Debug, Arbitrary)]
struct Input {
    text: String,
    passphrase: Option<String>,
    prefix_close_literal: bool,
}

fuzz_target!(|input: Input| {
    let codec = match &input.passphrase {
        Some(passphrase) => LineCodec::with_cipher(Arc::new(XChaChaLineCipher::from_passphrase(passphrase))),
        None => LineCodec::new(),
    };

    let text = if input.prefix_close_literal {
        format!("{CLOSE_LITERAL}{}", input.text)
    } else {
        input.text
    };

    let Ok(line) = codec.encode(&text) else {
        return;
    };
    assert!(line.ends_with('\n'));
    assert_eq!(line.matches('\n').count(), 1);

    match codec.decode(&line) {
        Ok(Decoded::Message(decoded)) => assert_eq!(decoded, text),
        Ok(Decoded::Close) => panic!("payload decoded as close request"),
        Err(err) => panic!("own encoding rejected: {err}"),
    }
});
