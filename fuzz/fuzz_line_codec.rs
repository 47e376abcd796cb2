//! Fuzz target for server line extraction.
//!
//! Run with: cargo +nightly fuzz run fuzz_line_codec
//!
//! Feeds arbitrary server bytes through `LineCodec` in two chunks and checks
//! the line-length bound and that the decoder always makes progress.

#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

use irccd_core::codec::{LineCodec, MAX_LINE_LEN, frame};

fuzz_target!(|data: &[u8]| {
    let split = data.first().map_or(0, |b| *b as usize).min(data.len());
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::new();

    for chunk in [&data[..split], &data[split..]] {
        buf.extend_from_slice(chunk);
        loop {
            let before = buf.len();
            match codec.decode(&mut buf) {
                Ok(Some(line)) => {
                    assert!(line.as_bytes().len() <= MAX_LINE_LEN);
                    assert!(buf.len() < before);
                    if let Some(args) = line.keepalive_args() {
                        // Echoing never produces an over-long line.
                        if let Ok(reply) = frame("PONG", &[&args]) {
                            assert!(reply.len() <= MAX_LINE_LEN);
                        }
                    }
                }
                Ok(None) => break,
                Err(_) => return,
            }
        }
        assert!(buf.len() < MAX_LINE_LEN);
    }
});
