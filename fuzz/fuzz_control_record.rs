//! Fuzz target for control records.
//!
//! Run with: cargo +nightly fuzz run fuzz_control_record

#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

use irccd_core::control::{ControlCodec, ControlRecord};
use irccd_core::dispatch::Command;

const RECORD_SIZE: usize = 64;

fuzz_target!(|data: &[u8]| {
    let mut codec = ControlCodec::new(RECORD_SIZE);
    let mut buf = BytesMut::from(data);

    while let Ok(Some(item)) = codec.decode_eof(&mut buf) {
        let Ok(record) = item else { continue };
        assert!(!record.payload.contains(['\0', '\r', '\n']));

        // Accepted records survive a re-encode unchanged.
        let encoded = record.encode(RECORD_SIZE).expect("decoded record re-encodes");
        assert_eq!(ControlRecord::parse(&encoded).as_ref(), Ok(&record));

        let _ = Command::try_from(record);
    }
});
