//! Fuzz target for the TOML configuration parser.
//!
//! Run with: cargo +nightly fuzz run fuzz_config_parser

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // A config that parses must also pass validation on its own.
        if let Ok(config) = irccd_config::AppConfig::parse(s) {
            assert!(config.validate().is_ok());
        }
    }
});
