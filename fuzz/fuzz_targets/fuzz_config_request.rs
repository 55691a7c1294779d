//! Fuzz target: configuration frames against the default dictionary.
//!
//! Any payload is either answered or rejected; read-only registers never
//! change.
//!
//! cargo fuzz run fuzz_config_request

#![no_main]

use libfuzzer_sys::fuzz_target;
use mbabridge::dictionary::Dictionary;
use mbabridge::dictionary::table::{self, build_register_table};
use mbabridge::protocol::config::{self, CONFIG_HEADER_SIZE};

fuzz_target!(|data: &[u8]| {
    let Ok(mut dict) = Dictionary::new(build_register_table(3, "Fuzzboard"), 0x2C) else {
        return;
    };
    dict.init();

    if let Ok(reply) = config::process(&mut dict, data) {
        assert!(reply.len() >= CONFIG_HEADER_SIZE);
        assert_eq!(reply[..2], data[..2]);
    }
    assert_eq!(dict.value(table::DEVICE_NAME), Some(&b"Fuzzboard"[..]));
    assert_eq!(dict.value(table::VENDOR_ID), Some(&[0x2C][..]));
});
