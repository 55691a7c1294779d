//! Fuzz target: `Frame::decode`
//!
//! Arbitrary bus bytes must never panic the decoder, and anything it
//! accepts must encode back to the exact same bytes.
//!
//! cargo fuzz run fuzz_frame_decode

#![no_main]

use libfuzzer_sys::fuzz_target;
use mbabridge::protocol::frame::{CastMode, CastProfile, Frame};

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = Frame::decode(data) {
        assert_eq!(frame.wire_size(), data.len());
        assert_eq!(frame.encode().unwrap(), data);
    }

    // End-bus casting wraps any payload that fits the size field.
    let profile = CastProfile {
        mode: CastMode::EndBus,
        source: 0x50,
        destination: 0x08,
    };
    if let Ok(frame) = profile.frame_from_bus(data.to_vec()) {
        assert_eq!(frame.data, data);
    }
});
