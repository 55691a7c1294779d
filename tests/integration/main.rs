//! Integration test driver for `tests/integration/`.
//!
//! Each `mod` below exercises the bridge end to end against mock bus
//! transports. Everything runs on the host with no real interfaces.

mod dispatcher_tests;
mod mock_bus;
mod stress_tests;
