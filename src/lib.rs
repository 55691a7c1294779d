//! MBA bridge library.
//!
//! A multi-bus bridge node: a register dictionary answering configuration
//! frames, transfer-protocol routing between physical interfaces, the
//! device and per-interface operation state machines, and the reader,
//! writer and dispatcher tasks that move frames between them.

#![deny(unused_must_use)]

pub mod app;
pub mod bus;
pub mod config;
pub mod dictionary;
pub mod error;
pub mod os;
pub mod protocol;
