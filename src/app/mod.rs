//! Application layer: the protocol stack, the per-interface bus tasks and
//! the dispatcher that ties them together.
//!
//! [`build`] wires a [`Dispatcher`] from a [`BridgeConfig`] and one
//! transport per configured interface. Interfaces marked `start_active`
//! are launched by the dispatcher's first iteration.

pub mod bus_app;
pub mod dispatcher;
pub mod stack;

use core::time::Duration;
use std::sync::Arc;

use log::info;

use crate::bus::{BusTransport, SharedBus};
use crate::config::BridgeConfig;
use crate::error::{Error, Result};

pub use bus_app::{BusApp, Inbound, TaskSettings};
pub use dispatcher::Dispatcher;
pub use stack::ProtocolStack;

/// Build and start the stack, then attach `transports` in interface order.
pub fn build(config: &BridgeConfig, transports: Vec<Box<dyn BusTransport>>) -> Result<Dispatcher> {
    config.validate()?;
    if transports.len() != config.interfaces.len() {
        return Err(Error::Config("one transport per interface required"));
    }

    let bus = Arc::new(SharedBus::new(config.interfaces.len()));
    for (index, iface) in config.interfaces.iter().enumerate() {
        if iface.start_active {
            bus.states().preset_launch(index as u8)?;
        }
    }

    let mut stack = ProtocolStack::new(config, Arc::clone(&bus))?;
    stack.start()?;

    let inbound = Inbound::new(
        "central-inbound",
        Duration::from_millis(config.mutex_timeout_ms.into()),
    );
    let mut bus_app = BusApp::new(bus, inbound.clone(), TaskSettings::from_config(config));
    for (iface, transport) in config.interfaces.iter().zip(transports) {
        bus_app.add_interface(iface, transport)?;
    }

    info!(
        "Bridge '{}' built: logical id {}, {} interfaces",
        config.device_name,
        config.device_logical_id,
        config.interfaces.len()
    );
    Ok(Dispatcher::new(
        stack,
        bus_app,
        inbound,
        Duration::from_millis(config.dispatch_poll_ms.into()),
    ))
}
