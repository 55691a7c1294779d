//! Central dispatcher loop.
//!
//! One iteration: wait for an inbound frame, run it through the protocol
//! stack, tick the operation state, act on bus transitions, refresh the
//! interface-state mirror, then post whatever came out.

use core::time::Duration;

use log::{debug, info, warn};

use super::bus_app::{BusApp, Inbound};
use super::stack::ProtocolStack;
use crate::os::StopToken;
use crate::protocol::transfer::Outbound;

pub struct Dispatcher {
    stack: ProtocolStack,
    bus_app: BusApp,
    inbound: Inbound,
    poll: Duration,
}

impl Dispatcher {
    pub fn new(stack: ProtocolStack, bus_app: BusApp, inbound: Inbound, poll: Duration) -> Self {
        Self {
            stack,
            bus_app,
            inbound,
            poll,
        }
    }

    pub fn stack(&self) -> &ProtocolStack {
        &self.stack
    }

    pub fn stack_mut(&mut self) -> &mut ProtocolStack {
        &mut self.stack
    }

    pub fn bus_app(&self) -> &BusApp {
        &self.bus_app
    }

    /// Producer handle for the central queue.
    pub fn inbound(&self) -> &Inbound {
        &self.inbound
    }

    /// Run one iteration. Returns whether a frame was received.
    pub fn step(&mut self) -> bool {
        let processed = match self.inbound.mailbox().receive_timeout(self.poll) {
            Some(frame) => {
                debug!(
                    "Inbound {:?} frame {} -> {} ({} bytes)",
                    frame.command,
                    frame.source,
                    frame.destination,
                    frame.data.len()
                );
                Some(self.stack.process(frame).unwrap_or_else(|e| {
                    warn!("Frame dropped: {}", e);
                    None
                }))
            }
            None => None,
        };

        let generated = self.stack.update().unwrap_or_else(|e| {
            warn!("Operation update failed: {}", e);
            None
        });
        self.bus_app.update(self.stack.bus().states());
        self.stack.refresh_interface_states();

        let received = processed.is_some();
        for outbound in [generated, processed.flatten()].into_iter().flatten() {
            self.post(outbound);
        }
        received
    }

    /// Loop until `stop` is raised, then stop every interface.
    pub fn run(&mut self, stop: &StopToken) {
        info!("Dispatcher running");
        while !stop.is_raised() {
            self.step();
        }
        self.bus_app.shutdown();
        info!("Dispatcher stopped");
    }

    fn post(&self, outbound: Outbound) {
        let Outbound { interface, frame } = outbound;
        if let Err(e) = self.bus_app.post(interface, frame) {
            warn!("Outbound frame for interface {} dropped: {}", interface, e);
        }
    }
}
