//! Mutable context threaded through every operation state hook.
//!
//! Holds the components the hooks act on: the register dictionary, the
//! transfer protocol tables and the bus state shared with the I/O tasks.

use std::sync::Arc;

use crate::bus::SharedBus;
use crate::dictionary::Dictionary;
use crate::protocol::RegisterEvents;
use crate::protocol::transfer::TransferProtocol;

pub struct StackContext {
    pub dictionary: Dictionary,
    pub transfer: TransferProtocol,
    pub bus: Arc<SharedBus>,
    /// Raised by dictionary write callbacks, drained by the stack.
    pub events: Arc<RegisterEvents>,
}

impl StackContext {
    pub fn new(dictionary: Dictionary, transfer: TransferProtocol, bus: Arc<SharedBus>) -> Self {
        Self {
            dictionary,
            transfer,
            bus,
            events: Arc::new(RegisterEvents::new()),
        }
    }

    pub fn interface_count(&self) -> usize {
        self.transfer.interface_count()
    }
}
