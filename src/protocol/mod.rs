//! Wire protocols: transfer framing and routing, configuration (register)
//! access and the operation state machine.

pub mod config;
pub mod frame;
pub mod links;
pub mod operation;
pub mod transfer;

use core::sync::atomic::{AtomicBool, Ordering};

/// Flags raised by dictionary write callbacks and drained by the protocol
/// stack after each frame. Callbacks run inside `Dictionary::process`, where
/// the stack's tables are borrowed, so they only record what changed.
#[derive(Debug, Default)]
pub struct RegisterEvents {
    device_id: AtomicBool,
    links: AtomicBool,
    reset: AtomicBool,
}

impl RegisterEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise_device_id(&self) {
        self.device_id.store(true, Ordering::Release);
    }

    pub fn raise_links(&self) {
        self.links.store(true, Ordering::Release);
    }

    pub fn raise_reset(&self) {
        self.reset.store(true, Ordering::Release);
    }

    pub fn take_device_id(&self) -> bool {
        self.device_id.swap(false, Ordering::AcqRel)
    }

    pub fn take_links(&self) -> bool {
        self.links.swap(false, Ordering::AcqRel)
    }

    pub fn take_reset(&self) -> bool {
        self.reset.swap(false, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_read_and_clear() {
        let events = RegisterEvents::new();
        assert!(!events.take_links());
        events.raise_links();
        assert!(events.take_links());
        assert!(!events.take_links());
        events.raise_device_id();
        events.raise_reset();
        assert!(events.take_device_id());
        assert!(events.take_reset());
    }
}
