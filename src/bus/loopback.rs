//! In-memory transport.
//!
//! Frames written to the transport are recorded (and optionally looped back
//! as received data); frames injected through the [`LoopbackHandle`] are
//! delivered one per `read`. Used by the host binary and by tests in place
//! of a physical driver.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;

use super::{BusParameter, BusTransport};
use crate::error::{Result, TransportError};

#[derive(Debug, Default)]
struct LoopbackState {
    rx: VecDeque<Vec<u8>>,
    tx: Vec<Vec<u8>>,
    parameters: Vec<(BusParameter, u32)>,
    initialised: bool,
    echo: bool,
    fail_init: bool,
    fail_configure: bool,
}

fn lock(state: &Mutex<LoopbackState>) -> MutexGuard<'_, LoopbackState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Loopback bus driver.
#[derive(Debug)]
pub struct LoopbackTransport {
    name: String,
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackTransport {
    /// A transport plus the handle used to drive it from the outside.
    pub fn new(name: impl Into<String>) -> (Self, LoopbackHandle) {
        let state = Arc::new(Mutex::new(LoopbackState::default()));
        let handle = LoopbackHandle {
            state: Arc::clone(&state),
        };
        (
            Self {
                name: name.into(),
                state,
            },
            handle,
        )
    }

    /// Like [`new`](Self::new), but every written frame is also queued as
    /// received data.
    pub fn echo(name: impl Into<String>) -> (Self, LoopbackHandle) {
        let (transport, handle) = Self::new(name);
        lock(&transport.state).echo = true;
        (transport, handle)
    }
}

impl BusTransport for LoopbackTransport {
    fn init(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_init {
            return Err(TransportError::InitFailed.into());
        }
        state.initialised = true;
        debug!("Loopback {}: init", self.name);
        Ok(())
    }

    fn deinit(&mut self) -> Result<()> {
        lock(&self.state).initialised = false;
        debug!("Loopback {}: deinit", self.name);
        Ok(())
    }

    fn data_available(&mut self) -> bool {
        let state = lock(&self.state);
        state.initialised && !state.rx.is_empty()
    }

    fn size_available(&mut self) -> usize {
        lock(&self.state).rx.front().map_or(0, Vec::len)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut state = lock(&self.state);
        if !state.initialised {
            return Err(TransportError::Disconnected.into());
        }
        let Some(frame) = state.rx.pop_front() else {
            return Ok(0);
        };
        if frame.len() > buf.len() {
            return Err(TransportError::ReadFailed.into());
        }
        buf[..frame.len()].copy_from_slice(&frame);
        Ok(frame.len())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        let mut state = lock(&self.state);
        if !state.initialised {
            return Err(TransportError::WriteFailed.into());
        }
        if state.echo {
            state.rx.push_back(data.to_vec());
        }
        state.tx.push(data.to_vec());
        Ok(data.len())
    }

    fn configure(&mut self, parameter: BusParameter, value: u32) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_configure {
            return Err(TransportError::ConfigureFailed.into());
        }
        state.parameters.push((parameter, value));
        Ok(())
    }
}

/// Test-side view of a [`LoopbackTransport`].
#[derive(Debug, Clone)]
pub struct LoopbackHandle {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackHandle {
    /// Queue one frame as received bus data.
    pub fn inject(&self, bytes: Vec<u8>) {
        lock(&self.state).rx.push_back(bytes);
    }

    /// Drain everything written to the bus so far.
    pub fn take_written(&self) -> Vec<Vec<u8>> {
        core::mem::take(&mut lock(&self.state).tx)
    }

    pub fn is_initialised(&self) -> bool {
        lock(&self.state).initialised
    }

    pub fn parameters(&self) -> Vec<(BusParameter, u32)> {
        lock(&self.state).parameters.clone()
    }

    pub fn fail_init(&self, fail: bool) {
        lock(&self.state).fail_init = fail;
    }

    pub fn fail_configure(&self, fail: bool) {
        lock(&self.state).fail_configure = fail;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn reads_injected_frames_in_order() {
        let (mut bus, handle) = LoopbackTransport::new("test");
        bus.init().unwrap();
        handle.inject(vec![1, 2]);
        handle.inject(vec![3]);
        assert!(bus.data_available());
        assert_eq!(bus.size_available(), 2);
        let mut buf = [0u8; 8];
        assert_eq!(bus.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[1, 2]);
        assert_eq!(bus.read(&mut buf).unwrap(), 1);
        assert!(!bus.data_available());
    }

    #[test]
    fn echo_loops_writes_back() {
        let (mut bus, handle) = LoopbackTransport::echo("echo");
        bus.init().unwrap();
        bus.write(&[9, 9]).unwrap();
        assert!(bus.data_available());
        assert_eq!(handle.take_written(), vec![vec![9, 9]]);
    }

    #[test]
    fn failures_are_reported() {
        let (mut bus, handle) = LoopbackTransport::new("bad");
        handle.fail_init(true);
        assert_eq!(bus.init(), Err(Error::Transport(TransportError::InitFailed)));
        handle.fail_configure(true);
        assert!(bus.configure(BusParameter::Timeout, 10).is_err());
        assert!(bus.write(&[1]).is_err());
    }
}
