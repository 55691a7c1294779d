//! Mock bus transport for integration tests.
//!
//! Records every driver call so tests can assert on bring-up order,
//! written frames and teardown without a physical interface.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use mbabridge::bus::{BusParameter, BusTransport};
use mbabridge::error::{Result, TransportError};

// ── Call record ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusCall {
    Init,
    Deinit,
    Configure(BusParameter, u32),
    Write(Vec<u8>),
}

#[derive(Default)]
struct MockState {
    calls: Vec<BusCall>,
    rx: VecDeque<Vec<u8>>,
    up: bool,
}

// ── MockBus ───────────────────────────────────────────────────

pub struct MockBus {
    state: Arc<Mutex<MockState>>,
}

#[derive(Clone)]
pub struct MockBusHandle {
    state: Arc<Mutex<MockState>>,
}

pub fn mock_bus() -> (MockBus, MockBusHandle) {
    let state = Arc::new(Mutex::new(MockState::default()));
    (
        MockBus {
            state: Arc::clone(&state),
        },
        MockBusHandle { state },
    )
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap()
}

impl BusTransport for MockBus {
    fn init(&mut self) -> Result<()> {
        let mut s = lock(&self.state);
        s.calls.push(BusCall::Init);
        s.up = true;
        Ok(())
    }

    fn deinit(&mut self) -> Result<()> {
        let mut s = lock(&self.state);
        s.calls.push(BusCall::Deinit);
        s.up = false;
        Ok(())
    }

    fn data_available(&mut self) -> bool {
        let s = lock(&self.state);
        s.up && !s.rx.is_empty()
    }

    fn size_available(&mut self) -> usize {
        lock(&self.state).rx.front().map_or(0, Vec::len)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut s = lock(&self.state);
        let frame = s.rx.pop_front().ok_or(TransportError::ReadFailed)?;
        buf[..frame.len()].copy_from_slice(&frame);
        Ok(frame.len())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize> {
        lock(&self.state).calls.push(BusCall::Write(data.to_vec()));
        Ok(data.len())
    }

    fn configure(&mut self, parameter: BusParameter, value: u32) -> Result<()> {
        lock(&self.state).calls.push(BusCall::Configure(parameter, value));
        Ok(())
    }
}

#[allow(dead_code)]
impl MockBusHandle {
    pub fn push_rx(&self, bytes: Vec<u8>) {
        lock(&self.state).rx.push_back(bytes);
    }

    pub fn calls(&self) -> Vec<BusCall> {
        lock(&self.state).calls.clone()
    }

    pub fn is_up(&self) -> bool {
        lock(&self.state).up
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|c| match c {
                BusCall::Write(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn deinit_count(&self) -> usize {
        lock(&self.state)
            .calls
            .iter()
            .filter(|c| **c == BusCall::Deinit)
            .count()
    }
}

/// Poll `cond` until it holds or `timeout` passes.
#[allow(dead_code)]
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}
