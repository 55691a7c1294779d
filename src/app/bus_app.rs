//! Per-interface reader/writer orchestration.
//!
//! ```text
//!            launch (InitToInactive)              stop (ActiveToStop)
//!  Init ───────────────────────────▶ reader ─┬─▶ writer ──────▶ joined, deinit
//!                                            │
//!              init/configure failed ────────┴─▶ deinit, force_stop
//! ```
//!
//! Each running interface owns one reader thread and one writer thread.
//! The reader brings the transport up, spawns its writer and then polls
//! for frames; the writer marks the interface `Active` and drains its
//! outbound mailbox. Both observe the session's [`StopToken`].

use core::time::Duration;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use log::{debug, info, warn};

use crate::bus::{BusInstanceState, BusParameter, BusStateMachine, BusTransition, BusTransport, SharedBus};
use crate::config::{BridgeConfig, InterfaceConfig};
use crate::error::{DecodeError, Error, Result};
use crate::os::{spawn_task, InboundQueue, Mailbox, StopToken, BUS_MAILBOX_DEPTH, CENTRAL_MAILBOX_DEPTH};
use crate::protocol::frame::Frame;

pub type SharedTransport = Arc<Mutex<Box<dyn BusTransport>>>;
pub type Inbound = InboundQueue<Frame, CENTRAL_MAILBOX_DEPTH>;
pub type Outbox = Mailbox<Frame, BUS_MAILBOX_DEPTH>;

fn lock(transport: &SharedTransport) -> MutexGuard<'_, Box<dyn BusTransport>> {
    transport.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Task timing shared by every interface.
#[derive(Debug, Clone, Copy)]
pub struct TaskSettings {
    pub reader_poll: Duration,
    pub writer_poll: Duration,
    pub stack_kb: usize,
}

impl TaskSettings {
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            reader_poll: Duration::from_millis(config.reader_poll_ms.into()),
            writer_poll: Duration::from_millis(config.writer_poll_ms.into()),
            stack_kb: config.task_stack_kb,
        }
    }
}

/// Transport bring-up parameters for one interface.
#[derive(Debug, Clone, Copy)]
struct LinkSettings {
    frame_detection: u32,
    timeout_ms: u32,
}

impl From<&InterfaceConfig> for LinkSettings {
    fn from(iface: &InterfaceConfig) -> Self {
        Self {
            frame_detection: iface.frame_detection as u32,
            timeout_ms: iface.timeout_ms,
        }
    }
}

struct Session {
    stop: StopToken,
    reader: JoinHandle<()>,
}

struct BusSlot {
    transport: SharedTransport,
    outbound: Outbox,
    link: LinkSettings,
    session: Option<Session>,
}

/// Everything a reader task needs, moved into its thread.
struct ReaderTask {
    iface: u8,
    transport: SharedTransport,
    outbound: Outbox,
    link: LinkSettings,
    bus: Arc<SharedBus>,
    inbound: Inbound,
    stop: StopToken,
    settings: TaskSettings,
}

pub struct BusApp {
    slots: Vec<BusSlot>,
    bus: Arc<SharedBus>,
    inbound: Inbound,
    settings: TaskSettings,
}

impl BusApp {
    pub fn new(bus: Arc<SharedBus>, inbound: Inbound, settings: TaskSettings) -> Self {
        Self {
            slots: Vec::new(),
            bus,
            inbound,
            settings,
        }
    }

    /// Register the transport for the next interface index.
    pub fn add_interface(&mut self, iface: &InterfaceConfig, transport: Box<dyn BusTransport>) -> Result<u8> {
        let index = self.slots.len();
        if index >= self.bus.interface_count() {
            return Err(Error::Config("more transports than configured interfaces"));
        }
        self.slots.push(BusSlot {
            transport: Arc::new(Mutex::new(transport)),
            outbound: Mailbox::new("bus-outbound"),
            link: LinkSettings::from(iface),
            session: None,
        });
        Ok(index as u8)
    }

    pub fn interface_count(&self) -> usize {
        self.slots.len()
    }

    /// Whether the interface's reader is still alive. A reader that gave up
    /// after a failed bring-up no longer counts.
    pub fn is_running(&self, iface: u8) -> bool {
        self.slots
            .get(iface as usize)
            .and_then(|slot| slot.session.as_ref())
            .is_some_and(|session| !session.reader.is_finished())
    }

    /// Act on pending bus transitions. Called once per dispatcher iteration.
    pub fn update(&mut self, states: &BusStateMachine) {
        for iface in 0..self.slots.len() as u8 {
            let transition = match states.take_transition(iface) {
                Ok(t) => t,
                Err(e) => {
                    warn!("Bus {}: transition not read: {}", iface, e);
                    continue;
                }
            };
            match transition {
                BusTransition::InitToInactive => {
                    if let Err(e) = self.launch(iface) {
                        warn!("Bus {}: launch failed: {}", iface, e);
                    }
                }
                BusTransition::ActiveToStop => self.stop(iface),
                BusTransition::InactiveToActive | BusTransition::None => {}
            }
        }
    }

    /// Queue a frame for an interface's writer.
    pub fn post(&self, iface: u8, frame: Frame) -> Result<()> {
        let slot = self
            .slots
            .get(iface as usize)
            .ok_or(DecodeError::InvalidInterface(iface))?;
        slot.outbound.try_send(frame)
    }

    /// Stop every running interface.
    pub fn shutdown(&mut self) {
        for iface in 0..self.slots.len() as u8 {
            if self.slots[iface as usize].session.is_some() {
                self.stop(iface);
                if let Err(e) = self.bus.states().force_stop(iface) {
                    warn!("Bus {}: state not reset: {}", iface, e);
                }
            }
        }
        info!("All bus interfaces stopped");
    }

    // ── Lifecycle ─────────────────────────────────────────────

    fn launch(&mut self, iface: u8) -> Result<()> {
        let slot = self
            .slots
            .get_mut(iface as usize)
            .ok_or(DecodeError::InvalidInterface(iface))?;
        if let Some(session) = slot.session.take_if(|session| session.reader.is_finished()) {
            if session.reader.join().is_err() {
                warn!("Bus {}: previous reader panicked", iface);
            }
            debug!("Bus {}: reaped finished session", iface);
        }
        if slot.session.is_some() {
            debug!("Bus {}: already running", iface);
            return Ok(());
        }

        let stop = StopToken::new();
        let task = ReaderTask {
            iface,
            transport: Arc::clone(&slot.transport),
            outbound: slot.outbound.clone(),
            link: slot.link,
            bus: Arc::clone(&self.bus),
            inbound: self.inbound.clone(),
            stop: stop.clone(),
            settings: self.settings,
        };
        let reader = spawn_task(&format!("bus{iface}-rx"), self.settings.stack_kb, move || {
            task.run();
        })?;
        slot.session = Some(Session { stop, reader });
        Ok(())
    }

    fn stop(&mut self, iface: u8) {
        let Some(slot) = self.slots.get_mut(iface as usize) else {
            return;
        };
        let Some(session) = slot.session.take() else {
            debug!("Bus {}: stop requested while not running", iface);
            return;
        };
        session.stop.raise();
        if session.reader.join().is_err() {
            warn!("Bus {}: reader panicked", iface);
        }
        if let Err(e) = lock(&slot.transport).deinit() {
            warn!("Bus {}: deinit failed: {}", iface, e);
        }
        info!("Bus {}: stopped", iface);
    }
}

impl Drop for BusApp {
    fn drop(&mut self) {
        for slot in &mut self.slots {
            if let Some(session) = slot.session.take() {
                session.stop.raise();
                let _ = session.reader.join();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

impl ReaderTask {
    fn run(self) {
        if let Err(e) = self.bring_up() {
            warn!("Bus {}: bring-up failed: {}", self.iface, e);
            self.abandon();
            return;
        }

        let writer = {
            let iface = self.iface;
            let transport = Arc::clone(&self.transport);
            let outbound = self.outbound.clone();
            let bus = Arc::clone(&self.bus);
            let stop = self.stop.clone();
            let poll = self.settings.writer_poll;
            spawn_task(&format!("bus{iface}-tx"), self.settings.stack_kb, move || {
                writer_loop(iface, &transport, &outbound, &bus, &stop, poll);
            })
        };
        let writer = match writer {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Bus {}: writer not started: {}", self.iface, e);
                self.abandon();
                return;
            }
        };

        info!("Bus {}: reader running", self.iface);
        while !self.stop.is_raised() {
            match self.poll_frame() {
                Ok(true) => {}
                Ok(false) => std::thread::sleep(self.settings.reader_poll),
                Err(e) => {
                    warn!("Bus {}: inbound frame dropped: {}", self.iface, e);
                }
            }
        }

        if writer.join().is_err() {
            warn!("Bus {}: writer panicked", self.iface);
        }
        debug!("Bus {}: reader exited", self.iface);
    }

    fn bring_up(&self) -> Result<()> {
        let mut transport = lock(&self.transport);
        transport.init()?;
        transport.configure(BusParameter::FrameDetection, self.link.frame_detection)?;
        transport.configure(BusParameter::Timeout, self.link.timeout_ms)?;
        Ok(())
    }

    /// Take the transport down and return the interface to `Init` so a
    /// later launch request starts from scratch.
    fn abandon(&self) {
        if let Err(e) = lock(&self.transport).deinit() {
            debug!("Bus {}: deinit after failed bring-up: {}", self.iface, e);
        }
        if let Err(e) = self.bus.states().force_stop(self.iface) {
            warn!("Bus {}: state not reset: {}", self.iface, e);
        }
    }

    /// Read one waiting frame into the inbound queue. `Ok(false)` means the
    /// transport was idle.
    fn poll_frame(&self) -> Result<bool> {
        let raw = {
            let mut transport = lock(&self.transport);
            if !transport.data_available() {
                return Ok(false);
            }
            let size = transport.size_available();
            let mut buf = Vec::new();
            buf.try_reserve_exact(size)
                .map_err(|_| Error::Allocation("bus receive buffer"))?;
            buf.resize(size, 0);
            let read = transport.read(&mut buf)?;
            buf.truncate(read);
            buf
        };
        let frame = self.bus.profile(self.iface)?.frame_from_bus(raw)?;
        self.inbound.push(frame)?;
        Ok(true)
    }
}

fn writer_loop(
    iface: u8,
    transport: &SharedTransport,
    outbound: &Outbox,
    bus: &SharedBus,
    stop: &StopToken,
    poll: Duration,
) {
    match bus.states().set_state(iface, BusInstanceState::Active as u8) {
        Ok(transition) => debug!("Bus {}: writer up ({:?})", iface, transition),
        Err(e) => warn!("Bus {}: not marked active: {}", iface, e),
    }

    while !stop.is_raised() {
        let Some(frame) = outbound.receive_timeout(poll) else {
            continue;
        };
        let sent = bus
            .profile(iface)
            .and_then(|profile| profile.frame_to_bus(frame))
            .and_then(|raw| lock(transport).write(&raw));
        if let Err(e) = sent {
            warn!("Bus {}: outbound frame dropped: {}", iface, e);
        }
    }
    debug!("Bus {}: writer exited", iface);
}
