//! Bus instances: the physical transport contract and the per-interface
//! activation state machine shared between the dispatcher and bus tasks.
//!
//! ```text
//!            set_state(Inactive)        set_state(Active)       set_state(Stop)
//!  ┌──────┐ ────────────────────▶ ┌──────────┐ ──────────▶ ┌────────┐ ──────────▶ INIT
//!  │ INIT │      InitToInactive   │ INACTIVE │ InactiveTo… │ ACTIVE │ ActiveToStop
//!  └──────┘                       └──────────┘             └────────┘
//! ```
//!
//! Only single forward steps are accepted; anything else leaves the state
//! alone and records "no transition". The orchestrator consumes pending
//! transitions with a read-and-clear.

pub mod loopback;

use core::sync::atomic::{AtomicU8, AtomicU32, Ordering};

use log::debug;

use crate::error::{DecodeError, Result};
use crate::protocol::frame::CastProfile;

// ---------------------------------------------------------------------------
// States and transitions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum BusInstanceState {
    Init = 0,
    Inactive = 1,
    Active = 2,
    Stop = 3,
}

impl BusInstanceState {
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Init),
            1 => Some(Self::Inactive),
            2 => Some(Self::Active),
            3 => Some(Self::Stop),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BusTransition {
    None = 0,
    InitToInactive = 1,
    InactiveToActive = 2,
    ActiveToStop = 3,
}

impl BusTransition {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::InitToInactive,
            2 => Self::InactiveToActive,
            3 => Self::ActiveToStop,
            _ => Self::None,
        }
    }
}

// Slot layout: state in the low nibble, pending transition in the high one.
const fn slot(state: BusInstanceState, transition: BusTransition) -> u8 {
    (transition as u8) << 4 | state as u8
}

const fn slot_state(raw: u8) -> BusInstanceState {
    match BusInstanceState::from_u8(raw & 0x0F) {
        Some(state) => state,
        None => BusInstanceState::Init,
    }
}

const fn slot_transition(raw: u8) -> BusTransition {
    BusTransition::from_u8(raw >> 4)
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Per-interface activation state, written by the dispatcher and by writer
/// tasks, read by everyone. Lock-free.
#[derive(Debug)]
pub struct BusStateMachine {
    slots: Box<[AtomicU8]>,
}

impl BusStateMachine {
    /// All interfaces start in `Init` with no pending transition.
    pub fn new(interface_count: usize) -> Self {
        let slots = (0..interface_count)
            .map(|_| AtomicU8::new(slot(BusInstanceState::Init, BusTransition::None)))
            .collect();
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Mark an interface as enabled at boot: `Inactive` with a pending
    /// `InitToInactive`, so the first orchestrator pass launches it.
    pub fn preset_launch(&self, iface: u8) -> Result<()> {
        self.slot(iface)?.store(
            slot(BusInstanceState::Inactive, BusTransition::InitToInactive),
            Ordering::Release,
        );
        Ok(())
    }

    pub fn state(&self, iface: u8) -> Result<BusInstanceState> {
        Ok(slot_state(self.slot(iface)?.load(Ordering::Acquire)))
    }

    /// Pending transition without clearing it.
    pub fn pending(&self, iface: u8) -> Result<BusTransition> {
        Ok(slot_transition(self.slot(iface)?.load(Ordering::Acquire)))
    }

    /// Request a new state from a raw state byte. Returns the transition
    /// that was recorded.
    pub fn set_state(&self, iface: u8, requested: u8) -> Result<BusTransition> {
        let cell = self.slot(iface)?;
        let mut recorded = BusTransition::None;
        let _ = cell.fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
            let current = slot_state(raw);
            let next = match BusInstanceState::from_u8(requested) {
                Some(target) if requested == current as u8 + 1 => match target {
                    BusInstanceState::Inactive => {
                        slot(BusInstanceState::Inactive, BusTransition::InitToInactive)
                    }
                    BusInstanceState::Active => {
                        slot(BusInstanceState::Active, BusTransition::InactiveToActive)
                    }
                    BusInstanceState::Stop => {
                        slot(BusInstanceState::Init, BusTransition::ActiveToStop)
                    }
                    BusInstanceState::Init => slot(current, BusTransition::None),
                },
                _ => slot(current, BusTransition::None),
            };
            recorded = slot_transition(next);
            Some(next)
        });
        debug!("Bus {}: requested state {} -> {:?}", iface, requested, recorded);
        Ok(recorded)
    }

    /// Read and clear the pending transition.
    pub fn take_transition(&self, iface: u8) -> Result<BusTransition> {
        let raw = self.slot(iface)?.fetch_and(0x0F, Ordering::AcqRel);
        Ok(slot_transition(raw))
    }

    /// Abort an interface that failed to come up.
    pub fn force_stop(&self, iface: u8) -> Result<()> {
        self.slot(iface)?.store(
            slot(BusInstanceState::Init, BusTransition::None),
            Ordering::Release,
        );
        Ok(())
    }

    fn slot(&self, iface: u8) -> Result<&AtomicU8> {
        self.slots
            .get(iface as usize)
            .ok_or_else(|| DecodeError::InvalidInterface(iface).into())
    }
}

// ---------------------------------------------------------------------------
// Shared bus handle
// ---------------------------------------------------------------------------

/// State shared between the dispatcher and every bus task: the activation
/// state machine plus the cast profile each interface should apply.
#[derive(Debug)]
pub struct SharedBus {
    states: BusStateMachine,
    profiles: Box<[AtomicU32]>,
}

impl SharedBus {
    pub fn new(interface_count: usize) -> Self {
        let profiles = (0..interface_count)
            .map(|_| AtomicU32::new(CastProfile::bridge().to_bits()))
            .collect();
        Self {
            states: BusStateMachine::new(interface_count),
            profiles,
        }
    }

    pub fn states(&self) -> &BusStateMachine {
        &self.states
    }

    pub fn interface_count(&self) -> usize {
        self.profiles.len()
    }

    pub fn profile(&self, iface: u8) -> Result<CastProfile> {
        let cell = self
            .profiles
            .get(iface as usize)
            .ok_or(DecodeError::InvalidInterface(iface))?;
        Ok(CastProfile::from_bits(cell.load(Ordering::Acquire)))
    }

    pub fn publish_profile(&self, iface: u8, profile: CastProfile) -> Result<()> {
        let cell = self
            .profiles
            .get(iface as usize)
            .ok_or(DecodeError::InvalidInterface(iface))?;
        cell.store(profile.to_bits(), Ordering::Release);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Transport contract
// ---------------------------------------------------------------------------

/// Configuration parameter ids accepted by [`BusTransport::configure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum BusParameter {
    FrameDetection = 0x0100,
    Timeout = 0x0200,
    TimeoutDetection = 0x0300,
    SizeField = 0x0400,
    EndField = 0x0500,
}

/// How a transport delimits incoming frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum FrameDetection {
    Size = 0,
    EndField = 1,
    Timeout = 2,
}

/// One physical interface driver. Called from that interface's reader and
/// writer tasks only, behind a per-interface mutex.
pub trait BusTransport: Send {
    fn init(&mut self) -> Result<()>;

    fn deinit(&mut self) -> Result<()>;

    /// Whether a complete frame is waiting.
    fn data_available(&mut self) -> bool;

    /// Size in bytes of the waiting frame.
    fn size_available(&mut self) -> usize;

    /// Copy the waiting frame into `buf`. Returns the bytes written.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn write(&mut self, data: &[u8]) -> Result<usize>;

    fn configure(&mut self, parameter: BusParameter, value: u32) -> Result<()>;
}
