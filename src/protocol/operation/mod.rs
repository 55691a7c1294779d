//! Operation protocol: the device-wide state machine and its wire frame.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │  StateTable                                                    │
//! │  ┌───────────────┬──────────┬──────────┬──────────────────────┐ │
//! │  │ state         │ on_enter │ on_exit  │ on_update            │ │
//! │  ├───────────────┼──────────┼──────────┼──────────────────────┤ │
//! │  │ Init          │ fn(ctx)  │ fn(ctx)  │ fn(ctx) -> Option<_> │ │
//! │  │ Config … Fault│ fn(ctx)  │ fn(ctx)  │ fn(ctx) -> Option<_> │ │
//! │  │ Invalid       │ fn(ctx)  │ fn(ctx)  │ fn(ctx) -> Option<_> │ │
//! │  └───────────────┴──────────┴──────────┴──────────────────────┘ │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Wire frame: `[bit7 reply | state, target interface]`. Target `0xFF`
//! addresses the device itself; any other value addresses one interface.
//!
//! Transitions are not ordered: any state may be requested from any other
//! as long as the exit and enter hooks succeed.

pub mod context;
pub mod states;

use context::StackContext;
use log::{info, warn};

use crate::bus::BusInstanceState;
use crate::dictionary::table;
use crate::error::{DecodeError, Error, Result};
use crate::protocol::frame::CastMode;
use crate::protocol::transfer::Outbound;

pub const OPERATION_FRAME_SIZE: usize = 2;

/// Target interface value that addresses the whole device.
pub const DEVICE_TARGET: u8 = 0xFF;

/// Reply flag in the state/command byte.
pub const REPLY: u8 = 0x80;

const STATE_MASK: u8 = 0x7F;

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OperationState {
    Init = 0,
    Config = 1,
    Scan = 2,
    Inactive = 3,
    Active = 4,
    FaultDetected = 5,
    Fault = 6,
    Invalid = 7,
}

impl OperationState {
    /// Rows in the state table.
    pub const COUNT: usize = 8;

    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Init),
            1 => Some(Self::Config),
            2 => Some(Self::Scan),
            3 => Some(Self::Inactive),
            4 => Some(Self::Active),
            5 => Some(Self::FaultDetected),
            6 => Some(Self::Fault),
            7 => Some(Self::Invalid),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Function-pointer type aliases
// ---------------------------------------------------------------------------

/// What a periodic hook asks the engine to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateAction {
    Transition(OperationState),
    Emit(Outbound),
}

/// `on_enter` / `on_exit`. An `Err` aborts the transition and faults the
/// device.
pub type StateHookFn = fn(&mut StackContext) -> Result<()>;

/// Periodic hook, run once per dispatcher iteration.
pub type StateUpdateFn = fn(&mut StackContext) -> Option<StateAction>;

pub struct StateDescriptor {
    pub id: OperationState,
    pub name: &'static str,
    pub on_enter: StateHookFn,
    pub on_exit: StateHookFn,
    pub on_update: StateUpdateFn,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct OperationProtocol {
    table: [StateDescriptor; OperationState::COUNT],
    current: OperationState,
    last_requested: OperationState,
}

impl Default for OperationProtocol {
    fn default() -> Self {
        Self::new()
    }
}

impl OperationProtocol {
    pub fn new() -> Self {
        Self {
            table: states::build_state_table(),
            current: OperationState::Invalid,
            last_requested: OperationState::Invalid,
        }
    }

    /// Bind the state registers and enter `Init`.
    pub fn init(&mut self, ctx: &mut StackContext) -> Result<()> {
        self.current = OperationState::Invalid;
        ctx.dictionary
            .attach_variable(table::ACTUAL_STATE, &[self.current as u8])?;
        ctx.dictionary
            .attach_variable(table::REQUESTED_STATE, &[self.last_requested as u8])?;
        self.new_state(OperationState::Init, ctx)
    }

    pub fn state(&self) -> OperationState {
        self.current
    }

    pub fn last_requested(&self) -> OperationState {
        self.last_requested
    }

    /// Exit the current state and enter `target`. Requesting the current
    /// state only records the request.
    pub fn new_state(&mut self, target: OperationState, ctx: &mut StackContext) -> Result<()> {
        self.last_requested = target;
        if target == self.current {
            self.publish(ctx);
            return Ok(());
        }

        let from = self.current;
        info!(
            "FSM transition: {} -> {}",
            self.descriptor(from).name,
            self.descriptor(target).name
        );

        let result = (self.descriptor(from).on_exit)(ctx)
            .and_then(|()| (self.descriptor(target).on_enter)(ctx));

        let outcome = match result {
            Ok(()) => {
                self.current = target;
                Ok(())
            }
            Err(e) => {
                warn!(
                    "FSM transition {} -> {} failed ({}), forcing Fault",
                    self.descriptor(from).name,
                    self.descriptor(target).name,
                    e
                );
                self.current = OperationState::Fault;
                Err(Error::Transition {
                    from: from as u8,
                    to: target as u8,
                })
            }
        };
        self.publish(ctx);
        outcome
    }

    /// Run the current state's periodic hook.
    pub fn update(&mut self, ctx: &mut StackContext) -> Result<Option<Outbound>> {
        match (self.descriptor(self.current).on_update)(ctx) {
            Some(StateAction::Transition(next)) => {
                self.new_state(next, ctx)?;
                Ok(None)
            }
            Some(StateAction::Emit(outbound)) => Ok(Some(outbound)),
            None => Ok(None),
        }
    }

    /// Answer an operation frame. `Ok(None)` means the frame was a reply and
    /// needs no answer.
    pub fn process(&mut self, input: &[u8], ctx: &mut StackContext) -> Result<Option<Vec<u8>>> {
        let &[command, target] = input else {
            return Err(DecodeError::SizeMismatch {
                declared: OPERATION_FRAME_SIZE,
                actual: input.len(),
            }
            .into());
        };
        if command & REPLY != 0 {
            return Ok(None);
        }
        let requested = command & STATE_MASK;

        if target == DEVICE_TARGET {
            let state =
                OperationState::from_u8(requested).ok_or(DecodeError::InvalidState(requested))?;
            if let Err(e) = self.new_state(state, ctx) {
                warn!("Operation request for {:?} failed: {}", state, e);
            }
        } else {
            match ctx.transfer.interface_kind(target) {
                Some(CastMode::MbaBridge) => {
                    ctx.bus.states().set_state(target, requested)?;
                }
                Some(CastMode::EndBus) => {
                    let state = BusInstanceState::from_u8(requested)
                        .ok_or(DecodeError::InvalidState(requested))?;
                    ctx.transfer.force_interface_state(target, state)?;
                }
                None => return Err(DecodeError::InvalidInterface(target).into()),
            }
        }

        let mut reply = Vec::new();
        reply
            .try_reserve_exact(OPERATION_FRAME_SIZE)
            .map_err(|_| Error::Allocation("operation reply"))?;
        reply.push(REPLY | self.current as u8);
        reply.push(target);
        Ok(Some(reply))
    }

    fn descriptor(&self, state: OperationState) -> &StateDescriptor {
        &self.table[state as usize]
    }

    fn publish(&self, ctx: &mut StackContext) {
        let stored = ctx
            .dictionary
            .store(table::ACTUAL_STATE, &[self.current as u8])
            .and_then(|()| {
                ctx.dictionary
                    .store(table::REQUESTED_STATE, &[self.last_requested as u8])
            });
        if let Err(e) = stored {
            warn!("Operation state not published: {}", e);
        }
    }
}
