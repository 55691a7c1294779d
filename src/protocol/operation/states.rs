//! State hooks and table builder.
//!
//! ```text
//!  INIT ──[periodic]──▶ INACTIVE
//!
//!  Any state ──[operation request]──▶ any state
//!  Any state ──[hook failure]──▶ FAULT
//! ```
//!
//! `Config`, `Scan` and `FaultDetected` have no behaviour yet but
//! keep their rows so requests for them run real exit/enter hooks.

use std::sync::Arc;

use log::{info, warn};

use super::context::StackContext;
use super::{OperationState, StateAction, StateDescriptor};
use crate::bus::BusInstanceState;
use crate::dictionary::Access;
use crate::dictionary::table;
use crate::error::Result;
use crate::protocol::frame::CastMode;

// ═══════════════════════════════════════════════════════════════════════════
//  Table builder
// ═══════════════════════════════════════════════════════════════════════════

pub fn build_state_table() -> [StateDescriptor; OperationState::COUNT] {
    [
        // Index 0: Init
        StateDescriptor {
            id: OperationState::Init,
            name: "Init",
            on_enter: init_enter,
            on_exit: no_hook,
            on_update: init_update,
        },
        // Index 1: Config
        StateDescriptor {
            id: OperationState::Config,
            name: "Config",
            on_enter: no_hook,
            on_exit: no_hook,
            on_update: no_update,
        },
        // Index 2: Scan
        StateDescriptor {
            id: OperationState::Scan,
            name: "Scan",
            on_enter: no_hook,
            on_exit: no_hook,
            on_update: no_update,
        },
        // Index 3: Inactive
        StateDescriptor {
            id: OperationState::Inactive,
            name: "Inactive",
            on_enter: inactive_enter,
            on_exit: no_hook,
            on_update: no_update,
        },
        // Index 4: Active
        StateDescriptor {
            id: OperationState::Active,
            name: "Active",
            on_enter: active_enter,
            on_exit: no_hook,
            on_update: no_update,
        },
        // Index 5: FaultDetected
        StateDescriptor {
            id: OperationState::FaultDetected,
            name: "FaultDetected",
            on_enter: no_hook,
            on_exit: no_hook,
            on_update: no_update,
        },
        // Index 6: Fault
        StateDescriptor {
            id: OperationState::Fault,
            name: "Fault",
            on_enter: fault_enter,
            on_exit: no_hook,
            on_update: no_update,
        },
        // Index 7: Invalid (boot placeholder)
        StateDescriptor {
            id: OperationState::Invalid,
            name: "Invalid",
            on_enter: no_hook,
            on_exit: no_hook,
            on_update: no_update,
        },
    ]
}

fn no_hook(_ctx: &mut StackContext) -> Result<()> {
    Ok(())
}

fn no_update(_ctx: &mut StackContext) -> Option<StateAction> {
    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  INIT: rebuild tables and bind registers
// ═══════════════════════════════════════════════════════════════════════════

fn init_enter(ctx: &mut StackContext) -> Result<()> {
    ctx.dictionary.init();
    ctx.transfer.init(&mut ctx.dictionary, &ctx.bus, &ctx.events)?;

    ctx.dictionary.attach_variable(table::RESET, &[0])?;
    let events = Arc::clone(&ctx.events);
    ctx.dictionary
        .attach_callback(table::RESET, Box::new(move |_: &[u8]| events.raise_reset()))?;

    info!(
        "INIT: dictionary ready ({} registers, {} readable)",
        ctx.dictionary.len(),
        ctx.dictionary
            .iter()
            .filter(|r| r.access().contains(Access::READ_DATA))
            .count()
    );
    Ok(())
}

fn init_update(_ctx: &mut StackContext) -> Option<StateAction> {
    Some(StateAction::Transition(OperationState::Inactive))
}

// ═══════════════════════════════════════════════════════════════════════════
//  INACTIVE
// ═══════════════════════════════════════════════════════════════════════════

fn inactive_enter(ctx: &mut StackContext) -> Result<()> {
    info!(
        "INACTIVE: device {} idle on {} interfaces",
        ctx.transfer.device_logical_id(),
        ctx.interface_count()
    );
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
//  ACTIVE: bring up end-bus interfaces that were armed while inactive
// ═══════════════════════════════════════════════════════════════════════════

fn active_enter(ctx: &mut StackContext) -> Result<()> {
    for iface in 0..ctx.interface_count() as u8 {
        let armed = ctx.transfer.interface_kind(iface) == Some(CastMode::EndBus)
            && ctx.transfer.interface_state(iface) == Some(BusInstanceState::Inactive);
        if armed {
            ctx.bus
                .states()
                .set_state(iface, BusInstanceState::Inactive as u8)?;
            info!("ACTIVE: end-bus interface {} armed", iface);
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
//  FAULT
// ═══════════════════════════════════════════════════════════════════════════

fn fault_enter(_ctx: &mut StackContext) -> Result<()> {
    warn!("FAULT: device halted until reset");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_rows_match_state_indices() {
        let table = build_state_table();
        for (index, row) in table.iter().enumerate() {
            assert_eq!(row.id as usize, index, "row {} is {}", index, row.name);
        }
    }

    #[test]
    fn every_state_has_a_name() {
        assert!(build_state_table().iter().all(|row| !row.name.is_empty()));
    }
}
