//! Default register table and well-known indices.
//!
//! Global registers live below `0x1000`; each interface N owns the block
//! starting at `0x1000 * (N + 1)`; board registers sit at the top of the
//! index space.

use super::{Access, DataType, Register};

// ═══════════════════════════════════════════════════════════════════════════
//  Well-known indices
// ═══════════════════════════════════════════════════════════════════════════

pub const DEVICE_NAME: u16 = 0x0100;
pub const VENDOR_ID: u16 = 0x0101;
pub const ACTUAL_STATE: u16 = 0x0A00;
pub const REQUESTED_STATE: u16 = 0x0A0A;
pub const DEVICE_ID: u16 = 0x0F00;
pub const DEVICE_INTERFACES: u16 = 0x0F10;
pub const BOARD_LEDS: u16 = 0xA000;
pub const RESET: u16 = 0xFFFF;

/// First interface block.
pub const INTERFACE_BASE: u16 = 0x1000;

// Offsets inside an interface block.
pub const IFACE_DESCRIPTION: u16 = 0x000;
pub const IFACE_NAME: u16 = 0x001;
pub const IFACE_LINK: u16 = 0x002;
pub const IFACE_TYPE: u16 = 0x003;
pub const IFACE_STATE: u16 = 0x004;

/// Highest interface count the index layout leaves room for.
pub const MAX_TABLE_INTERFACES: usize = 8;

/// Index of a register inside interface `iface`'s block.
pub const fn interface_register(iface: u8, offset: u16) -> u16 {
    INTERFACE_BASE * (iface as u16 + 1) + offset
}

// ═══════════════════════════════════════════════════════════════════════════
//  Table builder
// ═══════════════════════════════════════════════════════════════════════════

/// Build the register table for `interface_count` interfaces. Called once
/// when the protocol stack is created.
pub fn build_register_table(interface_count: usize, device_name: &str) -> Vec<Register> {
    let interface_count = interface_count.min(MAX_TABLE_INTERFACES);
    let mut table = Vec::with_capacity(8 + interface_count * 34);

    // Global identification
    table.push(
        Register::new(DEVICE_NAME, "Device name", Access::READ_ONLY, DataType::Char)
            .with_value(device_name.as_bytes()),
    );
    table.push(
        Register::new(VENDOR_ID, "Vendor ID", Access::READ_ONLY, DataType::Unsigned)
            .with_value(&[0]),
    );

    // Operation state
    table.push(Register::new(ACTUAL_STATE, "Actual State", Access::READ_ONLY, DataType::Unsigned));
    table.push(Register::new(
        REQUESTED_STATE,
        "Requested State",
        Access::READ_ONLY,
        DataType::Unsigned,
    ));

    // Network identity
    table.push(Register::new(DEVICE_ID, "Device ID", Access::FULL, DataType::Unsigned));
    table.push(Register::new(
        DEVICE_INTERFACES,
        "Device Interfaces",
        Access::READ_ONLY,
        DataType::Unsigned,
    ));

    for iface in 0..interface_count as u8 {
        push_interface_block(&mut table, iface);
    }

    // Board
    table.push(Register::new(BOARD_LEDS, "Board LEDs", Access::FULL, DataType::Unsigned));
    table.push(Register::new(RESET, "Reset", Access::WRITE_ONLY, DataType::Unsigned));

    table
}

fn push_interface_block(table: &mut Vec<Register>, iface: u8) {
    let reg = |offset: u16, name: &str, access: Access, data_type: DataType| {
        Register::new(interface_register(iface, offset), name, access, data_type)
    };

    let mut description: heapless::String<20> = heapless::String::new();
    // "Interface " + one digit always fits
    let _ = core::fmt::write(&mut description, format_args!("Interface {iface}"));

    table.push(reg(IFACE_DESCRIPTION, description.as_str(), Access::READ_ONLY, DataType::Unsigned));
    table.push(reg(IFACE_NAME, "Interface ID", Access::READ_ONLY, DataType::Char));
    table.push(reg(IFACE_LINK, "Interface Link", Access::FULL, DataType::Unsigned));
    table.push(reg(IFACE_TYPE, "Interface Type", Access::FULL, DataType::Unsigned));
    table.push(reg(IFACE_STATE, "Interface State", Access::READ_ONLY, DataType::Unsigned));

    // Physical layer description
    table.push(reg(0x200, "PHDL Fields", Access::READ_ONLY, DataType::Unsigned));
    table.push(reg(0x201, "Field 0", Access::READ_ONLY, DataType::Unsigned));
    table.push(reg(0x300, "PHDL Parameters", Access::READ_ONLY, DataType::Unsigned));

    // Protocol field map
    table.push(reg(0x600, "Protocol Fields", Access::FULL, DataType::Unsigned));
    const FIELD_NAMES: [&str; 16] = [
        "Field 0", "Field 1", "Field 2", "Field 3", "Field 4", "Field 5", "Field 6", "Field 7",
        "Field 8", "Field 9", "Field 10", "Field 11", "Field 12", "Field 13", "Field 14",
        "Field 15",
    ];
    for (n, name) in FIELD_NAMES.iter().enumerate() {
        table.push(reg(0x601 + n as u16, name, Access::FULL, DataType::Unsigned));
    }

    // Frame detection
    table.push(reg(0x700, "Frame Detection", Access::FULL, DataType::Unsigned));
    table.push(reg(0x701, "Field Detection", Access::FULL, DataType::Unsigned));
    table.push(reg(0x710, "Global Timeout", Access::FULL, DataType::Unsigned));
    table.push(reg(0x711, "Decoding Timeout", Access::FULL, DataType::Unsigned));
    table.push(reg(0x720, "Detection Field", Access::FULL, DataType::Unsigned));
    table.push(reg(0x730, "Size Field", Access::FULL, DataType::Unsigned));
    table.push(reg(0x740, "Split Value", Access::FULL, DataType::Unsigned));
}
