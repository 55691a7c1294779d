//! Register dictionary: a typed, access-controlled store keyed by a 16-bit
//! index.
//!
//! ```text
//! ┌────────┬──────────────────┬──────┬────────────┬──────────┬──────────┐
//! │ index  │ name (≤20 chars) │ size │ access|type│ storage  │ callback │
//! ├────────┼──────────────────┼──────┼────────────┼──────────┼──────────┤
//! │ 0x0100 │ Device name      │ 11   │ R-I | CHAR │ bytes    │ -        │
//! │ 0x0F00 │ Device ID        │ 1    │ RWIW| U    │ bytes    │ links    │
//! │  ...   │                  │      │            │          │          │
//! └────────┴──────────────────┴──────┴────────────┴──────────┴──────────┘
//! ```
//!
//! The table layout is fixed when the dictionary is built; components bind
//! storage and callbacks to existing entries afterwards and never add or
//! remove entries.

pub mod table;

use core::fmt;
use core::ops::BitOr;

use heapless::String;
use log::debug;

use crate::error::{Error, RegisterError, Result};

/// Maximum number of characters in a register name.
pub const MAX_NAME: usize = 20;

/// Size of the big-endian size field that prefixes a read-info reply.
pub const INFO_SIZE_FIELD: usize = 2;

// ---------------------------------------------------------------------------
// Access and type bits
// ---------------------------------------------------------------------------

/// Access bitmask occupying the high nibble of the type/access byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Access(u8);

impl Access {
    pub const NONE: Self = Self(0x00);
    pub const READ_DATA: Self = Self(0x10);
    pub const WRITE_DATA: Self = Self(0x20);
    pub const READ_INFO: Self = Self(0x40);
    /// Accepted on the wire, never acted upon.
    pub const WRITE_INFO: Self = Self(0x80);

    pub const FULL: Self = Self(0xF0);
    pub const READ_ONLY: Self = Self(0x10 | 0x40);
    pub const WRITE_ONLY: Self = Self(0x20 | 0x40);
    pub const PROTECTED: Self = Self(0x20);

    /// Extract the access bits from a combined type/access byte.
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0xF0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersect(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }
}

impl BitOr for Access {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Data type occupying the low nibble of the type/access byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataType {
    Unsigned = 0x00,
    Signed = 0x01,
    Char = 0x02,
}

impl DataType {
    pub const fn from_bits(bits: u8) -> Option<Self> {
        match bits & 0x0F {
            0x00 => Some(Self::Unsigned),
            0x01 => Some(Self::Signed),
            0x02 => Some(Self::Char),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Register
// ---------------------------------------------------------------------------

/// Post-write hook. Receives the freshly written register bytes.
pub type RegisterCallback = Box<dyn FnMut(&[u8]) + Send>;

/// One addressable entry in the dictionary.
pub struct Register {
    index: u16,
    name: String<MAX_NAME>,
    data_size: u8,
    access: Access,
    data_type: DataType,
    data: Option<Vec<u8>>,
    callback: Option<RegisterCallback>,
}

impl Register {
    /// A register with no storage bound yet. Names longer than
    /// [`MAX_NAME`] are truncated.
    pub fn new(index: u16, name: &str, access: Access, data_type: DataType) -> Self {
        Self {
            index,
            name: bounded_name(name),
            data_size: 0,
            access,
            data_type,
            data: None,
            callback: None,
        }
    }

    /// Builder form of [`Dictionary::attach_variable`] for static entries.
    pub fn with_value(mut self, bytes: &[u8]) -> Self {
        self.data_size = bytes.len().min(u8::MAX as usize) as u8;
        self.data = Some(bytes[..self.data_size as usize].to_vec());
        self
    }

    pub fn index(&self) -> u16 {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_size(&self) -> u8 {
        self.data_size
    }

    pub fn access(&self) -> Access {
        self.access
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// The combined byte reported by read-info replies.
    pub fn type_access(&self) -> u8 {
        self.access.bits() | self.data_type as u8
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    fn write(&mut self, input: &[u8]) -> Result<()> {
        let Some(storage) = self.data.as_mut() else {
            return Err(RegisterError::IncorrectSize(self.index).into());
        };
        if input.len() != storage.len() {
            return Err(RegisterError::IncorrectSize(self.index).into());
        }
        storage.copy_from_slice(input);
        if let Some(callback) = self.callback.as_mut() {
            callback(storage);
        }
        Ok(())
    }

    fn read_info(&self, out: &mut Vec<u8>) -> Result<()> {
        out.try_reserve_exact(INFO_SIZE_FIELD + self.name.len())
            .map_err(|_| RegisterError::IncorrectSize(self.index))?;
        out.extend_from_slice(&u16::from(self.data_size).to_be_bytes());
        out.extend_from_slice(self.name.as_bytes());
        Ok(())
    }

    fn read_data(&self, out: &mut Vec<u8>) -> Result<()> {
        let bytes = self.data.as_deref().unwrap_or_default();
        out.try_reserve_exact(bytes.len())
            .map_err(|_| RegisterError::IncorrectSize(self.index))?;
        out.extend_from_slice(bytes);
        Ok(())
    }
}

impl fmt::Debug for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Register")
            .field("index", &format_args!("0x{:04X}", self.index))
            .field("name", &self.name.as_str())
            .field("data_size", &self.data_size)
            .field("type_access", &format_args!("0x{:02X}", self.type_access()))
            .field("bound", &self.data.is_some())
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

fn bounded_name(name: &str) -> String<MAX_NAME> {
    let mut bounded = String::new();
    for ch in name.chars() {
        if bounded.push(ch).is_err() {
            break;
        }
    }
    bounded
}

// ---------------------------------------------------------------------------
// Dictionary
// ---------------------------------------------------------------------------

/// Result of a successful [`Dictionary::process`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed {
    /// Request access byte, replaced by the register's own type/access
    /// byte when read-info ran.
    pub type_access: u8,
    /// Read-info bytes followed by read-data bytes (empty for pure writes).
    pub data: Vec<u8>,
}

/// The register store.
#[derive(Debug)]
pub struct Dictionary {
    registers: Vec<Register>,
    vendor_id: u8,
}

impl Dictionary {
    /// Build a dictionary over a fixed register table.
    pub fn new(registers: Vec<Register>, vendor_id: u8) -> Result<Self> {
        for (i, reg) in registers.iter().enumerate() {
            if registers[..i].iter().any(|r| r.index == reg.index) {
                return Err(Error::Config("duplicate register index"));
            }
        }
        Ok(Self {
            registers,
            vendor_id,
        })
    }

    /// Reset built-in fields.
    pub fn init(&mut self) {
        let vendor = [self.vendor_id];
        if let Err(e) = self.store(table::VENDOR_ID, &vendor) {
            debug!("Dictionary init: vendor id not stored ({})", e);
        }
    }

    pub fn lookup(&self, index: u16) -> Option<&Register> {
        self.registers.iter().find(|r| r.index == index)
    }

    pub fn contains(&self, index: u16) -> bool {
        self.lookup(index).is_some()
    }

    pub fn value(&self, index: u16) -> Option<&[u8]> {
        self.lookup(index).and_then(Register::value)
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Register> {
        self.registers.iter()
    }

    /// Run a wire request against one register.
    ///
    /// Order is fixed: write (then callback), read-info, read-data. Each
    /// step runs only when requested **and** granted by the register. The
    /// input buffer is consumed by the write step whether or not a write
    /// happened.
    ///
    /// A request that asks to write a register without write access fails
    /// as a whole, even when the reads it also asks for would be granted.
    pub fn process(&mut self, index: u16, requested: u8, input: Vec<u8>) -> Result<Processed> {
        let reg = self.lookup_mut(index)?;
        let wanted = Access::from_bits(requested);
        let granted = wanted.intersect(reg.access);

        if wanted.contains(Access::WRITE_DATA) && !granted.contains(Access::WRITE_DATA) {
            return Err(RegisterError::IncorrectAccess(index).into());
        }
        let actionable = Access::READ_DATA | Access::WRITE_DATA | Access::READ_INFO;
        if granted.intersect(actionable) == Access::NONE {
            return Err(RegisterError::IncorrectAccess(index).into());
        }

        if granted.contains(Access::WRITE_DATA) {
            reg.write(&input)?;
        }
        drop(input);

        let mut type_access = requested;
        let mut out = Vec::new();
        if granted.contains(Access::READ_INFO) {
            reg.read_info(&mut out)?;
            type_access = reg.type_access();
        }
        if granted.contains(Access::READ_DATA) {
            reg.read_data(&mut out)?;
        }

        Ok(Processed {
            type_access,
            data: out,
        })
    }

    /// Bind backing storage to an existing register.
    pub fn attach_variable(&mut self, index: u16, initial: &[u8]) -> Result<()> {
        let reg = self.lookup_mut(index)?;
        if initial.len() > u8::MAX as usize {
            return Err(RegisterError::IncorrectSize(index).into());
        }
        reg.data_size = initial.len() as u8;
        reg.data = Some(initial.to_vec());
        Ok(())
    }

    /// Bind a post-write hook to an existing register.
    pub fn attach_callback(&mut self, index: u16, callback: RegisterCallback) -> Result<()> {
        self.lookup_mut(index)?.callback = Some(callback);
        Ok(())
    }

    /// Publish a component value into bound storage, bypassing access bits.
    /// The length must match the bound size; callbacks do not fire.
    pub fn store(&mut self, index: u16, bytes: &[u8]) -> Result<()> {
        let reg = self.lookup_mut(index)?;
        match reg.data.as_mut() {
            Some(storage) if storage.len() == bytes.len() => {
                storage.copy_from_slice(bytes);
                Ok(())
            }
            _ => Err(RegisterError::IncorrectSize(index).into()),
        }
    }

    fn lookup_mut(&mut self, index: u16) -> Result<&mut Register> {
        self.registers
            .iter_mut()
            .find(|r| r.index == index)
            .ok_or(Error::Register(RegisterError::NotFound(index)))
    }
}
