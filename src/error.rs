//! Unified error types for the bridge core.
//!
//! A single `Error` enum that every layer converts into, keeping the
//! dispatcher's per-frame error handling uniform. All variants are `Copy`
//! so they can be logged and returned through the state machine hooks
//! without allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Every fallible operation in the bridge funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A payload or reply buffer could not be allocated.
    Allocation(&'static str),
    /// A wire frame could not be decoded.
    Decode(DecodeError),
    /// A dictionary operation failed.
    Register(RegisterError),
    /// No interface routes to the given logical id.
    NoRoute(u8),
    /// An operation state hook failed; the device was forced into FAULT.
    Transition { from: u8, to: u8 },
    /// A queue, mutex or task could not be created or used.
    Resource(ResourceError),
    /// A physical bus transport reported a failure.
    Transport(TransportError),
    /// Configuration is invalid.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allocation(what) => write!(f, "allocation failed: {what}"),
            Self::Decode(e) => write!(f, "decode: {e}"),
            Self::Register(e) => write!(f, "register: {e}"),
            Self::NoRoute(id) => write!(f, "no route to logical id {id}"),
            Self::Transition { from, to } => {
                write!(f, "transition {from} -> {to} failed, device in FAULT")
            }
            Self::Resource(e) => write!(f, "resource: {e}"),
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Decode errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Buffer shorter than the fixed header.
    Truncated { needed: usize, actual: usize },
    /// Buffer length disagrees with the size declared in the header.
    SizeMismatch { declared: usize, actual: usize },
    /// Command byte is not TRANSFER, OPERATION or CONFIG.
    UnknownCommand(u8),
    /// State value outside the operation state range.
    InvalidState(u8),
    /// Target interface does not exist on this device.
    InvalidInterface(u8),
    /// Payload does not fit the 16-bit size field.
    PayloadTooLarge(usize),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated { needed, actual } => {
                write!(f, "truncated frame ({actual} bytes, need {needed})")
            }
            Self::SizeMismatch { declared, actual } => {
                write!(f, "frame size mismatch (header {declared}, got {actual})")
            }
            Self::UnknownCommand(c) => write!(f, "unknown command 0x{c:02X}"),
            Self::InvalidState(s) => write!(f, "invalid state {s}"),
            Self::InvalidInterface(i) => write!(f, "invalid interface {i}"),
            Self::PayloadTooLarge(n) => write!(f, "payload of {n} bytes too large"),
        }
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

// ---------------------------------------------------------------------------
// Dictionary errors
// ---------------------------------------------------------------------------

/// Dictionary-level failures. Each carries the register index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    NotFound(u16),
    IncorrectAccess(u16),
    IncorrectSize(u16),
}

impl fmt::Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(i) => write!(f, "0x{i:04X} not found"),
            Self::IncorrectAccess(i) => write!(f, "0x{i:04X} incorrect access"),
            Self::IncorrectSize(i) => write!(f, "0x{i:04X} incorrect size"),
        }
    }
}

impl From<RegisterError> for Error {
    fn from(e: RegisterError) -> Self {
        Self::Register(e)
    }
}

// ---------------------------------------------------------------------------
// Orchestration resource errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceError {
    /// Mutex could not be created or acquired in time.
    SyncTool,
    /// Mailbox could not be created or is full.
    Buffer,
    /// Task could not be spawned.
    Task,
}

impl ResourceError {
    /// Legacy instance return code reported over diagnostics.
    pub const fn code(self) -> i32 {
        match self {
            Self::SyncTool => -3,
            Self::Buffer => -2,
            Self::Task => -1,
        }
    }
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SyncTool => write!(f, "sync tool error"),
            Self::Buffer => write!(f, "buffer error"),
            Self::Task => write!(f, "task error"),
        }
    }
}

impl From<ResourceError> for Error {
    fn from(e: ResourceError) -> Self {
        Self::Resource(e)
    }
}

// ---------------------------------------------------------------------------
// Transport errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    InitFailed,
    ConfigureFailed,
    ReadFailed,
    WriteFailed,
    Disconnected,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitFailed => write!(f, "init failed"),
            Self::ConfigureFailed => write!(f, "configure failed"),
            Self::ReadFailed => write!(f, "read failed"),
            Self::WriteFailed => write!(f, "write failed"),
            Self::Disconnected => write!(f, "disconnected"),
        }
    }
}

impl From<TransportError> for Error {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Crate-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
