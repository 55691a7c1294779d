//! Transfer-protocol frame codec and address packing.
//!
//! Wire layout (MBA_BRIDGE mode, multi-byte fields little-endian):
//!
//! ```text
//! ┌──────┬─────┬──────────┬─────┬──────┬───────────────┬──────────┬──────────┐
//! │ dest │ cmd │ size LE  │ src │ flow │ timestamp LE  │ data     │ checksum │
//! │  1B  │ 1B  │   2B     │ 1B  │  1B  │      4B       │ size B   │  2B LE   │
//! └──────┴─────┴──────────┴─────┴──────┴───────────────┴──────────┴──────────┘
//!  ◀────────────────── HEADER_SIZE = 10 ─────────────▶
//! ```
//!
//! Node ids pack a 5-bit logical id above a 3-bit interface id.
//!
//! End-bus interfaces carry no header at all: [`CastProfile`] synthesises
//! it on the way in and strips it on the way out.

use crate::error::{DecodeError, Error, Result};

pub const HEADER_SIZE: usize = 10;
pub const CHECKSUM_SIZE: usize = 2;

/// Largest payload the 16-bit size field can describe.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

const DEST_INDEX: usize = 0;
const COMMAND_INDEX: usize = 1;
const SIZE_INDEX: usize = 2;
const SOURCE_INDEX: usize = 4;
const FLOW_INDEX: usize = 5;
const TIMESTAMP_INDEX: usize = 6;

// ---------------------------------------------------------------------------
// Commands and cast modes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Bridge the payload to a local interface.
    Transfer = 0x00,
    /// Operation (state machine) protocol payload.
    Operation = 0x01,
    /// Configuration (register) protocol payload.
    Config = 0x02,
}

impl TryFrom<u8> for Command {
    type Error = DecodeError;

    fn try_from(value: u8) -> core::result::Result<Self, DecodeError> {
        match value {
            0x00 => Ok(Self::Transfer),
            0x01 => Ok(Self::Operation),
            0x02 => Ok(Self::Config),
            other => Err(DecodeError::UnknownCommand(other)),
        }
    }
}

/// How an interface frames its traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[repr(u8)]
pub enum CastMode {
    /// Peer has no notion of the transfer header.
    EndBus = 0x00,
    /// Peer speaks full transfer-protocol frames.
    MbaBridge = 0x02,
}

impl CastMode {
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::EndBus),
            0x02 => Some(Self::MbaBridge),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Address packing
// ---------------------------------------------------------------------------

/// Combine a logical id and an interface id into one node id byte.
pub const fn pack(logical: u8, iface: u8) -> u8 {
    ((logical << 3) & 0xF8) | (iface & 0x07)
}

pub const fn logical_of(node: u8) -> u8 {
    node >> 3
}

pub const fn interface_of(node: u8) -> u8 {
    node & 0x07
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// One transfer-protocol frame. The payload is owned; every hand-off moves
/// the frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub destination: u8,
    pub command: Command,
    pub source: u8,
    /// Reserved, carried through unchanged.
    pub flow_control: u8,
    /// Reserved, carried through unchanged.
    pub timestamp: u32,
    pub data: Vec<u8>,
    pub checksum: u16,
}

impl Frame {
    pub fn new(destination: u8, command: Command, source: u8, data: Vec<u8>) -> Self {
        Self {
            destination,
            command,
            source,
            flow_control: 0,
            timestamp: 0,
            data,
            checksum: 0,
        }
    }

    /// Payload size as carried in the header.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Total encoded length: header + payload + checksum.
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.data.len() + CHECKSUM_SIZE
    }

    pub fn dest_logical(&self) -> u8 {
        logical_of(self.destination)
    }

    pub fn dest_interface(&self) -> u8 {
        interface_of(self.destination)
    }

    pub fn src_logical(&self) -> u8 {
        logical_of(self.source)
    }

    pub fn src_interface(&self) -> u8 {
        interface_of(self.source)
    }

    /// Encode into MBA_BRIDGE wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        if self.data.len() > MAX_PAYLOAD {
            return Err(DecodeError::PayloadTooLarge(self.data.len()).into());
        }
        let mut out = Vec::new();
        out.try_reserve_exact(self.wire_size())
            .map_err(|_| Error::Allocation("frame encode buffer"))?;

        out.push(self.destination);
        out.push(self.command as u8);
        out.extend_from_slice(&(self.data.len() as u16).to_le_bytes());
        out.push(self.source);
        out.push(self.flow_control);
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&self.checksum.to_le_bytes());
        Ok(out)
    }

    /// Decode MBA_BRIDGE wire bytes. The buffer must be exactly as long as
    /// the header declares.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE + CHECKSUM_SIZE {
            return Err(DecodeError::Truncated {
                needed: HEADER_SIZE + CHECKSUM_SIZE,
                actual: buf.len(),
            }
            .into());
        }

        let size = u16::from_le_bytes([buf[SIZE_INDEX], buf[SIZE_INDEX + 1]]) as usize;
        let declared = HEADER_SIZE + size + CHECKSUM_SIZE;
        if declared != buf.len() {
            return Err(DecodeError::SizeMismatch {
                declared,
                actual: buf.len(),
            }
            .into());
        }

        let command = Command::try_from(buf[COMMAND_INDEX])?;
        let timestamp = u32::from_le_bytes([
            buf[TIMESTAMP_INDEX],
            buf[TIMESTAMP_INDEX + 1],
            buf[TIMESTAMP_INDEX + 2],
            buf[TIMESTAMP_INDEX + 3],
        ]);

        let mut data = Vec::new();
        data.try_reserve_exact(size)
            .map_err(|_| Error::Allocation("frame payload"))?;
        data.extend_from_slice(&buf[HEADER_SIZE..HEADER_SIZE + size]);

        let ck = HEADER_SIZE + size;
        Ok(Self {
            destination: buf[DEST_INDEX],
            command,
            source: buf[SOURCE_INDEX],
            flow_control: buf[FLOW_INDEX],
            timestamp,
            data,
            checksum: u16::from_le_bytes([buf[ck], buf[ck + 1]]),
        })
    }
}

// ---------------------------------------------------------------------------
// Cast profile
// ---------------------------------------------------------------------------

/// Everything a bus task needs to convert between raw bus bytes and frames.
///
/// For end-bus interfaces `source`/`destination` are the node ids stamped
/// on synthesised headers; bridge interfaces ignore them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CastProfile {
    pub mode: CastMode,
    pub source: u8,
    pub destination: u8,
}

impl CastProfile {
    pub const fn bridge() -> Self {
        Self {
            mode: CastMode::MbaBridge,
            source: 0,
            destination: 0,
        }
    }

    /// Pack into one word so the profile can be published atomically.
    pub const fn to_bits(self) -> u32 {
        (self.mode as u32) << 16 | (self.source as u32) << 8 | self.destination as u32
    }

    pub const fn from_bits(bits: u32) -> Self {
        let mode = match CastMode::from_u8((bits >> 16) as u8) {
            Some(mode) => mode,
            None => CastMode::MbaBridge,
        };
        Self {
            mode,
            source: (bits >> 8) as u8,
            destination: bits as u8,
        }
    }

    /// Raw bytes received from the bus → frame. Takes ownership of the
    /// buffer; end-bus payloads move straight into the frame.
    pub fn frame_from_bus(&self, raw: Vec<u8>) -> Result<Frame> {
        match self.mode {
            CastMode::MbaBridge => Frame::decode(&raw),
            CastMode::EndBus => {
                if raw.len() > MAX_PAYLOAD {
                    return Err(DecodeError::PayloadTooLarge(raw.len()).into());
                }
                Ok(Frame::new(self.destination, Command::Transfer, self.source, raw))
            }
        }
    }

    /// Frame → raw bytes for the bus. Consumes the frame.
    pub fn frame_to_bus(&self, frame: Frame) -> Result<Vec<u8>> {
        match self.mode {
            CastMode::MbaBridge => frame.encode(),
            CastMode::EndBus => Ok(frame.data),
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_command() -> impl Strategy<Value = Command> {
        prop_oneof![
            Just(Command::Transfer),
            Just(Command::Operation),
            Just(Command::Config),
        ]
    }

    fn arb_frame() -> impl Strategy<Value = Frame> {
        (
            any::<u8>(),
            arb_command(),
            any::<u8>(),
            any::<u8>(),
            any::<u32>(),
            proptest::collection::vec(any::<u8>(), 0..512),
            any::<u16>(),
        )
            .prop_map(
                |(destination, command, source, flow_control, timestamp, data, checksum)| Frame {
                    destination,
                    command,
                    source,
                    flow_control,
                    timestamp,
                    data,
                    checksum,
                },
            )
    }

    proptest! {
        #[test]
        fn bridge_frames_roundtrip(frame in arb_frame()) {
            let bytes = frame.encode().unwrap();
            prop_assert_eq!(bytes.len(), frame.wire_size());
            prop_assert_eq!(Frame::decode(&bytes).unwrap(), frame);
        }

        #[test]
        fn packing_is_lossless(logical in 0u8..32, iface in 0u8..8) {
            let node = pack(logical, iface);
            prop_assert_eq!(logical_of(node), logical);
            prop_assert_eq!(interface_of(node), iface);
        }

        #[test]
        fn decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = Frame::decode(&bytes);
        }
    }
}
