//! Configuration (register) protocol.
//!
//! ```text
//! ┌──────────┬──────────┬─────────────┬──────────┐
//! │ regid lo │ regid hi │ type/access │ data …   │
//! └──────────┴──────────┴─────────────┴──────────┘
//! ```
//!
//! The reply reuses the same layout. Read-info replies carry the register's
//! own type/access byte; every other reply echoes the request byte.

use crate::dictionary::Dictionary;
use crate::error::{DecodeError, Error, Result};

pub const CONFIG_HEADER_SIZE: usize = 3;

/// A decoded configuration frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigRequest {
    pub register: u16,
    pub type_access: u8,
    pub data: Vec<u8>,
}

impl ConfigRequest {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < CONFIG_HEADER_SIZE {
            return Err(DecodeError::Truncated {
                needed: CONFIG_HEADER_SIZE,
                actual: buf.len(),
            }
            .into());
        }
        let mut data = Vec::new();
        data.try_reserve_exact(buf.len() - CONFIG_HEADER_SIZE)
            .map_err(|_| Error::Allocation("config request payload"))?;
        data.extend_from_slice(&buf[CONFIG_HEADER_SIZE..]);
        Ok(Self {
            register: u16::from_le_bytes([buf[0], buf[1]]),
            type_access: buf[2],
            data,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.try_reserve_exact(CONFIG_HEADER_SIZE + self.data.len())
            .map_err(|_| Error::Allocation("config reply"))?;
        out.extend_from_slice(&self.register.to_le_bytes());
        out.push(self.type_access);
        out.extend_from_slice(&self.data);
        Ok(out)
    }
}

/// Answer one configuration frame against the dictionary.
///
/// Any error means "no reply"; a successful pure write yields the 3-byte
/// header alone.
pub fn process(dictionary: &mut Dictionary, input: &[u8]) -> Result<Vec<u8>> {
    let request = ConfigRequest::decode(input)?;
    let register = request.register;
    let processed = dictionary.process(register, request.type_access, request.data)?;
    ConfigRequest {
        register,
        type_access: processed.type_access,
        data: processed.data,
    }
    .encode()
}
