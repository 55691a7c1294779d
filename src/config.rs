//! Bridge configuration
//!
//! Network identity, the interface topology and task timing. The default
//! is the stock three-interface board: USB and SPI bridges that come up at
//! boot and a USART end-bus that waits for an operation request.

use serde::{Deserialize, Serialize};

use crate::bus::FrameDetection;
use crate::dictionary::MAX_NAME;
use crate::dictionary::table::MAX_TABLE_INTERFACES;
use crate::error::{Error, Result};
use crate::protocol::frame::CastMode;
use crate::protocol::links::{MAX_INTERFACE_NAME, MAX_ROUTES, ROUTE_END};
use crate::protocol::transfer::{DEFAULT_LOGICAL_ID, MAX_LOGICAL_ID, device_id_fits};

/// Vendor id reported through the dictionary.
pub const DEFAULT_VENDOR_ID: u8 = 0x2C;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn filter(self) -> log::LevelFilter {
        match self {
            Self::Error => log::LevelFilter::Error,
            Self::Warn => log::LevelFilter::Warn,
            Self::Info => log::LevelFilter::Info,
            Self::Debug => log::LevelFilter::Debug,
            Self::Trace => log::LevelFilter::Trace,
        }
    }
}

/// One physical interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub name: String,
    pub kind: CastMode,
    /// Logical id of the device on the far side.
    pub linked_device: u8,
    /// Logical ids reachable through this interface.
    pub routes: Vec<u8>,
    /// Launch the interface at boot instead of waiting for a request.
    pub start_active: bool,
    pub frame_detection: FrameDetection,
    /// Transport inter-frame timeout (milliseconds)
    pub timeout_ms: u32,
}

impl InterfaceConfig {
    fn new(name: &str, kind: CastMode, linked_device: u8, routes: &[u8], start_active: bool) -> Self {
        Self {
            name: name.into(),
            kind,
            linked_device,
            routes: routes.to_vec(),
            start_active,
            frame_detection: FrameDetection::Timeout,
            timeout_ms: 10,
        }
    }
}

/// Core bridge configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    // --- Identity ---
    pub device_logical_id: u8,
    pub vendor_id: u8,
    pub device_name: String,

    // --- Topology ---
    pub interfaces: Vec<InterfaceConfig>,

    // --- Timing ---
    /// Dispatcher inbound wait per iteration (milliseconds)
    pub dispatch_poll_ms: u32,
    /// Reader idle sleep when no data is pending (milliseconds)
    pub reader_poll_ms: u32,
    /// Writer mailbox wait per iteration (milliseconds)
    pub writer_poll_ms: u32,
    /// Inbound mutex acquisition timeout (milliseconds)
    pub mutex_timeout_ms: u32,
    /// Stack size for bus tasks and the dispatcher (KiB)
    pub task_stack_kb: usize,

    pub log_level: LogLevel,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            device_logical_id: DEFAULT_LOGICAL_ID,
            vendor_id: DEFAULT_VENDOR_ID,
            device_name: "Noodleboard".into(),

            interfaces: vec![
                InterfaceConfig::new("USB", CastMode::MbaBridge, 2, &[1, 2], true),
                InterfaceConfig::new("SPI", CastMode::MbaBridge, 20, &[5], true),
                InterfaceConfig::new("USART", CastMode::EndBus, 1, &[], false),
            ],

            dispatch_poll_ms: 10,
            reader_poll_ms: 1,
            writer_poll_ms: 10,
            mutex_timeout_ms: 100,
            task_stack_kb: 64,

            log_level: LogLevel::Info,
        }
    }
}

impl BridgeConfig {
    /// Reject topologies the address space or register layout cannot hold.
    pub fn validate(&self) -> Result<()> {
        if !device_id_fits(self.device_logical_id, self.interfaces.len()) {
            return Err(Error::Config("device logical id leaves no room for every interface"));
        }
        if self.device_name.chars().count() > MAX_NAME {
            return Err(Error::Config("device name too long"));
        }
        if self.interfaces.len() > MAX_TABLE_INTERFACES {
            return Err(Error::Config("too many interfaces"));
        }
        for iface in &self.interfaces {
            if iface.name.chars().count() > MAX_INTERFACE_NAME {
                return Err(Error::Config("interface name too long"));
            }
            if iface.linked_device > MAX_LOGICAL_ID {
                return Err(Error::Config("linked device id exceeds 5 bits"));
            }
            if iface.routes.len() > MAX_ROUTES {
                return Err(Error::Config("too many routes for one interface"));
            }
            if iface.routes.contains(&ROUTE_END) {
                return Err(Error::Config("route list contains the terminator"));
            }
        }
        if self.task_stack_kb == 0 {
            return Err(Error::Config("task stack size is zero"));
        }
        Ok(())
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let config: Self =
            serde_json::from_slice(bytes).map_err(|_| Error::Config("malformed JSON configuration"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_postcard(bytes: &[u8]) -> Result<Self> {
        let config: Self =
            postcard::from_bytes(bytes).map_err(|_| Error::Config("malformed postcard configuration"))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let c = BridgeConfig::default();
        c.validate().unwrap();
        assert_eq!(c.device_logical_id, 10);
        assert_eq!(c.vendor_id, 0x2C);
        assert_eq!(c.interfaces.len(), 3);
        assert_eq!(c.interfaces[2].kind, CastMode::EndBus);
        assert!(!c.interfaces[2].start_active);
    }

    #[test]
    fn serde_roundtrip() {
        let c = BridgeConfig::default();
        let json = serde_json::to_string(&c).unwrap();
        let c2 = BridgeConfig::from_json(json.as_bytes()).unwrap();
        assert_eq!(c, c2);
    }

    #[test]
    fn postcard_roundtrip() {
        let c = BridgeConfig::default();
        let bytes = postcard::to_allocvec(&c).unwrap();
        let c2 = BridgeConfig::from_postcard(&bytes).unwrap();
        assert_eq!(c, c2);
    }

    #[test]
    fn oversized_topologies_are_rejected() {
        let mut c = BridgeConfig::default();
        c.device_logical_id = 32;
        assert!(c.validate().is_err());

        // three interfaces answer as 30, 31 and 32
        let mut c = BridgeConfig::default();
        c.device_logical_id = 30;
        assert!(c.validate().is_err());
        c.device_logical_id = 29;
        c.validate().unwrap();

        let mut c = BridgeConfig::default();
        c.interfaces[0].routes = vec![1; 11];
        assert!(c.validate().is_err());

        let mut c = BridgeConfig::default();
        c.interfaces[1].routes.push(0xFF);
        assert!(c.validate().is_err());

        let mut c = BridgeConfig::default();
        c.interfaces[0].name = "Very long interface".into();
        assert!(c.validate().is_err());

        let mut c = BridgeConfig::default();
        let spare = c.interfaces[0].clone();
        c.interfaces.extend(std::iter::repeat_n(spare, 6));
        assert!(c.validate().is_err());
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        assert!(matches!(
            BridgeConfig::from_json(b"{ not json"),
            Err(Error::Config(_))
        ));
    }
}
