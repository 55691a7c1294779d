//! Transfer protocol: link/route tables, routing decisions and the
//! dictionary view of the interface tables.
//!
//! ```text
//!   frame ──▶ dest logical == own id ? ──yes──▶ Local { command, interface }
//!                    │
//!                    no
//!                    ▼
//!            route table lookup ──hit──▶ Forward { interface }
//!                    │
//!                   miss ──▶ Err(NoRoute)
//! ```

use std::sync::Arc;

use log::{info, warn};

use crate::bus::{BusInstanceState, BusStateMachine, SharedBus};
use crate::dictionary::Dictionary;
use crate::dictionary::table::{
    self, IFACE_DESCRIPTION, IFACE_LINK, IFACE_NAME, IFACE_STATE, IFACE_TYPE, interface_register,
};
use crate::error::{DecodeError, Error, Result};
use crate::protocol::RegisterEvents;
use crate::protocol::frame::{CastMode, CastProfile, Command, Frame, pack};
use crate::protocol::links::{InterfaceLink, LinkMode, LinkTable, RouteTable};

/// Logical id used when configuration does not provide one.
pub const DEFAULT_LOGICAL_ID: u8 = 10;

/// Largest logical id the 5-bit address field carries.
pub const MAX_LOGICAL_ID: u8 = 31;

/// Whether a device id leaves room for one logical id per interface.
/// Interface `n` answers as `device_id + n`, which must stay within 5 bits.
pub fn device_id_fits(device_id: u8, interfaces: usize) -> bool {
    usize::from(device_id) + interfaces.saturating_sub(1) <= usize::from(MAX_LOGICAL_ID)
}

/// Where a decoded frame goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Addressed to this device; `interface` is the destination interface
    /// field of the frame.
    Local { command: Command, interface: u8 },
    /// Addressed elsewhere; send out of `interface` unchanged.
    Forward { interface: u8 },
}

/// A frame bound for one local interface's outbound mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub interface: u8,
    pub frame: Frame,
}

#[derive(Debug)]
pub struct TransferProtocol {
    device_logical_id: u8,
    links: LinkTable,
    routes: RouteTable,
}

impl TransferProtocol {
    pub fn new(device_logical_id: u8, links: LinkTable, routes: RouteTable) -> Self {
        let mut proto = Self {
            device_logical_id,
            links,
            routes,
        };
        proto.links.update_links(device_logical_id);
        proto
    }

    pub fn device_logical_id(&self) -> u8 {
        self.device_logical_id
    }

    pub fn links(&self) -> &LinkTable {
        &self.links
    }

    pub fn interface_count(&self) -> usize {
        self.links.len()
    }

    /// Bind the link table to the dictionary and load link states from the
    /// bus table.
    pub fn init(
        &mut self,
        dictionary: &mut Dictionary,
        bus: &SharedBus,
        events: &Arc<RegisterEvents>,
    ) -> Result<()> {
        for iface in 0..self.links.len() as u8 {
            let state = bus.states().state(iface)?;
            if let Some(link) = self.links.get_mut(iface) {
                link.state = state;
            }
        }

        dictionary.attach_variable(table::DEVICE_ID, &[self.device_logical_id])?;
        let hook = Arc::clone(events);
        dictionary.attach_callback(
            table::DEVICE_ID,
            Box::new(move |_: &[u8]| hook.raise_device_id()),
        )?;
        dictionary.attach_variable(table::DEVICE_INTERFACES, &[self.links.len() as u8])?;

        for link in self.links.iter() {
            let iface = link.interface_id;
            dictionary.attach_variable(interface_register(iface, IFACE_DESCRIPTION), &[iface])?;
            dictionary.attach_variable(interface_register(iface, IFACE_NAME), link.name.as_bytes())?;
            dictionary.attach_variable(
                interface_register(iface, IFACE_LINK),
                &[link.linked_device],
            )?;
            dictionary.attach_variable(interface_register(iface, IFACE_TYPE), &[link.kind as u8])?;
            dictionary.attach_variable(interface_register(iface, IFACE_STATE), &[link.state as u8])?;
            for offset in [IFACE_LINK, IFACE_TYPE] {
                let hook = Arc::clone(events);
                dictionary.attach_callback(
                    interface_register(iface, offset),
                    Box::new(move |_: &[u8]| hook.raise_links()),
                )?;
            }
        }

        self.links.update_links(self.device_logical_id);
        self.publish_profiles(bus)?;
        info!(
            "Transfer protocol up: logical id {}, {} interfaces",
            self.device_logical_id,
            self.links.len()
        );
        Ok(())
    }

    // ── Routing ───────────────────────────────────────────────

    pub fn route(&self, frame: &Frame) -> Result<Route> {
        let dest = frame.dest_logical();
        if dest == self.device_logical_id {
            return Ok(Route::Local {
                command: frame.command,
                interface: frame.dest_interface(),
            });
        }
        self.routes
            .route_interface(dest)
            .map(|interface| Route::Forward { interface })
            .ok_or(Error::NoRoute(dest))
    }

    pub fn route_interface(&self, logical_id: u8) -> Option<u8> {
        self.routes.route_interface(logical_id)
    }

    pub fn lookup(&self, id: u16, mode: LinkMode) -> Option<u16> {
        self.links.lookup(id, mode)
    }

    /// Wrap a locally produced payload as the answer to `request`.
    pub fn reply_to(&self, request: &Frame, data: Vec<u8>) -> Frame {
        Frame {
            destination: request.source,
            command: request.command,
            source: pack(self.device_logical_id, request.dest_interface()),
            flow_control: request.flow_control,
            timestamp: request.timestamp,
            data,
            checksum: 0,
        }
    }

    // ── Interface state mirror ────────────────────────────────

    pub fn interface(&self, iface: u8) -> Option<&InterfaceLink> {
        self.links.get(iface)
    }

    pub fn interface_kind(&self, iface: u8) -> Option<CastMode> {
        self.links.get(iface).map(|link| link.kind)
    }

    pub fn interface_state(&self, iface: u8) -> Option<BusInstanceState> {
        self.links.get(iface).map(|link| link.state)
    }

    /// Copy the bus state into the mirror. End-bus interfaces keep the
    /// state the operation protocol forced on them.
    pub fn update_interface_state(&mut self, iface: u8, states: &BusStateMachine) -> Result<()> {
        let state = states.state(iface)?;
        let link = self
            .links
            .get_mut(iface)
            .ok_or(DecodeError::InvalidInterface(iface))?;
        if link.kind == CastMode::MbaBridge {
            link.state = state;
        }
        Ok(())
    }

    pub fn force_interface_state(&mut self, iface: u8, state: BusInstanceState) -> Result<()> {
        let link = self
            .links
            .get_mut(iface)
            .ok_or(DecodeError::InvalidInterface(iface))?;
        link.state = state;
        Ok(())
    }

    // ── Dictionary synchronisation ────────────────────────────

    /// Adopt a device id written through the dictionary.
    pub fn reload_device_id(&mut self, dictionary: &Dictionary, bus: &SharedBus) -> Result<()> {
        let Some(&[id]) = dictionary.value(table::DEVICE_ID) else {
            return Ok(());
        };
        if !device_id_fits(id, self.links.len()) {
            warn!("Device id {} out of range, keeping {}", id, self.device_logical_id);
            return Ok(());
        }
        info!("Device logical id {} -> {}", self.device_logical_id, id);
        self.device_logical_id = id;
        self.links.update_links(id);
        self.publish_profiles(bus)
    }

    /// Adopt linked-device and type values written through the dictionary.
    pub fn reload_links(&mut self, dictionary: &Dictionary, bus: &SharedBus) -> Result<()> {
        for iface in 0..self.links.len() as u8 {
            let linked = dictionary.value(interface_register(iface, IFACE_LINK));
            let kind = dictionary.value(interface_register(iface, IFACE_TYPE));
            let Some(link) = self.links.get_mut(iface) else {
                continue;
            };
            if let Some(&[linked]) = linked {
                link.linked_device = linked;
            }
            if let Some(&[raw]) = kind {
                match CastMode::from_u8(raw) {
                    Some(kind) => link.kind = kind,
                    None => warn!("Interface {}: unknown type 0x{:02X} ignored", iface, raw),
                }
            }
        }
        self.publish_profiles(bus)
    }

    /// Publish the current tables into the dictionary registers.
    pub fn publish(&self, dictionary: &mut Dictionary) -> Result<()> {
        dictionary.store(table::DEVICE_ID, &[self.device_logical_id])?;
        for link in self.links.iter() {
            let iface = link.interface_id;
            dictionary.store(interface_register(iface, IFACE_LINK), &[link.linked_device])?;
            dictionary.store(interface_register(iface, IFACE_TYPE), &[link.kind as u8])?;
            dictionary.store(interface_register(iface, IFACE_STATE), &[link.state as u8])?;
        }
        Ok(())
    }

    /// Hand every bus task the cast profile for its interface.
    pub fn publish_profiles(&self, bus: &SharedBus) -> Result<()> {
        for link in self.links.iter() {
            let profile = CastProfile {
                mode: link.kind,
                source: pack(self.device_logical_id, link.interface_id),
                destination: pack(link.linked_device, 0),
            };
            bus.publish_profile(link.interface_id, profile)?;
        }
        Ok(())
    }
}
