//! Address-link and route tables.
//!
//! Every interface is known under four ids: its local interface index, a
//! scan id (reserved for network discovery), the logical id the device
//! answers to on that interface, and the logical id of the device on the
//! other end of the cable. [`LinkTable::lookup`] translates between any two.

use heapless::String;

use crate::bus::BusInstanceState;
use crate::error::{Error, Result};
use crate::protocol::frame::CastMode;

/// Maximum characters kept for an interface name.
pub const MAX_INTERFACE_NAME: usize = 10;

/// Entries per route list.
pub const MAX_ROUTES: usize = 10;

/// Route-list terminator.
pub const ROUTE_END: u8 = 0xFF;

// ---------------------------------------------------------------------------
// Link table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceLink {
    pub interface_id: u8,
    /// Assigned by network scan. Nothing assigns it yet.
    pub scan_id: u16,
    pub logical_id: u8,
    pub linked_device: u8,
    pub name: String<MAX_INTERFACE_NAME>,
    pub kind: CastMode,
    pub state: BusInstanceState,
}

impl InterfaceLink {
    pub fn new(interface_id: u8, name: &str, kind: CastMode, linked_device: u8) -> Self {
        let mut bounded = String::new();
        for ch in name.chars() {
            if bounded.push(ch).is_err() {
                break;
            }
        }
        Self {
            interface_id,
            scan_id: 0,
            logical_id: 0,
            linked_device,
            name: bounded,
            kind,
            state: BusInstanceState::Init,
        }
    }
}

/// Source and target fields of a link lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkMode {
    InterfaceToScan,
    InterfaceToLogical,
    InterfaceToLinkedDev,
    ScanToInterface,
    ScanToLogical,
    ScanToLinkedDev,
    LogicalToInterface,
    LogicalToScan,
    LogicalToLinkedDev,
    LinkedDevToInterface,
    LinkedDevToScan,
    LinkedDevToLogical,
}

#[derive(Clone, Copy)]
enum Field {
    Interface,
    Scan,
    Logical,
    LinkedDev,
}

impl Field {
    fn get(self, link: &InterfaceLink) -> u16 {
        match self {
            Self::Interface => u16::from(link.interface_id),
            Self::Scan => link.scan_id,
            Self::Logical => u16::from(link.logical_id),
            Self::LinkedDev => u16::from(link.linked_device),
        }
    }
}

impl LinkMode {
    fn fields(self) -> (Field, Field) {
        match self {
            Self::InterfaceToScan => (Field::Interface, Field::Scan),
            Self::InterfaceToLogical => (Field::Interface, Field::Logical),
            Self::InterfaceToLinkedDev => (Field::Interface, Field::LinkedDev),
            Self::ScanToInterface => (Field::Scan, Field::Interface),
            Self::ScanToLogical => (Field::Scan, Field::Logical),
            Self::ScanToLinkedDev => (Field::Scan, Field::LinkedDev),
            Self::LogicalToInterface => (Field::Logical, Field::Interface),
            Self::LogicalToScan => (Field::Logical, Field::Scan),
            Self::LogicalToLinkedDev => (Field::Logical, Field::LinkedDev),
            Self::LinkedDevToInterface => (Field::LinkedDev, Field::Interface),
            Self::LinkedDevToScan => (Field::LinkedDev, Field::Scan),
            Self::LinkedDevToLogical => (Field::LinkedDev, Field::Logical),
        }
    }
}

/// One link entry per configured interface, indexed by interface id.
#[derive(Debug, Clone, Default)]
pub struct LinkTable {
    links: Vec<InterfaceLink>,
}

impl LinkTable {
    pub fn new(links: Vec<InterfaceLink>) -> Self {
        Self { links }
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn get(&self, iface: u8) -> Option<&InterfaceLink> {
        self.links.get(iface as usize)
    }

    pub fn get_mut(&mut self, iface: u8) -> Option<&mut InterfaceLink> {
        self.links.get_mut(iface as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &InterfaceLink> {
        self.links.iter()
    }

    /// First entry whose source field equals `id`, projected to the target
    /// field.
    pub fn lookup(&self, id: u16, mode: LinkMode) -> Option<u16> {
        let (from, to) = mode.fields();
        self.links
            .iter()
            .find(|link| from.get(link) == id)
            .map(|link| to.get(link))
    }

    /// Recompute per-interface logical ids from the device id.
    pub fn update_links(&mut self, device_logical_id: u8) {
        for (index, link) in self.links.iter_mut().enumerate() {
            link.logical_id = device_logical_id.wrapping_add(index as u8);
        }
    }
}

// ---------------------------------------------------------------------------
// Route table
// ---------------------------------------------------------------------------

/// Logical ids reachable through each interface. Static after boot.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<[u8; MAX_ROUTES]>,
}

impl RouteTable {
    /// Build from per-interface id lists. Lists longer than
    /// [`MAX_ROUTES`] or containing [`ROUTE_END`] are rejected.
    pub fn new<I, R>(lists: I) -> Result<Self>
    where
        I: IntoIterator<Item = R>,
        R: AsRef<[u8]>,
    {
        let mut routes = Vec::new();
        for list in lists {
            let list = list.as_ref();
            if list.len() > MAX_ROUTES {
                return Err(Error::Config("too many routes for one interface"));
            }
            if list.contains(&ROUTE_END) {
                return Err(Error::Config("route list contains the terminator"));
            }
            let mut entry = [ROUTE_END; MAX_ROUTES];
            entry[..list.len()].copy_from_slice(list);
            routes.push(entry);
        }
        Ok(Self { routes })
    }

    /// First interface whose route list contains `logical_id`.
    pub fn route_interface(&self, logical_id: u8) -> Option<u8> {
        self.routes
            .iter()
            .position(|list| {
                list.iter()
                    .take_while(|&&id| id != ROUTE_END)
                    .any(|&id| id == logical_id)
            })
            .map(|iface| iface as u8)
    }
}
