//! Protocol stack: the dictionary, transfer tables and operation state
//! machine owned together by the dispatcher.
//!
//! ```text
//!                 ┌───────────── ProtocolStack ──────────────┐
//!  Frame ───────▶ │ route ─┬─ Local Transfer ──▶ pass-through │ ──▶ Outbound
//!                 │        ├─ Local Config ───▶ Dictionary   │
//!                 │        ├─ Local Operation ▶ state machine│
//!                 │        └─ Forward ────────▶ route table  │
//!                 └───────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use log::{debug, info, warn};

use crate::bus::SharedBus;
use crate::config::BridgeConfig;
use crate::dictionary::table::build_register_table;
use crate::dictionary::{Dictionary, RegisterCallback};
use crate::error::{DecodeError, Result};
use crate::protocol::config;
use crate::protocol::frame::{Command, Frame};
use crate::protocol::links::{InterfaceLink, LinkTable, RouteTable};
use crate::protocol::operation::context::StackContext;
use crate::protocol::operation::{OperationProtocol, OperationState};
use crate::protocol::transfer::{Outbound, Route, TransferProtocol};

pub struct ProtocolStack {
    operation: OperationProtocol,
    ctx: StackContext,
}

impl ProtocolStack {
    /// Build the tables from configuration. Call [`start`](Self::start)
    /// before processing frames.
    pub fn new(config: &BridgeConfig, bus: Arc<SharedBus>) -> Result<Self> {
        config.validate()?;
        let dictionary = Dictionary::new(
            build_register_table(config.interfaces.len(), &config.device_name),
            config.vendor_id,
        )?;
        let links = LinkTable::new(
            config
                .interfaces
                .iter()
                .enumerate()
                .map(|(index, iface)| {
                    InterfaceLink::new(index as u8, &iface.name, iface.kind, iface.linked_device)
                })
                .collect(),
        );
        let routes = RouteTable::new(config.interfaces.iter().map(|iface| iface.routes.as_slice()))?;
        let transfer = TransferProtocol::new(config.device_logical_id, links, routes);

        Ok(Self {
            operation: OperationProtocol::new(),
            ctx: StackContext::new(dictionary, transfer, bus),
        })
    }

    /// Bind registers and enter `Init`.
    pub fn start(&mut self) -> Result<()> {
        self.operation.init(&mut self.ctx)?;
        info!("Protocol stack started in {:?}", self.operation.state());
        Ok(())
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn state(&self) -> OperationState {
        self.operation.state()
    }

    pub fn last_requested(&self) -> OperationState {
        self.operation.last_requested()
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.ctx.dictionary
    }

    pub fn transfer(&self) -> &TransferProtocol {
        &self.ctx.transfer
    }

    pub fn bus(&self) -> &Arc<SharedBus> {
        &self.ctx.bus
    }

    /// Bind storage and a write hook to a board-level register.
    pub fn attach_register(
        &mut self,
        index: u16,
        initial: &[u8],
        callback: RegisterCallback,
    ) -> Result<()> {
        self.ctx.dictionary.attach_variable(index, initial)?;
        self.ctx.dictionary.attach_callback(index, callback)
    }

    // ── Frame processing ──────────────────────────────────────

    /// Route one inbound frame. `Ok(None)` means nothing goes out.
    pub fn process(&mut self, frame: Frame) -> Result<Option<Outbound>> {
        let outbound = match self.ctx.transfer.route(&frame)? {
            Route::Forward { interface } => {
                debug!("Forwarding frame for {} via interface {}", frame.dest_logical(), interface);
                Some(Outbound { interface, frame })
            }
            Route::Local {
                command: Command::Transfer,
                interface,
            } => {
                if self.ctx.transfer.interface(interface).is_none() {
                    return Err(DecodeError::InvalidInterface(interface).into());
                }
                Some(Outbound { interface, frame })
            }
            Route::Local {
                command: Command::Config,
                interface,
            } => match config::process(&mut self.ctx.dictionary, &frame.data) {
                Ok(data) => Some(Outbound {
                    interface,
                    frame: self.ctx.transfer.reply_to(&frame, data),
                }),
                Err(e) => {
                    warn!("Config request dropped: {}", e);
                    None
                }
            },
            Route::Local {
                command: Command::Operation,
                interface,
            } => self
                .operation
                .process(&frame.data, &mut self.ctx)?
                .map(|data| Outbound {
                    interface,
                    frame: self.ctx.transfer.reply_to(&frame, data),
                }),
        };
        self.sync_registers();
        Ok(outbound)
    }

    /// Run the operation state's periodic hook.
    pub fn update(&mut self) -> Result<Option<Outbound>> {
        let generated = self.operation.update(&mut self.ctx);
        self.sync_registers();
        generated
    }

    /// Mirror bus states into the link table and the dictionary.
    pub fn refresh_interface_states(&mut self) {
        for iface in 0..self.ctx.interface_count() as u8 {
            if let Err(e) = self
                .ctx
                .transfer
                .update_interface_state(iface, self.ctx.bus.states())
            {
                warn!("Interface {} state not mirrored: {}", iface, e);
            }
        }
        if let Err(e) = self.ctx.transfer.publish(&mut self.ctx.dictionary) {
            warn!("Link table not published: {}", e);
        }
    }

    /// Apply register writes recorded by dictionary callbacks.
    fn sync_registers(&mut self) {
        let events = Arc::clone(&self.ctx.events);
        if events.take_device_id() {
            if let Err(e) = self
                .ctx
                .transfer
                .reload_device_id(&self.ctx.dictionary, &self.ctx.bus)
            {
                warn!("Device id reload failed: {}", e);
            }
        }
        if events.take_links() {
            if let Err(e) = self
                .ctx
                .transfer
                .reload_links(&self.ctx.dictionary, &self.ctx.bus)
            {
                warn!("Link reload failed: {}", e);
            }
        }
        if events.take_reset() {
            info!("Reset requested through the dictionary");
            if let Err(e) = self.operation.new_state(OperationState::Init, &mut self.ctx) {
                warn!("Reset failed: {}", e);
            }
        }
        if let Err(e) = self.ctx.transfer.publish(&mut self.ctx.dictionary) {
            warn!("Link table not published: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::BusTransition;
    use crate::dictionary::Access;
    use crate::dictionary::table;
    use crate::error::Error;
    use crate::protocol::frame::pack;
    use std::sync::atomic::{AtomicU16, Ordering};

    fn make_stack() -> ProtocolStack {
        let config = BridgeConfig::default();
        let bus = Arc::new(SharedBus::new(config.interfaces.len()));
        let mut stack = ProtocolStack::new(&config, bus).unwrap();
        stack.start().unwrap();
        stack
    }

    fn config_frame(iface: u8, register: u16, access: Access, data: &[u8]) -> Frame {
        let mut payload = register.to_le_bytes().to_vec();
        payload.push(access.bits());
        payload.extend_from_slice(data);
        Frame::new(pack(10, iface), Command::Config, pack(2, 0), payload)
    }

    #[test]
    fn config_read_is_rewrapped() {
        let mut stack = make_stack();
        let out = stack
            .process(config_frame(0, table::DEVICE_NAME, Access::READ_DATA, &[]))
            .unwrap()
            .unwrap();
        assert_eq!(out.interface, 0);
        assert_eq!(out.frame.destination, pack(2, 0));
        assert_eq!(out.frame.source, pack(10, 0));
        assert_eq!(out.frame.command, Command::Config);
        assert_eq!(&out.frame.data[3..], b"Noodleboard");
    }

    #[test]
    fn unknown_register_gets_no_reply() {
        let mut stack = make_stack();
        let out = stack
            .process(config_frame(0, 0x4444, Access::READ_DATA, &[]))
            .unwrap();
        assert_eq!(out, None);
    }

    #[test]
    fn transfer_to_self_passes_through() {
        let mut stack = make_stack();
        let frame = Frame::new(pack(10, 2), Command::Transfer, pack(2, 0), vec![0xAA, 0xBB]);
        let out = stack.process(frame.clone()).unwrap().unwrap();
        assert_eq!(out.interface, 2);
        assert_eq!(out.frame, frame);
    }

    #[test]
    fn transfer_to_missing_interface_is_rejected() {
        let mut stack = make_stack();
        let frame = Frame::new(pack(10, 6), Command::Transfer, pack(2, 0), vec![1]);
        assert_eq!(
            stack.process(frame),
            Err(Error::Decode(DecodeError::InvalidInterface(6)))
        );
    }

    #[test]
    fn remote_frames_are_forwarded_or_dropped() {
        let mut stack = make_stack();
        let frame = Frame::new(pack(5, 0), Command::Config, pack(2, 0), vec![1, 2, 3]);
        let out = stack.process(frame.clone()).unwrap().unwrap();
        assert_eq!(out, Outbound { interface: 1, frame });

        let lost = Frame::new(pack(9, 0), Command::Config, pack(2, 0), vec![]);
        assert_eq!(stack.process(lost), Err(Error::NoRoute(9)));
    }

    #[test]
    fn operation_request_replies_with_state() {
        let mut stack = make_stack();
        let frame = Frame::new(pack(10, 0), Command::Operation, pack(2, 0), vec![3, 0xFF]);
        let out = stack.process(frame).unwrap().unwrap();
        assert_eq!(out.frame.data, vec![0x83, 0xFF]);
        assert_eq!(stack.state(), OperationState::Inactive);
    }

    #[test]
    fn device_id_write_moves_the_node() {
        let mut stack = make_stack();
        stack
            .process(config_frame(0, table::DEVICE_ID, Access::WRITE_DATA, &[4]))
            .unwrap();
        assert_eq!(stack.transfer().device_logical_id(), 4);
        // Old address is now foreign and has no route.
        let old = config_frame(0, table::DEVICE_NAME, Access::READ_DATA, &[]);
        assert_eq!(stack.process(old), Err(Error::NoRoute(10)));
    }

    #[test]
    fn reset_register_reenters_init() {
        let mut stack = make_stack();
        stack.update().unwrap();
        assert_eq!(stack.state(), OperationState::Inactive);
        stack
            .process(config_frame(0, table::RESET, Access::WRITE_DATA, &[1]))
            .unwrap();
        assert_eq!(stack.state(), OperationState::Init);
    }

    #[test]
    fn board_register_callback_fires() {
        let mut stack = make_stack();
        let leds = Arc::new(AtomicU16::new(0));
        let hook = Arc::clone(&leds);
        stack
            .attach_register(
                table::BOARD_LEDS,
                &[0, 0],
                Box::new(move |bytes: &[u8]| {
                    hook.store(u16::from_le_bytes([bytes[0], bytes[1]]), Ordering::SeqCst);
                }),
            )
            .unwrap();
        stack
            .process(config_frame(0, table::BOARD_LEDS, Access::WRITE_DATA, &[0x05, 0x01]))
            .unwrap();
        assert_eq!(leds.load(Ordering::SeqCst), 0x0105);
    }

    #[test]
    fn bridge_state_request_reaches_bus() {
        let mut stack = make_stack();
        let frame = Frame::new(pack(10, 0), Command::Operation, pack(2, 0), vec![1, 1]);
        stack.process(frame).unwrap();
        assert_eq!(
            stack.bus().states().take_transition(1).unwrap(),
            BusTransition::InitToInactive
        );
        stack.refresh_interface_states();
        assert_eq!(
            stack.dictionary().value(table::interface_register(1, table::IFACE_STATE)),
            Some(&[1][..])
        );
    }
}
