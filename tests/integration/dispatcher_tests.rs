//! End-to-end dispatcher tests over mock buses.
//!
//! The default topology is used throughout: USB (0) and SPI (1) bridges
//! launched at boot, USART (2) end-bus armed on demand.

use std::time::{Duration, Instant};

use mbabridge::app::{self, Dispatcher};
use mbabridge::bus::{BusInstanceState, BusParameter, BusTransport};
use mbabridge::config::BridgeConfig;
use mbabridge::dictionary::table;
use mbabridge::os::StopToken;
use mbabridge::protocol::frame::{Command, Frame, pack};
use mbabridge::protocol::operation::OperationState;

use crate::mock_bus::{BusCall, MockBusHandle, mock_bus, wait_until};

const TIMEOUT: Duration = Duration::from_secs(3);

struct Rig {
    dispatcher: Dispatcher,
    buses: Vec<MockBusHandle>,
}

fn rig() -> Rig {
    let mut config = BridgeConfig::default();
    config.dispatch_poll_ms = 2;
    config.writer_poll_ms = 2;

    let mut transports: Vec<Box<dyn BusTransport>> = Vec::new();
    let mut buses = Vec::new();
    for _ in &config.interfaces {
        let (bus, handle) = mock_bus();
        transports.push(Box::new(bus));
        buses.push(handle);
    }
    let dispatcher = app::build(&config, transports).unwrap();
    Rig { dispatcher, buses }
}

fn step_until(dispatcher: &mut Dispatcher, mut cond: impl FnMut(&Dispatcher) -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        dispatcher.step();
        if cond(dispatcher) {
            return true;
        }
    }
    false
}

fn bus_state(dispatcher: &Dispatcher, iface: u8) -> BusInstanceState {
    dispatcher.stack().bus().states().state(iface).unwrap()
}

/// Boot the rig until both bridges report `Active`.
fn booted() -> Rig {
    let mut rig = rig();
    assert!(step_until(&mut rig.dispatcher, |d| {
        bus_state(d, 0) == BusInstanceState::Active && bus_state(d, 1) == BusInstanceState::Active
    }));
    rig
}

fn config_read(register: u16) -> Vec<u8> {
    let mut payload = register.to_le_bytes().to_vec();
    payload.push(0x10);
    Frame::new(pack(10, 0), Command::Config, pack(2, 0), payload)
        .encode()
        .unwrap()
}

fn operation(target_iface: u8, state: u8, target: u8) -> Vec<u8> {
    Frame::new(pack(10, target_iface), Command::Operation, pack(2, 0), vec![state, target])
        .encode()
        .unwrap()
}

fn step_until_written(rig: &mut Rig, iface: usize, count: usize) -> Vec<Frame> {
    let bus = rig.buses[iface].clone();
    assert!(
        step_until(&mut rig.dispatcher, |_| bus.writes().len() >= count),
        "interface {} wrote {} frame(s), expected {}",
        iface,
        bus.writes().len(),
        count
    );
    bus.writes()
        .iter()
        .map(|raw| Frame::decode(raw).unwrap())
        .collect()
}

// ── Boot ──────────────────────────────────────────────────────

#[test]
fn boot_launches_bridges_only() {
    let rig = booted();
    assert_eq!(rig.dispatcher.stack().state(), OperationState::Inactive);
    assert!(rig.dispatcher.bus_app().is_running(0));
    assert!(rig.dispatcher.bus_app().is_running(1));
    assert!(!rig.dispatcher.bus_app().is_running(2));
    assert!(!rig.buses[2].is_up());

    assert_eq!(
        rig.buses[0].calls()[..3],
        [
            BusCall::Init,
            BusCall::Configure(BusParameter::FrameDetection, 2),
            BusCall::Configure(BusParameter::Timeout, 10),
        ]
    );
}

#[test]
fn interface_states_are_mirrored_into_the_dictionary() {
    let mut rig = booted();
    // The mirror is refreshed on the iteration after the writer marks Active.
    rig.dispatcher.step();
    let dict = rig.dispatcher.stack().dictionary();
    for iface in 0..2 {
        assert_eq!(
            dict.value(table::interface_register(iface, table::IFACE_STATE)),
            Some(&[BusInstanceState::Active as u8][..])
        );
    }
}

// ── Frame paths ───────────────────────────────────────────────

#[test]
fn config_read_is_answered_on_the_arrival_interface() {
    let mut rig = booted();
    rig.buses[0].push_rx(vec![0xDE, 0xAD]);
    rig.buses[0].push_rx(config_read(table::DEVICE_NAME));

    let written = step_until_written(&mut rig, 0, 1);
    let reply = &written[0];
    assert_eq!(reply.destination, pack(2, 0));
    assert_eq!(reply.source, pack(10, 0));
    assert_eq!(reply.command, Command::Config);
    assert_eq!(&reply.data[..3], &[0x00, 0x01, 0x10]);
    assert_eq!(&reply.data[3..], b"Noodleboard");
}

#[test]
fn foreign_frames_are_forwarded_unchanged() {
    let mut rig = booted();
    let frame = Frame::new(pack(5, 1), Command::Transfer, pack(2, 0), vec![1, 2, 3]);
    rig.buses[0].push_rx(frame.encode().unwrap());

    let written = step_until_written(&mut rig, 1, 1);
    assert_eq!(written[0], frame);
    assert!(rig.buses[0].writes().is_empty());
}

#[test]
fn end_bus_comes_up_when_device_activates() {
    let mut rig = booted();

    // Arm USART while the device is inactive.
    rig.buses[0].push_rx(operation(0, BusInstanceState::Inactive as u8, 2));
    let written = step_until_written(&mut rig, 0, 1);
    assert_eq!(written[0].data, vec![0x80 | OperationState::Inactive as u8, 2]);
    assert!(!rig.dispatcher.bus_app().is_running(2));

    rig.buses[0].push_rx(operation(0, OperationState::Active as u8, 0xFF));
    let usart = rig.buses[2].clone();
    assert!(step_until(&mut rig.dispatcher, |_| usart.is_up()));
    assert_eq!(rig.dispatcher.stack().state(), OperationState::Active);

    // Raw end-bus bytes become a transfer frame for the linked device.
    rig.buses[2].push_rx(vec![0x42, 0x43]);
    let written = step_until_written(&mut rig, 0, 3);
    let forwarded = &written[2];
    assert_eq!(forwarded.command, Command::Transfer);
    assert_eq!(forwarded.destination, pack(1, 0));
    assert_eq!(forwarded.source, pack(10, 2));
    assert_eq!(forwarded.data, vec![0x42, 0x43]);

    // And transfer frames for the interface go out as raw payload.
    let down = Frame::new(pack(10, 2), Command::Transfer, pack(1, 0), vec![7, 7]);
    rig.buses[0].push_rx(down.encode().unwrap());
    let bus = rig.buses[2].clone();
    assert!(step_until(&mut rig.dispatcher, |_| bus.writes() == vec![vec![7, 7]]));
}

#[test]
fn stop_request_tears_the_interface_down() {
    let mut rig = booted();
    rig.buses[0].push_rx(operation(0, BusInstanceState::Stop as u8, 1));

    let written = step_until_written(&mut rig, 0, 1);
    assert_eq!(written[0].data, vec![0x80 | OperationState::Inactive as u8, 1]);
    assert!(!rig.dispatcher.bus_app().is_running(1));
    assert!(!rig.buses[1].is_up());
    assert_eq!(rig.buses[1].deinit_count(), 1);
    assert_eq!(bus_state(&rig.dispatcher, 1), BusInstanceState::Init);
    assert!(rig.dispatcher.bus_app().is_running(0));
}

#[test]
fn unknown_operation_target_gets_no_reply() {
    let mut rig = booted();
    rig.buses[0].push_rx(operation(0, 1, 6));
    rig.buses[0].push_rx(config_read(table::VENDOR_ID));

    let written = step_until_written(&mut rig, 0, 1);
    assert_eq!(written.len(), 1);
    assert_eq!(written[0].command, Command::Config);
    assert_eq!(&written[0].data[3..], &[0x2C]);
}

// ── Shutdown ──────────────────────────────────────────────────

#[test]
fn run_returns_and_stops_buses_when_token_raised() {
    let Rig { mut dispatcher, buses } = booted();
    let stop = StopToken::new();
    let token = stop.clone();
    let handle = std::thread::spawn(move || {
        dispatcher.run(&token);
        dispatcher
    });

    std::thread::sleep(Duration::from_millis(20));
    stop.raise();
    let dispatcher = handle.join().unwrap();

    assert!(!dispatcher.bus_app().is_running(0));
    assert!(!dispatcher.bus_app().is_running(1));
    assert!(wait_until(TIMEOUT, || buses.iter().take(2).all(|b| !b.is_up())));
}
