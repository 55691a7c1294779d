//! Concurrency stress: many producers against the single inbound consumer.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use mbabridge::app::{self, Inbound};
use mbabridge::bus::BusTransport;
use mbabridge::config::BridgeConfig;
use mbabridge::dictionary::table;
use mbabridge::protocol::frame::{Command, Frame, pack};

use crate::mock_bus::mock_bus;

const PRODUCERS: u32 = 8;
const PER_PRODUCER: u32 = 200;

#[test]
fn every_pushed_frame_is_received_exactly_once() {
    let queue = Inbound::new("stress", Duration::from_secs(1));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queue = queue.clone();
            thread::spawn(move || {
                for n in 0..PER_PRODUCER {
                    let id = p * PER_PRODUCER + n;
                    let frame = Frame::new(0, Command::Transfer, 0, id.to_le_bytes().to_vec());
                    queue.push(frame).unwrap();
                }
            })
        })
        .collect();

    let total = (PRODUCERS * PER_PRODUCER) as usize;
    let mut seen = HashSet::with_capacity(total);
    let deadline = Instant::now() + Duration::from_secs(20);
    while seen.len() < total && Instant::now() < deadline {
        if let Some(frame) = queue.mailbox().receive_timeout(Duration::from_millis(50)) {
            let id = u32::from_le_bytes(frame.data[..4].try_into().unwrap());
            assert!(seen.insert(id), "frame {} delivered twice", id);
        }
    }
    for producer in producers {
        producer.join().unwrap();
    }

    assert_eq!(seen.len(), total);
    assert!(queue.mailbox().is_empty());
}

#[test]
fn dispatcher_applies_each_concurrent_write_once() {
    const WRITERS: u16 = 4;
    const WRITES: u16 = 50;

    let mut config = BridgeConfig::default();
    config.dispatch_poll_ms = 1;
    config.mutex_timeout_ms = 1000;
    for iface in &mut config.interfaces {
        iface.start_active = false;
    }
    let transports: Vec<Box<dyn BusTransport>> = config
        .interfaces
        .iter()
        .map(|_| Box::new(mock_bus().0) as Box<dyn BusTransport>)
        .collect();
    let mut dispatcher = app::build(&config, transports).unwrap();

    let applied = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&applied);
    dispatcher
        .stack_mut()
        .attach_register(
            table::BOARD_LEDS,
            &[0, 0],
            Box::new(move |_: &[u8]| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

    let producers: Vec<_> = (0..WRITERS)
        .map(|w| {
            let inbound = dispatcher.inbound().clone();
            thread::spawn(move || {
                for n in 0..WRITES {
                    let mut payload = table::BOARD_LEDS.to_le_bytes().to_vec();
                    payload.push(0x20);
                    payload.extend_from_slice(&(w * WRITES + n).to_le_bytes());
                    let frame = Frame::new(pack(10, 0), Command::Config, pack(2, 0), payload);
                    inbound.push(frame).unwrap();
                }
            })
        })
        .collect();

    let total = usize::from(WRITERS * WRITES);
    let deadline = Instant::now() + Duration::from_secs(20);
    while applied.load(Ordering::SeqCst) < total && Instant::now() < deadline {
        dispatcher.step();
    }
    for producer in producers {
        producer.join().unwrap();
    }
    // Drain anything still queued; nothing may be applied twice.
    while !dispatcher.inbound().mailbox().is_empty() {
        dispatcher.step();
    }

    assert_eq!(applied.load(Ordering::SeqCst), total);
}
