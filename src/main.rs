//! MBA bridge host binary.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  LoopbackTransport per configured interface                  │
//! │        │ reader ▲ writer                                     │
//! │  ──────┼────────┼──────────── BusTransport ───────────────   │
//! │        ▼        │                                            │
//! │  ┌───────────────────────────────────────────────────────┐   │
//! │  │ Dispatcher: ProtocolStack · BusApp · inbound queue    │   │
//! │  └───────────────────────────────────────────────────────┘   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Usage: `mbabridge [config.json | config.postcard] [run_secs]`
//!
//! With no `run_secs` the bridge runs until the dispatcher thread exits.

#![deny(unused_must_use)]

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use log::{info, warn};
use tracing_subscriber::FmtSubscriber;

use mbabridge::app;
use mbabridge::bus::BusTransport;
use mbabridge::bus::loopback::{LoopbackHandle, LoopbackTransport};
use mbabridge::config::{BridgeConfig, LogLevel};
use mbabridge::dictionary::table;
use mbabridge::os::{StopToken, spawn_task};
use mbabridge::protocol::frame::{Command, Frame, pack};

fn load_config(path: Option<&str>) -> Result<BridgeConfig> {
    let Some(path) = path else {
        return Ok(BridgeConfig::default());
    };
    let bytes = std::fs::read(path).with_context(|| format!("reading {path}"))?;
    let config = if Path::new(path)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
    {
        BridgeConfig::from_json(&bytes)
    } else {
        BridgeConfig::from_postcard(&bytes)
    };
    config.with_context(|| format!("loading {path}"))
}

fn init_logging(level: LogLevel) -> Result<()> {
    let max_level = match level {
        LogLevel::Error => tracing::Level::ERROR,
        LogLevel::Warn => tracing::Level::WARN,
        LogLevel::Info => tracing::Level::INFO,
        LogLevel::Debug => tracing::Level::DEBUG,
        LogLevel::Trace => tracing::Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(max_level)
        .with_target(true)
        .with_thread_names(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init_with_filter(level.filter())?;
    Ok(())
}

/// Config read of the device name, addressed to this node over interface 0.
fn identify_request(config: &BridgeConfig) -> Result<Vec<u8>> {
    let mut payload = table::DEVICE_NAME.to_le_bytes().to_vec();
    payload.push(0x10);
    let linked = config.interfaces.first().map_or(0, |iface| iface.linked_device);
    let frame = Frame::new(
        pack(config.device_logical_id, 0),
        Command::Config,
        pack(linked, 0),
        payload,
    );
    Ok(frame.encode()?)
}

fn main() -> Result<()> {
    // ── 1. Configuration + logging ────────────────────────────
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = load_config(args.first().map(String::as_str))?;
    let run_secs = match args.get(1) {
        Some(arg) => Some(arg.parse::<u64>().with_context(|| format!("run_secs '{arg}'"))?),
        None => None,
    };
    init_logging(config.log_level)?;

    info!("╔══════════════════════════════════════╗");
    info!("║  MBA bridge v{}                      ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Transports ─────────────────────────────────────────
    let mut transports: Vec<Box<dyn BusTransport>> = Vec::with_capacity(config.interfaces.len());
    let mut handles: Vec<LoopbackHandle> = Vec::with_capacity(config.interfaces.len());
    for iface in &config.interfaces {
        let (transport, handle) = LoopbackTransport::new(iface.name.as_str());
        transports.push(Box::new(transport));
        handles.push(handle);
    }

    // ── 3. Dispatcher ─────────────────────────────────────────
    let mut dispatcher = app::build(&config, transports)?;
    dispatcher.stack_mut().attach_register(
        table::BOARD_LEDS,
        &[0, 0],
        Box::new(|bytes: &[u8]| info!("Board LEDs <- {:02X?}", bytes)),
    )?;

    if let Some(first) = handles.first() {
        first.inject(identify_request(&config)?);
    }

    let stop = StopToken::new();
    let dispatcher_stop = stop.clone();
    let task = spawn_task("dispatcher", config.task_stack_kb, move || {
        dispatcher.run(&dispatcher_stop);
    })?;

    // ── 4. Run + shutdown ─────────────────────────────────────
    if let Some(secs) = run_secs {
        std::thread::sleep(Duration::from_secs(secs));
        info!("Run time elapsed, stopping");
        stop.raise();
    }
    if task.join().is_err() {
        bail!("dispatcher thread panicked");
    }

    for (iface, handle) in config.interfaces.iter().zip(&handles) {
        let written = handle.take_written();
        if written.is_empty() {
            continue;
        }
        info!("{}: {} frame(s) written", iface.name, written.len());
        for raw in written {
            match Frame::decode(&raw) {
                Ok(frame) => info!(
                    "  {:?} {} -> {} data={:02X?}",
                    frame.command, frame.source, frame.destination, frame.data
                ),
                Err(e) => warn!("  undecodable frame: {}", e),
            }
        }
    }
    info!("Shutdown complete");
    Ok(())
}
