//! Host OS primitives: bounded mailboxes, the mutex-guarded inbound queue,
//! task spawning and cooperative stop tokens.
//!
//! ```text
//! ┌────────────┐  push (timed mutex)  ┌───────────────┐  receive_timeout  ┌────────────┐
//! │ bus reader │─────────────────────▶│ InboundQueue  │──────────────────▶│ dispatcher │
//! │ bus reader │─────────────────────▶│ (Mailbox, 16) │                   │            │
//! └────────────┘                      └───────────────┘                   └─────┬──────┘
//!                                                                               │ post
//! ┌────────────┐  receive_timeout     ┌───────────────┐                         │
//! │ bus writer │◀─────────────────────│ Mailbox, 8    │◀────────────────────────┘
//! └────────────┘                      └───────────────┘
//! ```
//!
//! Channels are `embassy-sync` MPMC channels; blocking waits run the
//! channel futures to completion with `futures-lite`, and bounded waits
//! race them against an `embassy-time` timer.

use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use std::sync::Arc;
use std::thread::JoinHandle;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use embassy_sync::mutex::Mutex;
use futures_lite::future::block_on;
use log::{info, warn};

use crate::error::{ResourceError, Result};

/// Depth of every per-interface outbound mailbox.
pub const BUS_MAILBOX_DEPTH: usize = 8;

/// Depth of the central inbound mailbox.
pub const CENTRAL_MAILBOX_DEPTH: usize = 16;

fn ticks(duration: Duration) -> embassy_time::Duration {
    embassy_time::Duration::from_micros(u64::try_from(duration.as_micros()).unwrap_or(u64::MAX))
}

// ---------------------------------------------------------------------------
// Mailbox
// ---------------------------------------------------------------------------

/// Bounded FIFO of owned values. Cloning shares the same channel.
pub struct Mailbox<T, const N: usize> {
    name: &'static str,
    channel: Arc<Channel<CriticalSectionRawMutex, T, N>>,
}

impl<T, const N: usize> Clone for Mailbox<T, N> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            channel: Arc::clone(&self.channel),
        }
    }
}

impl<T, const N: usize> Mailbox<T, N> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            channel: Arc::new(Channel::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Enqueue without waiting. A full mailbox drops the value.
    pub fn try_send(&self, item: T) -> Result<()> {
        match self.channel.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!("Mailbox '{}' full, message dropped", self.name);
                Err(ResourceError::Buffer.into())
            }
        }
    }

    /// Enqueue, waiting up to `timeout` for room.
    pub fn send_timeout(&self, item: T, timeout: Duration) -> Result<()> {
        match block_on(embassy_time::with_timeout(ticks(timeout), self.channel.send(item))) {
            Ok(()) => Ok(()),
            Err(_) => {
                warn!("Mailbox '{}' still full after {:?}, message dropped", self.name, timeout);
                Err(ResourceError::Buffer.into())
            }
        }
    }

    /// Block until a value arrives.
    pub fn receive(&self) -> T {
        block_on(self.channel.receive())
    }

    /// Wait up to `timeout` for a value.
    pub fn receive_timeout(&self, timeout: Duration) -> Option<T> {
        block_on(embassy_time::with_timeout(ticks(timeout), self.channel.receive())).ok()
    }

    pub fn try_receive(&self) -> Option<T> {
        self.channel.try_receive().ok()
    }

    pub fn len(&self) -> usize {
        self.channel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Inbound queue
// ---------------------------------------------------------------------------

/// The central mailbox behind a producer mutex. Producers that cannot take
/// the mutex within the timeout drop their value and report it.
pub struct InboundQueue<T, const N: usize> {
    mailbox: Mailbox<T, N>,
    lock: Arc<Mutex<CriticalSectionRawMutex, ()>>,
    timeout: Duration,
}

impl<T, const N: usize> Clone for InboundQueue<T, N> {
    fn clone(&self) -> Self {
        Self {
            mailbox: self.mailbox.clone(),
            lock: Arc::clone(&self.lock),
            timeout: self.timeout,
        }
    }
}

impl<T, const N: usize> InboundQueue<T, N> {
    pub fn new(name: &'static str, timeout: Duration) -> Self {
        Self {
            mailbox: Mailbox::new(name),
            lock: Arc::new(Mutex::new(())),
            timeout,
        }
    }

    /// Enqueue under the producer mutex.
    pub fn push(&self, item: T) -> Result<()> {
        let guard = block_on(embassy_time::with_timeout(ticks(self.timeout), self.lock.lock()));
        let Ok(_guard) = guard else {
            warn!(
                "Inbound '{}': mutex not acquired within {:?}, frame dropped",
                self.mailbox.name(),
                self.timeout
            );
            return Err(ResourceError::SyncTool.into());
        };
        self.mailbox.send_timeout(item, self.timeout)
    }

    /// Consumer side.
    pub fn mailbox(&self) -> &Mailbox<T, N> {
        &self.mailbox
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Cooperative cancellation flag shared by an orchestrator and its tasks.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Spawn a named OS thread with an explicit stack size.
pub fn spawn_task<F>(name: &str, stack_kb: usize, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    info!("Spawning '{}' (stack={}KB)", name, stack_kb);
    std::thread::Builder::new()
        .name(name.into())
        .stack_size(stack_kb * 1024)
        .spawn(f)
        .map_err(|e| {
            warn!("Task '{}' not spawned: {}", name, e);
            ResourceError::Task.into()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn mailbox_is_fifo() {
        let mb: Mailbox<u8, 4> = Mailbox::new("fifo");
        mb.try_send(1).unwrap();
        mb.try_send(2).unwrap();
        assert_eq!(mb.len(), 2);
        assert_eq!(mb.receive(), 1);
        assert_eq!(mb.try_receive(), Some(2));
        assert!(mb.is_empty());
    }

    #[test]
    fn full_mailbox_rejects() {
        let mb: Mailbox<u8, 1> = Mailbox::new("tiny");
        mb.try_send(1).unwrap();
        assert_eq!(mb.try_send(2), Err(Error::Resource(ResourceError::Buffer)));
        assert_eq!(
            mb.send_timeout(3, Duration::from_millis(5)),
            Err(Error::Resource(ResourceError::Buffer))
        );
    }

    #[test]
    fn receive_timeout_expires_on_empty() {
        let mb: Mailbox<u8, 1> = Mailbox::new("empty");
        assert_eq!(mb.receive_timeout(Duration::from_millis(5)), None);
    }

    #[test]
    fn clones_share_the_channel() {
        let a: Mailbox<u8, 2> = Mailbox::new("shared");
        let b = a.clone();
        a.try_send(7).unwrap();
        assert_eq!(b.try_receive(), Some(7));
    }

    #[test]
    fn inbound_push_reaches_consumer() {
        let q: InboundQueue<u32, 4> = InboundQueue::new("inbound", Duration::from_millis(10));
        q.clone().push(5).unwrap();
        assert_eq!(q.mailbox().receive_timeout(Duration::from_millis(10)), Some(5));
    }

    #[test]
    fn inbound_push_times_out_while_producer_lock_held() {
        let q: InboundQueue<u32, 4> = InboundQueue::new("contended", Duration::from_millis(10));
        let _held = block_on(q.lock.lock());
        assert_eq!(q.push(9), Err(Error::Resource(ResourceError::SyncTool)));
        assert!(q.mailbox().is_empty());
    }

    #[test]
    fn stop_token_is_shared() {
        let token = StopToken::new();
        let seen = token.clone();
        assert!(!seen.is_raised());
        token.raise();
        assert!(seen.is_raised());
    }

    #[test]
    fn spawned_task_runs() {
        let token = StopToken::new();
        let flag = token.clone();
        let handle = spawn_task("test-task", 64, move || flag.raise()).unwrap();
        handle.join().unwrap();
        assert!(token.is_raised());
    }
}
