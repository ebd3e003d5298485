// ============================================
// File: crates/wgbridge-transport/src/tun/mod.rs
// ============================================
//! # TUN Adapter Module
//!
//! ## Creation Reason
//! Hosts hand packet I/O to the runtime in different shapes. Each shape
//! gets its own adapter behind the `TunDevice` trait.
//!
//! ## Implementations
//! - `fd`: Kernel TUN descriptor (Linux `/dev/net/tun`, Apple `utun`)
//! - `callback`: Host-supplied read/write function pointers
//! - `mock`: In-memory implementation for testing
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    Tunnel engine                     │
//! │                 read() / write() / events            │
//! └──────────────────────────┬───────────────────────────┘
//!                            │ dyn TunDevice
//!          ┌─────────────────┼──────────────────┐
//!          ▼                 ▼                  ▼
//!     ┌─────────┐     ┌─────────────┐     ┌──────────┐
//!     │  FdTun  │     │ CallbackTun │     │ MockTun  │
//!     │ AsyncFd │     │ read_fn/    │     │ VecDeque │
//!     │         │     │ write_fn    │     │ queues   │
//!     └─────────┘     └─────────────┘     └──────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Every adapter emits `TunEvent::Up` once at construction
//! - Event queues hold at most `EVENT_QUEUE_DEPTH` events; extra events
//!   are dropped, the engine only cares about the latest state
//!
//! ## Last Modified
//! v0.1.0 - Initial adapter module structure

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::traits::TunEvent;

pub mod callback;

#[cfg(unix)]
pub mod fd;

// Mock implementation for testing
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use callback::CallbackTun;

#[cfg(unix)]
pub use fd::FdTun;

#[cfg(any(test, feature = "mock"))]
pub use mock::MockTun;

/// Capacity of each adapter's event queue.
pub const EVENT_QUEUE_DEPTH: usize = 10;

// ============================================
// EventChannel
// ============================================

/// Event queue shared by every adapter.
///
/// The sender side lives as long as the device is open; `close()` drops
/// it so the engine's receiver sees the end of the stream.
pub(crate) struct EventChannel {
    tx: Mutex<Option<mpsc::Sender<TunEvent>>>,
    rx: Mutex<Option<mpsc::Receiver<TunEvent>>>,
}

impl EventChannel {
    /// Creates a queue that already holds `TunEvent::Up`.
    pub(crate) fn new_up() -> Self {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let _ = tx.try_send(TunEvent::Up);
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Returns a sender for background watchers.
    pub(crate) fn sender(&self) -> Option<mpsc::Sender<TunEvent>> {
        self.tx.lock().clone()
    }

    /// Queues an event. Returns `false` if the queue is full or closed.
    pub(crate) fn send(&self, event: TunEvent) -> bool {
        self.tx
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.try_send(event).is_ok())
    }

    pub(crate) fn take(&self) -> Option<mpsc::Receiver<TunEvent>> {
        self.rx.lock().take()
    }

    pub(crate) fn close(&self) {
        self.tx.lock().take();
    }
}

// ============================================
// CloseSignal
// ============================================

/// One-shot close flag that async readers can wait on.
pub(crate) struct CloseSignal {
    tx: watch::Sender<bool>,
}

impl CloseSignal {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Sets the flag. Returns `true` only for the call that closed it.
    pub(crate) fn close(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the flag is set.
    pub(crate) async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

// ============================================
// Tests
// ============================================
