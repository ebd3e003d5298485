// ============================================
// File: crates/wgbridge-transport/src/lib.rs
// ============================================
//! # wgbridge Transport - Packet Device Layer
//!
//! ## Creation Reason
//! The tunnel engine consumes a packet device: something it can read IP
//! packets from and write IP packets to. Hosts hand us that device in one
//! of two shapes, a raw TUN file descriptor or a pair of synchronous
//! function pointers. This crate turns both into the same async trait and
//! watches the system routing table for changes.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`traits`]: `TunDevice` trait, `TunEvent`, `TunConfig`
//! - [`tun`]: Descriptor-backed, callback-backed and mock adapters
//! - [`route`]: Route socket monitor producing `NetworkChange` events
//! - [`error`]: Transport-specific error types
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              wgbridge-runtime                       │
//! │        (registry, reactor, log bridge, C ABI)       │
//! │                    │                                │
//! │                    ▼                                │
//! │            wgbridge-transport  ◄── You are here     │
//! │        (fd / callback / mock TUN adapters)          │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Platform Support
//! | Platform | FdTun | CallbackTun | RouteMonitor |
//! |----------|-------|-------------|--------------|
//! | Linux | ✅ | ✅ | ✅ (netlink) |
//! | macOS/iOS | ✅ (utun) | ✅ | ✅ (AF_ROUTE) |
//! | Windows | ❌ | ✅ | ❌ |
//!
//! ## ⚠️ Important Note for Next Developer
//! - Host callbacks are synchronous and may block the calling task
//! - Platform-specific code must stay behind `cfg` gates
//! - Mock implementations available with the `mock` feature
//!
//! ## Last Modified
//! v0.1.0 - Initial transport layer implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod route;
pub mod traits;
pub mod tun;

#[cfg(unix)]
mod sys;

// Re-export primary types
pub use error::{Result, TransportError};
pub use route::{ChangeSource, NetworkChange, RouteMonitor};
pub use traits::{TunConfig, TunDevice, TunEvent};
pub use tun::callback::{CallbackTun, HostContext, ReadFn, WriteFn};

#[cfg(unix)]
pub use tun::fd::FdTun;

#[cfg(any(test, feature = "mock"))]
pub use tun::mock::MockTun;
