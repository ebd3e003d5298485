// ============================================
// File: crates/wgbridge-runtime/src/lib.rs
// ============================================
//! # wgbridge Runtime - Tunnel Registry and Host Bridge
//!
//! ## Creation Reason
//! Hosts embed one or more tunnels and drive them through a small
//! handle-based C interface. This crate owns the handle table, reacts to
//! network changes, forwards logs to the host and exports the C ABI.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`services`]: Registry, network-change reactor, rebind, diagnostics
//! - [`engine`]: Seam to the external tunnel engine
//! - [`logging`]: Host log bridge and `tracing` setup
//! - [`bridge`]: Process-wide owner of runtime and registry
//! - [`ffi`]: `extern "C"` functions
//! - [`config`]: TOML runtime configuration
//! - [`error`]: Runtime error types and C status codes
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │   host app ──► ffi ──► Bridge                       │
//! │                          │                          │
//! │      ┌───────────────────┼──────────────────┐       │
//! │      ▼                   ▼                  ▼       │
//! │  TunnelRegistry   NetworkReactor      RouteMonitor  │
//! │      │                                              │
//! │      ▼                                              │
//! │  TunnelEngine (external) ──► TunDevice              │
//! │                                                     │
//! │            wgbridge-runtime  ◄── You are here       │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The tunnel engine is not part of this workspace; embedders pass one
//!   to `Bridge::install` before the host calls any `wg*` function
//! - `MemoryEngine` is available with the `mock` feature for tests
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_safety_doc)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod ffi;
pub mod logging;
pub mod services;

// Re-export primary types
pub use bridge::Bridge;
pub use config::RuntimeConfig;
pub use engine::{AddressFamily, DeviceLogger, TunnelDevice, TunnelEngine};
pub use error::{Result, RuntimeError};
pub use logging::{init_tracing, LogBridge, LogBridgeError, TunnelLogger};
pub use services::{IoSource, NetworkReactor, RegistryError, ReresolveStatus, TunnelRegistry};

#[cfg(any(test, feature = "mock"))]
pub use engine::{MemoryDevice, MemoryEngine};
