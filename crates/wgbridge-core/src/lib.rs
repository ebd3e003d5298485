// ============================================
// File: crates/wgbridge-core/src/lib.rs
// ============================================
//! # wgbridge Core - Shared Types and Configuration Protocol
//!
//! ## Creation Reason
//! Provides the foundational types and the configuration-protocol helpers
//! shared by every wgbridge crate.
//!
//! ## Main Functionality
//!
//! ### Modules
//! - [`types`]: Tunnel handles and log levels
//! - [`uapi`]: Endpoint extraction and engine error codes for the
//!   `key=value` configuration protocol
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              wgbridge-runtime                       │
//! │        (registry, reactor, log bridge, C ABI)       │
//! │                    │                                │
//! │                    ▼                                │
//! │            wgbridge-transport                       │
//! │        (fd / callback / mock TUN adapters)          │
//! │                    │                                │
//! │                    ▼                                │
//! │              wgbridge-core  ◄── You are here        │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - This crate is the leaf of the workspace - keep dependencies minimal
//! - The configuration text is owned by the tunnel engine; only inspect
//!   the fields the runtime actually needs
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod types;
pub mod uapi;

// Re-export commonly used items at crate root
pub use types::{LogLevel, TunnelHandle};
pub use uapi::{endpoints_only, IpcError};
