// ============================================
// File: crates/wgbridge-core/src/uapi/mod.rs
// ============================================
//! # Configuration Protocol Module
//!
//! ## Creation Reason
//! The tunnel engine is configured with a textual, line-oriented
//! `key=value` protocol. The runtime treats that text as opaque except for
//! the handful of fields it needs for endpoint re-resolution.
//!
//! ## Main Functionality
//!
//! ### Submodules
//! - [`endpoints`]: Derive the "endpoints-only" fragment
//! - [`ipc`]: Numeric error codes returned by configuration transactions
//!
//! ## Fragment Layout
//! ```text
//! private_key=<hex>         ┐
//! listen_port=51820         ┘ device preamble
//! public_key=<hex>          ┐
//! endpoint=1.2.3.4:51820    │ peer block
//! allowed_ip=10.0.0.2/32    ┘
//! public_key=<hex>          ┐
//! remove=true               ┘ peer block
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Every `public_key=` line opens a new peer block
//! - Nothing here validates values; the engine does
//!
//! ## Last Modified
//! v0.1.0 - Initial protocol helpers

pub mod endpoints;
pub mod ipc;

// Re-export primary types
pub use endpoints::endpoints_only;
pub use ipc::IpcError;

/// Device key carrying the UDP listen port.
pub const KEY_LISTEN_PORT: &str = "listen_port";
/// Key opening a peer block.
pub const KEY_PUBLIC_KEY: &str = "public_key";
/// Peer key carrying the `host:port` endpoint.
pub const KEY_ENDPOINT: &str = "endpoint";
/// Peer key requesting removal of the peer.
pub const KEY_REMOVE: &str = "remove";
