// ============================================
// File: crates/wgbridge-runtime/src/engine/mod.rs
// ============================================
//! # Tunnel Engine Seam
//!
//! ## Creation Reason
//! The handshake and packet-encryption engine lives outside this
//! workspace. The registry talks to it only through these traits, so
//! embedders can plug in their engine and tests can use `MemoryEngine`.
//!
//! ## Main Functionality
//! - `TunnelEngine`: Builds a device from a packet source and a logger
//! - `TunnelDevice`: One running tunnel (configure, up, rebind, close)
//! - `DeviceLogger`: Sink the engine writes its own log lines to
//!
//! ## Call Sequence
//! ```text
//! create_device(tun, logger)
//!        │
//!        ▼
//! ipc_set(initial) ─► set_roaming(default) ─► up()
//!        │
//!        ▼
//! ipc_set / ipc_get / bind_update / ... (any thread)
//!        │
//!        ▼
//! close()
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - All methods are synchronous and may block briefly; the registry never
//!   calls them while holding its lock
//! - `close()` must be idempotent and must close the packet device
//!
//! ## Last Modified
//! v0.1.0 - Initial engine seam

use std::fmt;
use std::io;
use std::sync::Arc;

use wgbridge_core::{IpcError, LogLevel};
use wgbridge_transport::TunDevice;

use crate::error::Result;

#[cfg(any(test, feature = "mock"))]
mod fragment;
#[cfg(any(test, feature = "mock"))]
pub mod memory;

#[cfg(any(test, feature = "mock"))]
pub use memory::{MemoryDevice, MemoryEngine};

/// Address family of a tunnel's outer UDP socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    /// IPv4 socket.
    V4,
    /// IPv6 socket.
    V6,
}

impl AddressFamily {
    /// Both families, IPv4 first.
    pub const ALL: [Self; 2] = [Self::V4, Self::V6];
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4 => write!(f, "v4"),
            Self::V6 => write!(f, "v6"),
        }
    }
}

/// Receives the engine's own log output.
pub trait DeviceLogger: Send + Sync {
    /// Writes one line at `level`.
    fn log(&self, level: LogLevel, message: &str);
}

/// A running tunnel device.
pub trait TunnelDevice: Send + Sync {
    /// Applies a configuration fragment.
    ///
    /// # Errors
    /// Returns the engine's numeric error for rejected input.
    fn ipc_set(&self, config: &str) -> std::result::Result<(), IpcError>;

    /// Serializes the full current configuration.
    ///
    /// # Errors
    /// Returns the engine's numeric error if the state cannot be read.
    fn ipc_get(&self) -> std::result::Result<String, IpcError>;

    /// Starts processing packets.
    ///
    /// # Errors
    /// Returns an I/O error if the outer socket cannot be opened.
    fn up(&self) -> io::Result<()>;

    /// Stops the device and closes its packet source.
    fn close(&self);

    /// Re-opens the outer UDP sockets after a network change.
    ///
    /// # Errors
    /// Returns an I/O error if binding fails; the caller may retry.
    fn bind_update(&self) -> io::Result<()>;

    /// Sends a keepalive to every peer that holds a current session key.
    fn send_keepalives_to_peers_with_current_keypair(&self);

    /// Allows or forbids endpoint roaming on incoming packets.
    fn set_roaming(&self, enabled: bool);

    /// Scopes the outer socket of `family` to interface index `scope`.
    ///
    /// # Errors
    /// Returns the socket option failure.
    fn bind_socket_to_interface(&self, family: AddressFamily, scope: u32) -> io::Result<()>;
}

/// Factory for tunnel devices.
pub trait TunnelEngine: Send + Sync {
    /// Builds a device reading from and writing to `tun`.
    ///
    /// # Errors
    /// Returns `DeviceCreation` if the engine cannot start a device.
    fn create_device(
        &self,
        tun: Box<dyn TunDevice>,
        logger: Arc<dyn DeviceLogger>,
    ) -> Result<Arc<dyn TunnelDevice>>;
}
