// ============================================
// File: crates/wgbridge-transport/src/error.rs
// ============================================
//! # Transport Error Types
//!
//! ## Creation Reason
//! One error type for everything below the engine: building a packet
//! device, moving packets through it, and listening on the route socket.
//!
//! ## Error Categories
//! 1. **Device**: setup, descriptor duplication, name lookup, read/write
//! 2. **Host callbacks**: a negative return from the host read/write hooks
//! 3. **Route socket**: open and receive failures
//! 4. **Limits and configuration**
//!
//! ## ⚠️ Important Note for Next Developer
//! - `HostCallback` keeps the errno the host returned; the engine decides
//!   whether it is fatal
//! - `Closed` is the normal result of teardown, log it at debug at most
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use std::io;

use thiserror::Error;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Errors raised by packet devices and the route monitor.
#[derive(Error, Debug)]
pub enum TransportError {
    // ========================================
    // Device
    // ========================================

    /// The device could not be set up.
    #[error("Cannot set up packet device {name}: {reason}")]
    DeviceSetup {
        /// Interface name, requested or resolved
        name: String,
        /// What went wrong
        reason: String,
    },

    /// `dup` on the host descriptor failed.
    #[error("Cannot duplicate host descriptor {fd}: {source}")]
    Dup {
        /// Descriptor handed over by the host
        fd: i32,
        /// OS error
        #[source]
        source: io::Error,
    },

    /// The descriptor is not a named tunnel interface.
    #[error("Cannot read interface name from descriptor: {source}")]
    InterfaceName {
        /// OS error
        #[source]
        source: io::Error,
    },

    /// Reading a packet from the device failed.
    #[error("Packet read failed: {source}")]
    Read {
        /// OS error
        #[source]
        source: io::Error,
    },

    /// Writing a packet to the device failed.
    #[error("Packet write failed: {source}")]
    Write {
        /// OS error
        #[source]
        source: io::Error,
    },

    /// The device was closed.
    #[error("Packet device closed")]
    Closed,

    // ========================================
    // Host callbacks
    // ========================================

    /// A host callback returned a negative errno.
    #[error("Host {operation} callback returned {source}")]
    HostCallback {
        /// `"read"` or `"write"`
        operation: &'static str,
        /// Error built from the errno
        #[source]
        source: io::Error,
    },

    // ========================================
    // Route socket
    // ========================================

    /// The route socket could not be opened or read.
    #[error("Route socket {operation} failed: {source}")]
    RouteSocket {
        /// Step that failed
        operation: &'static str,
        /// OS error
        #[source]
        source: io::Error,
    },

    /// No route socket exists on this platform.
    #[error("Route monitoring unavailable on this platform")]
    Unsupported,

    // ========================================
    // Limits and configuration
    // ========================================

    /// A bounded queue is full.
    #[error("{queue} queue is full")]
    QueueFull {
        /// Which queue
        queue: String,
    },

    /// A device setting is out of range.
    #[error("Bad {field}: {reason}")]
    InvalidConfig {
        /// Setting name
        field: String,
        /// Constraint that was violated
        reason: String,
    },

    /// Any other OS failure.
    #[error("OS error: {0}")]
    Os(#[from] io::Error),
}

impl TransportError {
    /// Builds a `DeviceSetup` error.
    pub fn device_setup(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DeviceSetup {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Builds a `HostCallback` error from the errno a host hook returned.
    #[must_use]
    pub fn host_callback(operation: &'static str, errno: i32) -> Self {
        Self::HostCallback {
            operation,
            source: io::Error::from_raw_os_error(errno),
        }
    }

    /// Builds an `InvalidConfig` error.
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether the device was closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// The wrapped `io::Error`, if any.
    #[must_use]
    pub fn io_source(&self) -> Option<&io::Error> {
        match self {
            Self::Dup { source, .. }
            | Self::InterfaceName { source }
            | Self::Read { source }
            | Self::Write { source }
            | Self::HostCallback { source, .. }
            | Self::RouteSocket { source, .. }
            | Self::Os(source) => Some(source),
            _ => None,
        }
    }

    /// The errno carried by this error, if any.
    #[must_use]
    pub fn os_code(&self) -> Option<i32> {
        self.io_source().and_then(io::Error::raw_os_error)
    }
}

// ============================================
// Tests
// ============================================
