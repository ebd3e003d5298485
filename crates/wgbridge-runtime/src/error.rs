// ============================================
// File: crates/wgbridge-runtime/src/error.rs
// ============================================
//! # Runtime Error Types
//!
//! ## Creation Reason
//! One error type for everything the registry, reactor and bridge can
//! report, with a mapping to the numeric status codes of the C ABI.
//!
//! ## Error Categories
//! 1. **Registry Errors**: Unknown handle, exhausted handles, device setup
//! 2. **Protocol Errors**: Engine rejected a configuration transaction
//! 3. **Configuration Errors**: `RuntimeConfig` load/parse/validation
//! 4. **Bridge Errors**: Process-wide bridge not installed or not startable
//!
//! ## FFI Status Mapping
//! ```text
//! Ok                   →  0
//! UnknownHandle        →  1
//! Protocol(IpcError)   →  IpcError::code() (negative errno)
//! anything else        → -1
//! ```
//!
//! ## Last Modified
//! v0.1.0 - Initial error definitions

use thiserror::Error;

use wgbridge_core::{IpcError, TunnelHandle};
use wgbridge_transport::TransportError;

/// Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Status returned across the C ABI when a handle is not registered.
pub const STATUS_UNKNOWN_HANDLE: i64 = 1;

/// Status returned across the C ABI for failures without an engine code.
pub const STATUS_FAILURE: i64 = -1;

/// Runtime error types.
#[derive(Error, Debug)]
pub enum RuntimeError {
    // ========================================
    // Registry Errors
    // ========================================

    /// No live tunnel has this handle.
    #[error("Unknown tunnel handle {handle}")]
    UnknownHandle {
        /// The handle that was looked up
        handle: TunnelHandle,
    },

    /// Every handle value is in use.
    #[error("Tunnel handles exhausted: max {limit} tunnels")]
    HandlesExhausted {
        /// Configured ceiling
        limit: usize,
    },

    /// The packet device for a tunnel could not be built.
    #[error("Failed to open packet device for '{name}': {source}")]
    PacketDevice {
        /// Interface name requested by the host
        name: String,
        /// Adapter failure
        #[source]
        source: TransportError,
    },

    /// The engine could not create or start a device.
    #[error("Failed to create tunnel device '{name}': {reason}")]
    DeviceCreation {
        /// Interface name
        name: String,
        /// Why creation failed
        reason: String,
    },

    // ========================================
    // Protocol Errors
    // ========================================

    /// The engine rejected a configuration transaction.
    #[error("Configuration rejected: {0}")]
    Protocol(#[from] IpcError),

    // ========================================
    // Configuration Errors
    // ========================================

    #[error("Failed to load configuration from '{path}': {reason}")]
    ConfigLoad { path: String, reason: String },

    #[error("Invalid configuration: {field} - {reason}")]
    ConfigInvalid { field: String, reason: String },

    // ========================================
    // Bridge Errors
    // ========================================

    /// No bridge has been installed in this process.
    #[error("Bridge is not installed")]
    BridgeNotInstalled,

    /// A bridge is already installed in this process.
    #[error("Bridge is already installed")]
    BridgeAlreadyInstalled,

    /// The async runtime could not be started.
    #[error("Failed to start runtime: {0}")]
    RuntimeStart(#[source] std::io::Error),

}

impl RuntimeError {
    /// Creates an `UnknownHandle` error.
    #[must_use]
    pub const fn unknown_handle(handle: TunnelHandle) -> Self {
        Self::UnknownHandle { handle }
    }

    /// Creates a `PacketDevice` error.
    pub fn packet_device(name: impl Into<String>, source: TransportError) -> Self {
        Self::PacketDevice {
            name: name.into(),
            source,
        }
    }

    /// Creates a `DeviceCreation` error.
    pub fn device_creation(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DeviceCreation {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `ConfigLoad` error.
    pub fn config_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a `ConfigInvalid` error.
    pub fn config_invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    // ========================================
    // Error Classification
    // ========================================

    /// Returns `true` if the handle was not registered.
    #[must_use]
    pub const fn is_unknown_handle(&self) -> bool {
        matches!(self, Self::UnknownHandle { .. })
    }

    /// Returns the status code reported across the C ABI.
    #[must_use]
    pub fn ffi_status(&self) -> i64 {
        match self {
            Self::UnknownHandle { .. } => STATUS_UNKNOWN_HANDLE,
            Self::Protocol(e) => e.code(),
            _ => STATUS_FAILURE,
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RuntimeError::config_load("/etc/wgbridge.toml", "file not found");
        assert!(err.to_string().contains("/etc/wgbridge.toml"));

        let handle = TunnelHandle::from_raw(4).unwrap();
        assert!(RuntimeError::unknown_handle(handle).to_string().contains('4'));
    }

    #[test]
    fn test_ffi_status_mapping() {
        let handle = TunnelHandle::FIRST;
        assert_eq!(RuntimeError::unknown_handle(handle).ffi_status(), 1);
        assert_eq!(
            RuntimeError::from(IpcError::protocol("bad key")).ffi_status(),
            IpcError::PROTOCOL
        );
        assert_eq!(RuntimeError::BridgeNotInstalled.ffi_status(), -1);
        assert_eq!(
            RuntimeError::packet_device("utun1", TransportError::Closed).ffi_status(),
            STATUS_FAILURE
        );
    }

    #[test]
    fn test_packet_device_keeps_transport_source() {
        use std::error::Error as _;

        let err = RuntimeError::packet_device("utun1", TransportError::host_callback("read", 5));
        assert!(!err.is_unknown_handle());
        let source = err.source().and_then(|s| s.downcast_ref::<TransportError>());
        assert_eq!(source.and_then(TransportError::os_code), Some(5));
    }
}
