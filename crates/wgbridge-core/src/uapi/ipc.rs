// ============================================
// File: crates/wgbridge-core/src/uapi/ipc.rs
// ============================================
//! # Configuration Transaction Errors
//!
//! Errors surfaced by the tunnel engine when a `set` or `get` transaction
//! fails. Codes follow the UAPI convention of a negated errno, so hosts can
//! tell "malformed input" from "port in use" without parsing messages.

use thiserror::Error;

/// A failed configuration transaction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("IPC error {code}: {message}")]
pub struct IpcError {
    code: i64,
    message: String,
}

#[cfg(any(target_os = "macos", target_os = "ios", target_os = "freebsd", target_os = "openbsd"))]
mod errno {
    pub const EPROTO: i64 = 100;
    pub const EADDRINUSE: i64 = 48;
}

#[cfg(not(any(target_os = "macos", target_os = "ios", target_os = "freebsd", target_os = "openbsd")))]
mod errno {
    pub const EPROTO: i64 = 71;
    pub const EADDRINUSE: i64 = 98;
}

impl IpcError {
    /// Generic I/O failure (`-EIO`).
    pub const IO: i64 = -5;
    /// Malformed input (`-EINVAL`).
    pub const INVALID: i64 = -22;
    /// Semantically invalid request, e.g. unknown key (`-EPROTO`).
    pub const PROTOCOL: i64 = -errno::EPROTO;
    /// Listen port already bound (`-EADDRINUSE`).
    pub const PORT_IN_USE: i64 = -errno::EADDRINUSE;

    /// Creates an error with an explicit code.
    ///
    /// Positive codes are negated so the value is always `< 0`.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code: if code > 0 { -code } else { code },
            message: message.into(),
        }
    }

    /// Creates a `-EINVAL` error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(Self::INVALID, message)
    }

    /// Creates a `-EPROTO` error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(Self::PROTOCOL, message)
    }

    /// Creates a `-EIO` error.
    pub fn io(message: impl Into<String>) -> Self {
        Self::new(Self::IO, message)
    }

    /// Creates a `-EADDRINUSE` error.
    pub fn port_in_use(message: impl Into<String>) -> Self {
        Self::new(Self::PORT_IN_USE, message)
    }

    /// Returns the negative numeric code.
    #[must_use]
    pub const fn code(&self) -> i64 {
        self.code
    }

    /// Returns the human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}
