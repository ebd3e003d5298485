// ============================================
// File: crates/wgbridge-core/src/types.rs
// ============================================
//! # Core Type Definitions
//!
//! ## Creation Reason
//! Centralizes the small value types that cross the C ABI, so every crate
//! agrees on their representation.
//!
//! ## Main Functionality
//! - `TunnelHandle`: Small integer naming one live tunnel
//! - `LogLevel`: Severity levels shared with the host logger
//!
//! ## ⚠️ Important Note for Next Developer
//! - Both types are `#[repr(transparent)]`/`#[repr(i32)]` friendly; the raw
//!   integer values are part of the host contract and must not change
//! - Handles are never negative; `-1` is the failure sentinel at the ABI
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

use std::fmt;

// ============================================
// TunnelHandle
// ============================================

/// Identifies one live tunnel to the host.
///
/// # Allocation
/// Handles are allocated lowest-free-first by the registry, starting at 0.
/// A value is never shared by two live tunnels but may be reused once its
/// tunnel is destroyed.
///
/// # Example
/// ```
/// use wgbridge_core::TunnelHandle;
///
/// let handle = TunnelHandle::from_raw(3).unwrap();
/// assert_eq!(handle.as_raw(), 3);
/// assert!(TunnelHandle::from_raw(-1).is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct TunnelHandle(i32);

impl TunnelHandle {
    /// The first handle ever allocated.
    pub const FIRST: Self = Self(0);

    /// Total number of distinct handle values (`0..i32::MAX`).
    pub const CAPACITY: usize = i32::MAX as usize;

    /// Wraps a raw handle, rejecting negative values.
    #[must_use]
    pub const fn from_raw(raw: i32) -> Option<Self> {
        if raw < 0 {
            None
        } else {
            Some(Self(raw))
        }
    }

    /// Returns the raw integer passed across the C ABI.
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self.0
    }

    /// Returns the next handle value, or `None` at the top of the range.
    #[must_use]
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).filter(|&v| v < i32::MAX).map(Self)
    }
}

impl fmt::Display for TunnelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<TunnelHandle> for i32 {
    fn from(handle: TunnelHandle) -> Self {
        handle.0
    }
}

// ============================================
// LogLevel
// ============================================

/// Log severity as seen by the host callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i32)]
pub enum LogLevel {
    /// Verbose diagnostics and stack traces.
    Debug = 0,
    /// Lifecycle events.
    Info = 1,
    /// Failures.
    Error = 2,
}

impl LogLevel {
    /// Converts a raw host level, defaulting unknown values to `Debug`.
    #[must_use]
    pub const fn from_raw(raw: i32) -> Self {
        match raw {
            1 => Self::Info,
            2 => Self::Error,
            _ => Self::Debug,
        }
    }

    /// Returns the raw integer passed to the host.
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Error => write!(f, "error"),
        }
    }
}

// ============================================
// Tests
// ============================================
