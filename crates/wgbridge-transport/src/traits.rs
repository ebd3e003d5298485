// ============================================
// File: crates/wgbridge-transport/src/traits.rs
// ============================================
//! # Packet Device Interface
//!
//! ## Creation Reason
//! The engine reads and writes raw IP packets without caring whether
//! they come from a kernel descriptor or from host callbacks.
//!
//! ## Contents
//! - `TunDevice`: one packet per call, plus name, MTU, link events, close
//! - `TunEvent`: link notifications
//! - `TunConfig`: name and MTU for adapters with no kernel to ask
//!
//! ## ⚠️ Important Note for Next Developer
//! - `close()` is idempotent and wakes blocked readers; later I/O
//!   returns `Closed`
//! - `take_events()` yields the receiver once
//! - The caller owns every buffer
//!
//! ## Last Modified
//! v0.1.0 - Initial trait definitions

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Result, TransportError};

/// MTU used when the host does not supply one.
pub const DEFAULT_MTU: u16 = 1280;

/// Smallest MTU accepted for a packet device.
pub const MIN_MTU: u16 = 576;

/// Interface names are bounded by `IFNAMSIZ - 1`.
pub const MAX_NAME_LEN: usize = 15;

// ============================================
// TunEvent
// ============================================

/// Link state notifications emitted by a packet device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunEvent {
    /// The interface is up.
    Up,
    /// The interface went down or was removed.
    Down,
    /// The interface MTU changed.
    MtuUpdate(u16),
}

// ============================================
// TunDevice Trait
// ============================================

/// A source and sink of layer-3 packets. There is no link-layer header.
///
/// ```ignore
/// let mut buf = vec![0u8; usize::from(tun.mtu())];
/// while let Ok(n) = tun.read(&mut buf).await {
///     engine.outbound(&buf[..n]);
/// }
/// ```
#[async_trait]
pub trait TunDevice: Send + Sync + fmt::Debug {
    /// Waits for the next packet and copies it into `buf`, truncating if
    /// `buf` is short. Returns the copied length.
    ///
    /// # Errors
    /// - `Closed` after `close()`
    /// - `Read` / `HostCallback` on I/O failure
    async fn read(&self, buf: &mut [u8]) -> Result<usize>;

    /// Delivers one packet to the host side. Returns the length accepted.
    ///
    /// # Errors
    /// - `Closed` after `close()`
    /// - `Write` / `HostCallback` on I/O failure
    async fn write(&self, buf: &[u8]) -> Result<usize>;

    /// Interface name, e.g. `utun3`.
    fn name(&self) -> &str;

    /// Current MTU.
    fn mtu(&self) -> u16;

    /// Takes the link event receiver. Returns `None` on every call after
    /// the first.
    fn take_events(&self) -> Option<mpsc::Receiver<TunEvent>>;

    /// Stops all I/O on the device. Calling it again has no effect.
    fn close(&self);

    /// Returns `true` once `close()` has been called.
    fn is_closed(&self) -> bool;
}

// ============================================
// TunConfig
// ============================================

/// Name and MTU for adapters that cannot query them from the kernel.
///
/// # Example
/// ```
/// use wgbridge_transport::traits::TunConfig;
///
/// let config = TunConfig::new("utun4").with_mtu(1420);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunConfig {
    /// Interface name reported to the engine.
    pub name: String,
    /// Largest packet the device carries.
    pub mtu: u16,
}

impl TunConfig {
    /// Creates a configuration with the default MTU.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mtu: DEFAULT_MTU,
        }
    }

    /// Overrides the MTU.
    #[must_use]
    pub const fn with_mtu(mut self, mtu: u16) -> Self {
        self.mtu = mtu;
        self
    }

    /// Checks name length and MTU floor.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if the name is empty or too long, or the
    /// MTU is below the IPv4 minimum.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(TransportError::invalid_config(
                "name",
                "must not be empty",
            ));
        }

        if self.name.len() > MAX_NAME_LEN {
            return Err(TransportError::invalid_config(
                "name",
                format!("device name cannot exceed {MAX_NAME_LEN} characters"),
            ));
        }

        if self.mtu < MIN_MTU {
            return Err(TransportError::invalid_config(
                "mtu",
                format!("MTU must be at least {MIN_MTU} bytes"),
            ));
        }

        Ok(())
    }
}

impl Default for TunConfig {
    fn default() -> Self {
        Self::new("utun")
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_uses_default_mtu() {
        let config = TunConfig::new("utun0");
        assert_eq!((config.name.as_str(), config.mtu), ("utun0", DEFAULT_MTU));
        assert_eq!(TunConfig::default().name, "utun");
    }

    #[test]
    fn test_name_bounds() {
        assert!(TunConfig::new("").validate().is_err());
        assert!(TunConfig::new("u".repeat(MAX_NAME_LEN)).validate().is_ok());
        assert!(TunConfig::new("u".repeat(MAX_NAME_LEN + 1)).validate().is_err());
    }

    #[test]
    fn test_mtu_floor() {
        assert!(TunConfig::new("utun0").with_mtu(MIN_MTU - 1).validate().is_err());
        assert!(TunConfig::new("utun0").with_mtu(MIN_MTU).validate().is_ok());
    }
}
