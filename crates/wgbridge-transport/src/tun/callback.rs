// ============================================
// File: crates/wgbridge-transport/src/tun/callback.rs
// ============================================
//! # Callback-Backed Packet Device
//!
//! ## Creation Reason
//! Some hosts never expose a TUN descriptor; packets flow through their
//! own packet-flow APIs instead. They hand us two synchronous function
//! pointers plus an opaque context, and this adapter presents them as a
//! `TunDevice`.
//!
//! ## Host Contract
//! ```text
//! read_fn(ctx, buf, len)  -> n >= 0 bytes read,    or -errno
//! write_fn(ctx, buf, len) -> n >= 0 bytes written, or -errno
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Host functions are called on the task that calls `read`/`write` and
//!   may block it; engines should drive them from dedicated tasks
//! - The context pointer is owned by the host and must outlive the tunnel
//! - After `close()` the host functions are never called again
//! - There is no route visibility: the only link event is the initial `Up`
//!
//! ## Last Modified
//! v0.1.0 - Initial callback adapter

use std::ffi::c_void;
use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::traits::{TunConfig, TunDevice, TunEvent};
use crate::tun::{CloseSignal, EventChannel};

/// `EIO`, used when the host returns an errno we cannot represent.
const EIO: i32 = 5;

/// Host read function: fills `buf` with one packet.
pub type ReadFn = unsafe extern "C" fn(ctx: *mut c_void, buf: *mut u8, len: usize) -> isize;

/// Host write function: consumes one packet from `buf`.
pub type WriteFn = unsafe extern "C" fn(ctx: *mut c_void, buf: *const u8, len: usize) -> isize;

// ============================================
// HostContext
// ============================================

/// Opaque host pointer passed back to every callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostContext(*mut c_void);

// SAFETY: the pointer is never dereferenced on the Rust side. The host
// guarantees its callbacks may be invoked from any thread with this value.
unsafe impl Send for HostContext {}
// SAFETY: see above; shared access only ever copies the pointer.
unsafe impl Sync for HostContext {}

impl HostContext {
    /// Wraps a host pointer.
    #[must_use]
    pub const fn new(ptr: *mut c_void) -> Self {
        Self(ptr)
    }

    /// Returns the raw pointer.
    #[must_use]
    pub const fn as_ptr(self) -> *mut c_void {
        self.0
    }
}

// ============================================
// CallbackTun
// ============================================

/// Packet device backed by host function pointers.
pub struct CallbackTun {
    config: TunConfig,
    read_fn: ReadFn,
    write_fn: WriteFn,
    ctx: HostContext,
    events: EventChannel,
    closed: CloseSignal,
}

impl CallbackTun {
    /// Wraps host callbacks as a packet device.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `config` does not validate.
    ///
    /// # Safety Contract
    /// `read_fn` and `write_fn` must be safe to call with `ctx` and a
    /// valid buffer for as long as this device is alive.
    pub fn new(
        config: TunConfig,
        read_fn: ReadFn,
        write_fn: WriteFn,
        ctx: HostContext,
    ) -> Result<Self> {
        config.validate()?;

        info!(name = %config.name, mtu = config.mtu, "Created callback TUN device");

        Ok(Self {
            config,
            read_fn,
            write_fn,
            ctx,
            events: EventChannel::new_up(),
            closed: CloseSignal::new(),
        })
    }
}

/// Maps a host return value to a byte count or a host callback error.
fn host_result(operation: &'static str, ret: isize) -> Result<usize> {
    match usize::try_from(ret) {
        Ok(n) => Ok(n),
        Err(_) => {
            let errno = ret
                .checked_neg()
                .and_then(|v| i32::try_from(v).ok())
                .unwrap_or(EIO);
            Err(TransportError::host_callback(operation, errno))
        }
    }
}

#[async_trait]
impl TunDevice for CallbackTun {
    async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        if self.closed.is_closed() {
            return Err(TransportError::Closed);
        }
        // SAFETY: `buf` is valid for `buf.len()` writable bytes; the host
        // upholds the contract documented on `CallbackTun::new`.
        let ret = unsafe { (self.read_fn)(self.ctx.as_ptr(), buf.as_mut_ptr(), buf.len()) };
        host_result("read", ret)
    }

    async fn write(&self, buf: &[u8]) -> Result<usize> {
        if self.closed.is_closed() {
            return Err(TransportError::Closed);
        }
        // SAFETY: `buf` is valid for `buf.len()` readable bytes.
        let ret = unsafe { (self.write_fn)(self.ctx.as_ptr(), buf.as_ptr(), buf.len()) };
        host_result("write", ret)
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn mtu(&self) -> u16 {
        self.config.mtu
    }

    fn take_events(&self) -> Option<mpsc::Receiver<TunEvent>> {
        self.events.take()
    }

    fn close(&self) {
        if self.closed.close() {
            self.events.close();
            debug!(name = %self.config.name, "Closed callback TUN device");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }
}

impl fmt::Debug for CallbackTun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackTun")
            .field("name", &self.config.name)
            .field("mtu", &self.config.mtu)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    #[derive(Default)]
    struct Host {
        inbound: Mutex<VecDeque<Vec<u8>>>,
        outbound: Mutex<Vec<Vec<u8>>>,
        calls: AtomicUsize,
    }

    unsafe extern "C" fn host_read(ctx: *mut c_void, buf: *mut u8, len: usize) -> isize {
        let host = unsafe { &*(ctx as *const Host) };
        host.calls.fetch_add(1, Ordering::SeqCst);
        match host.inbound.lock().pop_front() {
            Some(packet) => {
                let n = packet.len().min(len);
                unsafe { std::ptr::copy_nonoverlapping(packet.as_ptr(), buf, n) };
                n as isize
            }
            None => -11, // EAGAIN
        }
    }

    unsafe extern "C" fn host_write(ctx: *mut c_void, buf: *const u8, len: usize) -> isize {
        let host = unsafe { &*(ctx as *const Host) };
        host.calls.fetch_add(1, Ordering::SeqCst);
        let packet = unsafe { std::slice::from_raw_parts(buf, len) }.to_vec();
        host.outbound.lock().push(packet);
        len as isize
    }

    unsafe extern "C" fn host_fail(_ctx: *mut c_void, _buf: *const u8, _len: usize) -> isize {
        -5
    }

    fn tun_for(host: &Host, write_fn: WriteFn) -> CallbackTun {
        let ctx = HostContext::new(host as *const Host as *mut c_void);
        CallbackTun::new(TunConfig::new("utun7"), host_read, write_fn, ctx).unwrap()
    }

    #[tokio::test]
    async fn test_read_write_through_host() {
        let host = Host::default();
        host.inbound.lock().push_back(b"ping".to_vec());
        let tun = tun_for(&host, host_write);

        let mut buf = [0u8; 64];
        let n = tun.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");

        assert_eq!(tun.write(b"pong").await.unwrap(), 4);
        assert_eq!(host.outbound.lock().as_slice(), &[b"pong".to_vec()]);
        assert_eq!(tun.name(), "utun7");
        assert_eq!(tun.mtu(), 1280);
    }

    #[tokio::test]
    async fn test_negative_return_maps_to_errno() {
        let host = Host::default();
        let tun = tun_for(&host, host_fail);

        let err = tun.write(b"x").await.unwrap_err();
        assert!(matches!(err, TransportError::HostCallback { operation: "write", .. }));
        assert_eq!(err.os_code(), Some(5));

        let mut buf = [0u8; 8];
        let err = tun.read(&mut buf).await.unwrap_err();
        assert_eq!(err.os_code(), Some(11));
    }

    #[tokio::test]
    async fn test_emits_up_once() {
        let host = Host::default();
        let tun = tun_for(&host, host_write);

        let mut events = tun.take_events().unwrap();
        assert!(tun.take_events().is_none());
        assert_eq!(events.recv().await, Some(TunEvent::Up));

        tun.close();
        assert_eq!(events.recv().await, None);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_stops_host_calls() {
        let host = Host::default();
        let tun = tun_for(&host, host_write);

        tun.close();
        tun.close();
        assert!(tun.is_closed());

        let mut buf = [0u8; 8];
        assert!(tun.read(&mut buf).await.unwrap_err().is_closed());
        assert!(tun.write(b"x").await.unwrap_err().is_closed());
        assert_eq!(host.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let host = Host::default();
        let ctx = HostContext::new(&host as *const Host as *mut c_void);
        let result = CallbackTun::new(TunConfig::new(""), host_read, host_write, ctx);
        assert!(result.is_err());
    }
}
