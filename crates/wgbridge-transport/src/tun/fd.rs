// ============================================
// File: crates/wgbridge-transport/src/tun/fd.rs
// ============================================
//! # Descriptor-Backed Packet Device
//!
//! ## Creation Reason
//! Hosts that own a kernel TUN interface (Linux `/dev/net/tun`, Apple
//! `utun`) pass its descriptor across the C ABI. This adapter takes a
//! private duplicate of that descriptor and drives it with tokio.
//!
//! ## Construction Steps
//! 1. `dup()` the host descriptor (the host keeps its own)
//! 2. Force `O_NONBLOCK`
//! 3. Resolve the interface name
//!    - Linux: `TUNGETIFF` ioctl
//!    - Apple: `getsockopt(SYSPROTO_CONTROL, UTUN_OPT_IFNAME)`
//! 4. Register with the tokio reactor (`AsyncFd`)
//! 5. Queue `TunEvent::Up`; on Linux, start a link watcher
//!
//! ## Apple Packet Framing
//! `utun` prefixes every packet with a 4-byte address family in network
//! byte order. Reads strip it and writes add it, so the engine always
//! sees bare IP packets.
//!
//! ## ⚠️ Important Note for Next Developer
//! - Construction must run inside a tokio runtime
//! - `close()` releases the duplicate descriptor; an in-flight read or
//!   write is cancelled first, so the descriptor is gone once it returns
//!
//! ## Last Modified
//! v0.1.0 - Initial descriptor adapter

use std::fmt;
use std::fs::File;
use std::io;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::sync::Arc;

use async_trait::async_trait;
use nix::libc;
use parking_lot::Mutex;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::sys;
use crate::traits::{TunDevice, TunEvent};
use crate::tun::{CloseSignal, EventChannel};

// ============================================
// FdTun
// ============================================

/// Packet device backed by a kernel TUN descriptor.
///
/// # Example
/// ```ignore
/// use wgbridge_transport::tun::FdTun;
///
/// let tun = FdTun::from_raw_fd(host_fd, 1280)?;
/// let mut buf = [0u8; 1500];
/// let len = tun.read(&mut buf).await?;
/// ```
pub struct FdTun {
    // Emptied by `close()`.
    io: Mutex<Option<Arc<AsyncFd<File>>>>,
    name: String,
    mtu: u16,
    events: EventChannel,
    closed: CloseSignal,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl FdTun {
    /// Wraps a duplicate of the host descriptor `fd`.
    ///
    /// # Errors
    /// - `DeviceSetup` outside a tokio runtime or if the descriptor
    ///   cannot be made non-blocking
    /// - `Dup` if the descriptor cannot be duplicated
    /// - `InterfaceName` if it is not a TUN interface
    pub fn from_raw_fd(fd: RawFd, mtu: u16) -> Result<Self> {
        let file = duplicate(fd)?;
        let name = interface_name(file.as_raw_fd())
            .map_err(|source| TransportError::InterfaceName { source })?;
        Self::from_file(file, name, mtu)
    }

    /// Wraps a duplicate of `fd` under a caller-supplied name, skipping
    /// the kernel name lookup.
    ///
    /// # Errors
    /// Same as [`FdTun::from_raw_fd`], minus `InterfaceName`.
    pub fn with_name(fd: RawFd, name: impl Into<String>, mtu: u16) -> Result<Self> {
        Self::from_file(duplicate(fd)?, name.into(), mtu)
    }

    fn from_file(file: File, name: String, mtu: u16) -> Result<Self> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(TransportError::device_setup(
                &name,
                "must be created inside a tokio runtime",
            ));
        }

        sys::set_nonblocking(file.as_raw_fd()).map_err(|e| {
            TransportError::device_setup(&name, format!("Failed to set non-blocking mode: {e}"))
        })?;

        let async_fd = AsyncFd::new(file).map_err(|e| {
            TransportError::device_setup(&name, format!("AsyncFd creation failed: {e}"))
        })?;

        let events = EventChannel::new_up();
        let watcher = spawn_link_watcher(&name, mtu, &events);

        info!(name = %name, mtu, "Created descriptor TUN device");

        Ok(Self {
            io: Mutex::new(Some(Arc::new(async_fd))),
            name,
            mtu,
            events,
            closed: CloseSignal::new(),
            watcher: Mutex::new(watcher),
        })
    }

    fn io(&self) -> Result<Arc<AsyncFd<File>>> {
        self.io.lock().clone().ok_or(TransportError::Closed)
    }

    async fn read_ready(async_fd: &AsyncFd<File>, buf: &mut [u8]) -> Result<usize> {
        loop {
            let mut guard = async_fd
                .ready(Interest::READABLE)
                .await
                .map_err(|source| TransportError::Read { source })?;

            match guard.try_io(|inner| read_packet(inner.get_ref().as_raw_fd(), buf)) {
                Ok(Ok(len)) => return Ok(len),
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(Err(source)) => return Err(TransportError::Read { source }),
                Err(_would_block) => continue,
            }
        }
    }

    async fn write_ready(async_fd: &AsyncFd<File>, buf: &[u8]) -> Result<usize> {
        loop {
            let mut guard = async_fd
                .ready(Interest::WRITABLE)
                .await
                .map_err(|source| TransportError::Write { source })?;

            match guard.try_io(|inner| write_packet(inner.get_ref().as_raw_fd(), buf)) {
                Ok(Ok(len)) => return Ok(len),
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => continue,
                Ok(Err(source)) => return Err(TransportError::Write { source }),
                Err(_would_block) => continue,
            }
        }
    }
}

fn duplicate(fd: RawFd) -> Result<File> {
    let new_fd = sys::dup(fd).map_err(|source| TransportError::Dup { fd, source })?;
    // SAFETY: `new_fd` was just returned by dup() and is owned by nobody else.
    Ok(unsafe { File::from_raw_fd(new_fd) })
}

#[async_trait]
impl TunDevice for FdTun {
    async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let io = self.io()?;
        tokio::select! {
            biased;
            () = self.closed.closed() => Err(TransportError::Closed),
            result = Self::read_ready(&io, buf) => result,
        }
    }

    async fn write(&self, buf: &[u8]) -> Result<usize> {
        let io = self.io()?;
        tokio::select! {
            biased;
            () = self.closed.closed() => Err(TransportError::Closed),
            result = Self::write_ready(&io, buf) => result,
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn mtu(&self) -> u16 {
        self.mtu
    }

    fn take_events(&self) -> Option<mpsc::Receiver<TunEvent>> {
        self.events.take()
    }

    fn close(&self) {
        if self.closed.close() {
            if let Some(watcher) = self.watcher.lock().take() {
                watcher.abort();
            }
            self.events.close();
            // Pending I/O holds a clone until the close signal cancels it.
            drop(self.io.lock().take());
            debug!(name = %self.name, "Closed descriptor TUN device");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }
}

impl Drop for FdTun {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.get_mut().take() {
            watcher.abort();
        }
    }
}

impl fmt::Debug for FdTun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FdTun")
            .field("fd", &self.io.lock().as_ref().map(|io| io.get_ref().as_raw_fd()))
            .field("name", &self.name)
            .field("mtu", &self.mtu)
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================
// Packet I/O
// ============================================

#[cfg(not(any(target_os = "macos", target_os = "ios")))]
fn read_packet(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: `buf` is valid for `buf.len()` writable bytes.
    sys::cvt(unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) })
}

#[cfg(not(any(target_os = "macos", target_os = "ios")))]
fn write_packet(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    // SAFETY: `buf` is valid for `buf.len()` readable bytes.
    sys::cvt(unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) })
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
const UTUN_HEADER_LEN: usize = 4;

#[cfg(any(target_os = "macos", target_os = "ios"))]
fn read_packet(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let mut header = [0u8; UTUN_HEADER_LEN];
    let iov = [
        libc::iovec {
            iov_base: header.as_mut_ptr().cast(),
            iov_len: header.len(),
        },
        libc::iovec {
            iov_base: buf.as_mut_ptr().cast(),
            iov_len: buf.len(),
        },
    ];
    // SAFETY: both iovecs point at live, writable buffers of the given size.
    let n = sys::cvt(unsafe { libc::readv(fd, iov.as_ptr(), 2) })?;
    Ok(n.saturating_sub(UTUN_HEADER_LEN))
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
fn write_packet(fd: RawFd, buf: &[u8]) -> io::Result<usize> {
    let family = match buf.first().map(|b| b >> 4) {
        Some(6) => libc::AF_INET6,
        _ => libc::AF_INET,
    };
    #[allow(clippy::cast_sign_loss)]
    let header = (family as u32).to_be_bytes();
    let iov = [
        libc::iovec {
            iov_base: header.as_ptr() as *mut libc::c_void,
            iov_len: header.len(),
        },
        libc::iovec {
            iov_base: buf.as_ptr() as *mut libc::c_void,
            iov_len: buf.len(),
        },
    ];
    // SAFETY: both iovecs point at live buffers; writev does not mutate them.
    let n = sys::cvt(unsafe { libc::writev(fd, iov.as_ptr(), 2) })?;
    Ok(n.saturating_sub(UTUN_HEADER_LEN))
}

// ============================================
// Interface Name
// ============================================

#[cfg(target_os = "linux")]
mod ifreq {
    use nix::libc;

    /// TUNGETIFF ioctl number.
    pub(super) const TUNGETIFF: u64 = 0x8004_54d2;

    /// Interface request structure for ioctl calls.
    #[repr(C)]
    pub(super) struct IfReq {
        pub(super) ifr_name: [libc::c_char; libc::IFNAMSIZ],
        pub(super) ifr_flags: libc::c_short,
        _padding: [u8; 22],
    }

    impl IfReq {
        pub(super) const fn zeroed() -> Self {
            Self {
                ifr_name: [0; libc::IFNAMSIZ],
                ifr_flags: 0,
                _padding: [0; 22],
            }
        }

        #[cfg(test)]
        pub(super) fn with_name(name: &str) -> Self {
            let mut ifr = Self::zeroed();
            let copy_len = name.len().min(libc::IFNAMSIZ - 1);
            for (slot, &byte) in ifr.ifr_name.iter_mut().zip(&name.as_bytes()[..copy_len]) {
                *slot = byte as libc::c_char;
            }
            ifr
        }

        pub(super) fn name(&self) -> String {
            #[allow(clippy::cast_sign_loss)]
            let bytes: Vec<u8> = self
                .ifr_name
                .iter()
                .take_while(|&&c| c != 0)
                .map(|&c| c as u8)
                .collect();
            String::from_utf8_lossy(&bytes).into_owned()
        }
    }
}

#[cfg(target_os = "linux")]
fn interface_name(fd: RawFd) -> io::Result<String> {
    use ifreq::{IfReq, TUNGETIFF};

    let mut ifr = IfReq::zeroed();
    // SAFETY: TUNGETIFF writes at most size_of::<IfReq>() bytes into `ifr`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    let ret = unsafe { libc::ioctl(fd, TUNGETIFF as _, std::ptr::addr_of_mut!(ifr)) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(ifr.name())
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
fn interface_name(fd: RawFd) -> io::Result<String> {
    const SYSPROTO_CONTROL: libc::c_int = 2;
    const UTUN_OPT_IFNAME: libc::c_int = 2;

    let mut buf = [0u8; libc::IFNAMSIZ];
    #[allow(clippy::cast_possible_truncation)]
    let mut len = buf.len() as libc::socklen_t;
    // SAFETY: `buf` is valid for `len` writable bytes.
    let ret = unsafe {
        libc::getsockopt(
            fd,
            SYSPROTO_CONTROL,
            UTUN_OPT_IFNAME,
            buf.as_mut_ptr().cast(),
            &mut len,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "ios")))]
fn interface_name(_fd: RawFd) -> io::Result<String> {
    Err(io::Error::from(io::ErrorKind::Unsupported))
}

// ============================================
// Link Watcher
// ============================================

/// Forwards kernel link state for `name` into the device's event queue.
#[cfg(target_os = "linux")]
fn spawn_link_watcher(name: &str, mtu: u16, events: &EventChannel) -> Option<JoinHandle<()>> {
    use crate::route::unix::netlink::parse_link_states;
    use crate::route::unix::RouteSocket;

    let index = sys::if_index(name)?;
    let tx = events.sender()?;
    let socket = match RouteSocket::open_link_group() {
        Ok(socket) => socket,
        Err(e) => {
            debug!(name = %name, "Link watcher unavailable: {}", e);
            return None;
        }
    };

    Some(tokio::spawn(async move {
        let mut buf = vec![0u8; 8192];
        let mut up = true;
        let mut current_mtu = u32::from(mtu);

        loop {
            let n = match socket.recv(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    debug!("Link watcher stopped: {}", e);
                    return;
                }
            };

            for state in parse_link_states(&buf[..n], index) {
                if let Some(new_mtu) = state.mtu.filter(|&m| m != current_mtu) {
                    current_mtu = new_mtu;
                    if let Ok(mtu) = u16::try_from(new_mtu) {
                        let _ = tx.try_send(TunEvent::MtuUpdate(mtu));
                    }
                }
                if state.up != up {
                    up = state.up;
                    let event = if up { TunEvent::Up } else { TunEvent::Down };
                    if tx.try_send(event).is_err() && tx.is_closed() {
                        return;
                    }
                }
            }
        }
    }))
}

#[cfg(not(target_os = "linux"))]
fn spawn_link_watcher(_name: &str, _mtu: u16, _events: &EventChannel) -> Option<JoinHandle<()>> {
    None
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use std::os::unix::io::{FromRawFd, OwnedFd};

    use super::*;

    #[cfg(any(target_os = "linux", target_os = "android"))]
    const MSG_NOSIGNAL: libc::c_int = libc::MSG_NOSIGNAL;
    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    const MSG_NOSIGNAL: libc::c_int = 0;

    fn datagram_pair() -> (OwnedFd, OwnedFd) {
        let mut fds = [0; 2];
        let ret = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_DGRAM, 0, fds.as_mut_ptr()) };
        assert_eq!(ret, 0);
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
    }

    #[test]
    fn test_requires_runtime() {
        let (a, _b) = datagram_pair();
        let err = FdTun::with_name(a.as_raw_fd(), "tun0", 1280).unwrap_err();
        assert!(matches!(err, TransportError::DeviceSetup { .. }));
    }

    #[tokio::test]
    async fn test_bad_descriptor() {
        let err = FdTun::with_name(-1, "tun0", 1280).unwrap_err();
        assert!(matches!(err, TransportError::Dup { fd: -1, .. }));
    }

    #[tokio::test]
    async fn test_non_tun_descriptor_has_no_name() {
        let (a, _b) = datagram_pair();
        let err = FdTun::from_raw_fd(a.as_raw_fd(), 1280).unwrap_err();
        assert!(matches!(err, TransportError::InterfaceName { .. }));
    }

    #[tokio::test]
    async fn test_emits_up_and_closes() {
        let (a, _b) = datagram_pair();
        let tun = FdTun::with_name(a.as_raw_fd(), "tun0", 1280).unwrap();
        assert_eq!(tun.name(), "tun0");
        assert_eq!(tun.mtu(), 1280);

        let mut events = tun.take_events().unwrap();
        assert_eq!(events.recv().await, Some(TunEvent::Up));

        tun.close();
        tun.close();
        assert!(tun.is_closed());
        assert_eq!(events.recv().await, None);

        let mut buf = [0u8; 16];
        assert!(tun.read(&mut buf).await.unwrap_err().is_closed());
        assert!(tun.write(b"x").await.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn test_close_wakes_pending_read() {
        let (a, _b) = datagram_pair();
        let tun = std::sync::Arc::new(FdTun::with_name(a.as_raw_fd(), "tun0", 1280).unwrap());

        let reader = {
            let tun = std::sync::Arc::clone(&tun);
            tokio::spawn(async move {
                let mut buf = [0u8; 16];
                tun.read(&mut buf).await
            })
        };
        tokio::task::yield_now().await;
        tun.close();

        assert!(reader.await.unwrap().unwrap_err().is_closed());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_read_write_through_descriptor() {
        let (a, b) = datagram_pair();
        let tun = FdTun::with_name(a.as_raw_fd(), "tun0", 1280).unwrap();
        drop(a);

        let written = unsafe { libc::write(b.as_raw_fd(), b"ping".as_ptr().cast(), 4) };
        assert_eq!(written, 4);

        let mut buf = [0u8; 16];
        let n = tun.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");

        assert_eq!(tun.write(b"pong").await.unwrap(), 4);
        let mut out = [0u8; 16];
        let n = unsafe { libc::read(b.as_raw_fd(), out.as_mut_ptr().cast(), out.len()) };
        assert_eq!(&out[..n as usize], b"pong");
    }

    #[tokio::test]
    async fn test_close_releases_descriptor() {
        let (a, b) = datagram_pair();
        let tun = FdTun::with_name(a.as_raw_fd(), "tun0", 1280).unwrap();
        drop(a);

        let send = |fd: RawFd| unsafe { libc::send(fd, b"ping".as_ptr().cast(), 4, MSG_NOSIGNAL) };
        assert_eq!(send(b.as_raw_fd()), 4);

        tun.close();
        assert_eq!(send(b.as_raw_fd()), -1);
        assert!(format!("{tun:?}").contains("fd: None"));

        let mut buf = [0u8; 16];
        assert!(tun.read(&mut buf).await.unwrap_err().is_closed());
        assert!(tun.write(b"pong").await.unwrap_err().is_closed());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_ifreq_name() {
        let ifr = ifreq::IfReq::with_name("tun0");
        assert_eq!(ifr.name(), "tun0");
        assert_eq!(ifr.ifr_flags, 0);

        let ifr = ifreq::IfReq::with_name(&"a".repeat(20));
        assert!(ifr.name().len() < libc::IFNAMSIZ);
    }
}
