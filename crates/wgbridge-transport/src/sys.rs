// ============================================
// File: crates/wgbridge-transport/src/sys.rs
// ============================================
//! Thin wrappers over the libc calls shared by the descriptor adapter and
//! the route monitor.

use std::ffi::CString;
use std::io;
use std::os::unix::io::RawFd;

use nix::libc;

/// Converts a `read`/`write` style return value into a byte count.
pub(crate) fn cvt(ret: isize) -> io::Result<usize> {
    usize::try_from(ret).map_err(|_| io::Error::last_os_error())
}

/// Duplicates `fd`, returning a descriptor owned by the caller.
pub(crate) fn dup(fd: RawFd) -> io::Result<RawFd> {
    // SAFETY: dup has no memory-safety preconditions.
    let new_fd = unsafe { libc::dup(fd) };
    if new_fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(new_fd)
}

/// Forces `O_NONBLOCK` on `fd`.
pub(crate) fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl with F_GETFL/F_SETFL only touches descriptor flags.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if flags & libc::O_NONBLOCK != 0 {
        return Ok(());
    }
    // SAFETY: as above.
    let result = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Returns the kernel index of interface `name`, if it exists.
#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
pub(crate) fn if_index(name: &str) -> Option<u32> {
    let c_name = CString::new(name).ok()?;
    // SAFETY: `c_name` is a valid NUL-terminated string.
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    (index != 0).then_some(index)
}
