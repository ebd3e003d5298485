// ============================================
// File: crates/wgbridge-runtime/src/ffi.rs
// ============================================
//! # C ABI
//!
//! ## Creation Reason
//! Mobile network extensions drive tunnels through plain C calls. Every
//! function here resolves the installed [`Bridge`] and forwards to its
//! registry.
//!
//! ## Exported Functions
//! | Function                                         | Returns                          |
//! |--------------------------------------------------|----------------------------------|
//! | `wgSetLogger(ctx, fn)`                           | -                                |
//! | `wgTurnOn(ifname, settings, tun_fd)`             | handle, or -1                    |
//! | `wgTurnOnWithCallbacks(ifname, settings, ...)`   | handle, or -1                    |
//! | `wgTurnOff(handle)`                              | -                                |
//! | `wgSetConfig(handle, settings)`                  | 0, 1 (unknown), negative errno   |
//! | `wgGetConfig(handle)`                            | owned string or NULL             |
//! | `wgFreeString(ptr)`                              | -                                |
//! | `wgBumpSockets(handle)`                          | -                                |
//! | `wgDisableSomeRoamingForBrokenMobileSemantics(h)`| -                                |
//! | `wgEnableRoaming(enabled)`                       | -                                |
//! | `wgBindInterfaceScope(handle, scope)`            | -                                |
//! | `wgNotifyNetworkChange()`                        | -                                |
//! | `wgVersion()`                                    | static string                    |
//!
//! ## ⚠️ Important Note for Next Developer
//! - The embedding crate must call `Bridge::install` first; before that
//!   every call fails soft (-1, NULL or no-op)
//! - Panics are caught at this boundary and reported as failures
//! - Strings from `wgGetConfig` must go back through `wgFreeString`
//!
//! ## Last Modified
//! v0.1.0 - Initial C ABI

use std::ffi::{c_char, c_void, CStr, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;

use tracing::{debug, error};

use wgbridge_core::{IpcError, TunnelHandle};
use wgbridge_transport::{HostContext, ReadFn, WriteFn};

use crate::bridge::Bridge;
use crate::error::{STATUS_FAILURE, STATUS_UNKNOWN_HANDLE};
use crate::logging::{HostLogFn, LogBridge};
use crate::services::IoSource;

static VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");

/// Handle returned when a tunnel cannot be started.
const TURN_ON_FAILED: i32 = -1;

/// Runs `f` against the installed bridge, returning `fallback` if there is
/// none or if `f` panics.
fn with_bridge<T>(operation: &str, fallback: T, f: impl FnOnce(&Bridge) -> T) -> T {
    let bridge = match Bridge::get() {
        Ok(bridge) => bridge,
        Err(e) => {
            error!("{}: {}", operation, e);
            return fallback;
        }
    };

    catch_unwind(AssertUnwindSafe(|| f(bridge))).unwrap_or_else(|_| {
        error!("{}: panicked", operation);
        fallback
    })
}

/// Borrows a C string as UTF-8. `None` for NULL or invalid UTF-8.
unsafe fn borrow_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: non-null, and the caller passes a NUL-terminated string that
    // outlives this call.
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

// ============================================
// Logging
// ============================================

/// Registers the host log callback. A NULL function clears it.
///
/// # Safety
/// `logger_fn` must be callable from any thread with `context` until it is
/// replaced.
#[no_mangle]
pub unsafe extern "C" fn wgSetLogger(context: *mut c_void, logger_fn: Option<HostLogFn>) {
    LogBridge::global().set_host_sink(logger_fn, HostContext::new(context));
}

// ============================================
// Lifecycle
// ============================================

/// Starts a tunnel on a kernel TUN descriptor owned by the host.
///
/// # Safety
/// `ifname` may be NULL; otherwise it and `settings` must be valid
/// NUL-terminated strings.
#[cfg(unix)]
#[no_mangle]
pub unsafe extern "C" fn wgTurnOn(ifname: *const c_char, settings: *const c_char, tun_fd: i32) -> i32 {
    let ifname = unsafe { borrow_str(ifname) }.unwrap_or("");
    let Some(settings) = (unsafe { borrow_str(settings) }) else {
        error!("wgTurnOn: settings are NULL or not UTF-8");
        return TURN_ON_FAILED;
    };

    with_bridge("wgTurnOn", TURN_ON_FAILED, |bridge| {
        turn_on(bridge, ifname, settings, IoSource::Descriptor(tun_fd))
    })
}

/// Starts a tunnel whose packets flow through host callbacks. An `mtu`
/// of 0 selects the configured default.
///
/// # Safety
/// `ifname` may be NULL; `settings` must be a valid NUL-terminated string.
/// Both callbacks must be callable from any thread with `context` until the
/// tunnel is turned off.
#[no_mangle]
pub unsafe extern "C" fn wgTurnOnWithCallbacks(
    ifname: *const c_char,
    settings: *const c_char,
    read_fn: Option<ReadFn>,
    write_fn: Option<WriteFn>,
    context: *mut c_void,
    mtu: u32,
) -> i32 {
    let ifname = unsafe { borrow_str(ifname) }.unwrap_or("");
    let Some(settings) = (unsafe { borrow_str(settings) }) else {
        error!("wgTurnOnWithCallbacks: settings are NULL or not UTF-8");
        return TURN_ON_FAILED;
    };
    let (Some(read), Some(write)) = (read_fn, write_fn) else {
        error!("wgTurnOnWithCallbacks: read and write callbacks are required");
        return TURN_ON_FAILED;
    };
    let Ok(mtu) = u16::try_from(mtu) else {
        error!("wgTurnOnWithCallbacks: MTU {} out of range", mtu);
        return TURN_ON_FAILED;
    };

    let source = IoSource::Callbacks {
        read,
        write,
        ctx: HostContext::new(context),
        mtu,
    };
    with_bridge("wgTurnOnWithCallbacks", TURN_ON_FAILED, |bridge| {
        turn_on(bridge, ifname, settings, source)
    })
}

fn turn_on(bridge: &Bridge, ifname: &str, settings: &str, source: IoSource) -> i32 {
    match bridge.registry().create(ifname, settings, source) {
        Ok(handle) => handle.as_raw(),
        Err(e) => {
            error!(interface = %ifname, "Unable to turn on tunnel: {}", e);
            TURN_ON_FAILED
        }
    }
}

/// Stops and removes a tunnel. Unknown handles are ignored.
#[no_mangle]
pub extern "C" fn wgTurnOff(tunnel_handle: i32) {
    let Some(handle) = TunnelHandle::from_raw(tunnel_handle) else {
        return;
    };
    with_bridge("wgTurnOff", (), |bridge| {
        if !bridge.registry().destroy(handle) {
            debug!(handle = %handle, "wgTurnOff: unknown handle");
        }
    });
}

// ============================================
// Configuration
// ============================================

/// Applies a configuration fragment.
///
/// Returns 0 on success, 1 for an unknown handle, or the engine's negative
/// error code.
///
/// # Safety
/// `settings` must be a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn wgSetConfig(tunnel_handle: i32, settings: *const c_char) -> i64 {
    let Some(handle) = TunnelHandle::from_raw(tunnel_handle) else {
        return STATUS_UNKNOWN_HANDLE;
    };
    let Some(settings) = (unsafe { borrow_str(settings) }) else {
        return IpcError::INVALID;
    };

    with_bridge("wgSetConfig", STATUS_FAILURE, |bridge| {
        match bridge.registry().apply_config(handle, settings) {
            Ok(()) => 0,
            Err(e) => e.ffi_status(),
        }
    })
}

/// Returns the full configuration as an owned string, or NULL for an
/// unknown handle. Free it with `wgFreeString`.
#[no_mangle]
pub extern "C" fn wgGetConfig(tunnel_handle: i32) -> *mut c_char {
    let Some(handle) = TunnelHandle::from_raw(tunnel_handle) else {
        return ptr::null_mut();
    };
    with_bridge("wgGetConfig", ptr::null_mut(), |bridge| {
        bridge
            .registry()
            .read_config(handle)
            .and_then(|config| CString::new(config).ok())
            .map_or(ptr::null_mut(), CString::into_raw)
    })
}

/// Frees a string returned by `wgGetConfig`.
///
/// # Safety
/// `ptr` must be NULL or a pointer from `wgGetConfig` not yet freed.
#[no_mangle]
pub unsafe extern "C" fn wgFreeString(ptr: *mut c_char) {
    if !ptr.is_null() {
        // SAFETY: the pointer came from `CString::into_raw`.
        drop(unsafe { CString::from_raw(ptr) });
    }
}

// ============================================
// Network
// ============================================

/// Rebinds a tunnel's sockets in the background.
#[no_mangle]
pub extern "C" fn wgBumpSockets(tunnel_handle: i32) {
    let Some(handle) = TunnelHandle::from_raw(tunnel_handle) else {
        return;
    };
    with_bridge("wgBumpSockets", (), |bridge| {
        if bridge.registry().rebind_sockets(handle).is_none() {
            debug!(handle = %handle, "wgBumpSockets: unknown handle");
        }
    });
}

/// Disables endpoint roaming on one tunnel.
#[no_mangle]
pub extern "C" fn wgDisableSomeRoamingForBrokenMobileSemantics(tunnel_handle: i32) {
    let Some(handle) = TunnelHandle::from_raw(tunnel_handle) else {
        return;
    };
    with_bridge("wgDisableSomeRoamingForBrokenMobileSemantics", (), |bridge| {
        if let Err(e) = bridge.registry().set_roaming_policy(handle, false) {
            debug!("wgDisableSomeRoamingForBrokenMobileSemantics: {}", e);
        }
    });
}

/// Sets roaming for every live and future tunnel.
#[no_mangle]
pub extern "C" fn wgEnableRoaming(enabled: bool) {
    with_bridge("wgEnableRoaming", (), |bridge| {
        bridge.registry().set_default_roaming(enabled);
    });
}

/// Scopes a tunnel's outer sockets to interface index `scope`.
#[no_mangle]
pub extern "C" fn wgBindInterfaceScope(tunnel_handle: i32, scope: u32) {
    let Some(handle) = TunnelHandle::from_raw(tunnel_handle) else {
        return;
    };
    with_bridge("wgBindInterfaceScope", (), |bridge| {
        bridge.registry().bind_to_interface_scope(handle, scope);
    });
}

/// Reports a network path change observed by the host.
#[no_mangle]
pub extern "C" fn wgNotifyNetworkChange() {
    with_bridge("wgNotifyNetworkChange", (), |bridge| {
        bridge.notify_network_change();
    });
}

/// Library version as a static NUL-terminated string.
#[no_mangle]
pub extern "C" fn wgVersion() -> *const c_char {
    VERSION.as_ptr().cast()
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::config::RuntimeConfig;
    use crate::engine::MemoryEngine;

    const PEER: &str = "cccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccccc";

    fn bridge() -> &'static Bridge {
        let mut config = RuntimeConfig::default();
        config.reactor.watch_routes = false;
        match Bridge::install(Arc::new(MemoryEngine::new()), config) {
            Ok(bridge) => bridge,
            Err(_) => Bridge::get().unwrap(),
        }
    }

    unsafe extern "C" fn host_read(_ctx: *mut c_void, _buf: *mut u8, _len: usize) -> isize {
        0
    }

    unsafe extern "C" fn host_write(_ctx: *mut c_void, _buf: *const u8, len: usize) -> isize {
        len as isize
    }

    fn turn_on(ifname: &str, settings: &str) -> i32 {
        let ifname = CString::new(ifname).unwrap();
        let settings = CString::new(settings).unwrap();
        unsafe {
            wgTurnOnWithCallbacks(
                ifname.as_ptr(),
                settings.as_ptr(),
                Some(host_read),
                Some(host_write),
                ptr::null_mut(),
                0,
            )
        }
    }

    fn set_config(handle: i32, settings: &str) -> i64 {
        let settings = CString::new(settings).unwrap();
        unsafe { wgSetConfig(handle, settings.as_ptr()) }
    }

    fn get_config(handle: i32) -> Option<String> {
        let raw = wgGetConfig(handle);
        if raw.is_null() {
            return None;
        }
        let text = unsafe { CStr::from_ptr(raw) }.to_str().unwrap().to_owned();
        unsafe { wgFreeString(raw) };
        Some(text)
    }

    #[test]
    fn test_turn_on_configure_turn_off() {
        bridge();
        let handle = turn_on("utun10", "listen_port=51820\n");
        assert!(handle >= 0);

        assert_eq!(set_config(handle, &format!("public_key={PEER}\nendpoint=203.0.113.5:51820\n")), 0);
        let config = get_config(handle).unwrap();
        assert!(config.contains("listen_port=51820"));
        assert!(config.contains("endpoint=203.0.113.5:51820"));

        assert_eq!(set_config(handle, "unknown_key=1\n"), IpcError::PROTOCOL);
        assert_eq!(set_config(handle, "no equals\n"), IpcError::INVALID);

        wgBumpSockets(handle);
        wgBindInterfaceScope(handle, 4);
        wgDisableSomeRoamingForBrokenMobileSemantics(handle);
        wgNotifyNetworkChange();

        wgTurnOff(handle);
        wgTurnOff(handle);
        assert_eq!(set_config(handle, "listen_port=1\n"), STATUS_UNKNOWN_HANDLE);
        assert!(get_config(handle).is_none());
    }

    #[test]
    fn test_invalid_arguments() {
        bridge();
        let settings = CString::new("").unwrap();

        let missing_settings = unsafe {
            wgTurnOnWithCallbacks(ptr::null(), ptr::null(), Some(host_read), Some(host_write), ptr::null_mut(), 0)
        };
        assert_eq!(missing_settings, -1);

        let missing_callback = unsafe {
            wgTurnOnWithCallbacks(ptr::null(), settings.as_ptr(), None, Some(host_write), ptr::null_mut(), 0)
        };
        assert_eq!(missing_callback, -1);

        let bad_mtu = unsafe {
            wgTurnOnWithCallbacks(ptr::null(), settings.as_ptr(), Some(host_read), Some(host_write), ptr::null_mut(), 70_000)
        };
        assert_eq!(bad_mtu, -1);

        assert_eq!(turn_on("utun11", "bogus=1\n"), -1);
        assert_eq!(set_config(-3, "listen_port=1\n"), STATUS_UNKNOWN_HANDLE);
        assert_eq!(unsafe { wgSetConfig(0, ptr::null()) }, IpcError::INVALID);
        assert!(wgGetConfig(-1).is_null());
        wgTurnOff(-1);
        unsafe { wgFreeString(ptr::null_mut()) };
    }

    static LINES: Mutex<Vec<(i32, String)>> = Mutex::new(Vec::new());

    unsafe extern "C" fn host_log(_ctx: *mut c_void, level: i32, msg: *const c_char) {
        let text = unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned();
        LINES.lock().unwrap().push((level, text));
    }

    #[test]
    fn test_logger_receives_tagged_lines() {
        bridge();
        unsafe { wgSetLogger(ptr::null_mut(), Some(host_log)) };

        let handle = turn_on("ffilog0", "");
        assert!(handle >= 0);
        wgTurnOff(handle);

        unsafe { wgSetLogger(ptr::null_mut(), None) };
        let lines = LINES.lock().unwrap();
        assert!(lines
            .iter()
            .any(|(level, msg)| *level == 1 && msg == "ffilog0: Device started"));
    }

    #[test]
    fn test_version_string() {
        let version = unsafe { CStr::from_ptr(wgVersion()) };
        assert_eq!(version.to_str().unwrap(), env!("CARGO_PKG_VERSION"));
    }
}
