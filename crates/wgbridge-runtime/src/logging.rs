// ============================================
// File: crates/wgbridge-runtime/src/logging.rs
// ============================================
//! # Log Bridge
//!
//! ## Creation Reason
//! Mobile hosts want tunnel logs in their own logging system. The bridge
//! forwards every line to a host callback (or a Rust closure) and mirrors
//! it into `tracing` for embedders that prefer subscribers.
//!
//! ## Main Functionality
//! - `LogBridge`: Replaceable sink, process-wide instance via `global()`
//! - `TunnelLogger`: Per-tunnel logger prefixing `"<ifname>: "`
//! - `init_tracing`: `tracing-subscriber` setup with an `EnvFilter`
//!
//! ## Log Flow
//! ```text
//! engine / registry ──► TunnelLogger ──┬──► tracing (debug!/info!/error!)
//!                      "utun3: msg"     └──► LogBridge ──► host fn(ctx, level, msg)
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - The sink is copied out before it is called; a host callback may call
//!   `wgSetLogger` again without deadlocking
//! - Messages containing NUL bytes have them stripped before crossing
//!   the C boundary
//!
//! ## Last Modified
//! v0.1.0 - Initial log bridge

use std::ffi::{c_char, c_void, CString};
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt as tracing_fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wgbridge_core::LogLevel;
use wgbridge_transport::HostContext;

use crate::engine::DeviceLogger;

/// Host log callback: `(context, level, NUL-terminated message)`.
pub type HostLogFn = unsafe extern "C" fn(ctx: *mut c_void, level: i32, msg: *const c_char);

/// Errors from the log bridge.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogBridgeError {
    /// No sink has been installed.
    #[error("Log bridge has no sink installed")]
    NotInitialized,
}

#[derive(Clone)]
enum LogSink {
    Host { func: HostLogFn, ctx: HostContext },
    Rust(Arc<dyn Fn(LogLevel, &str) + Send + Sync>),
}

impl LogSink {
    fn emit(&self, level: LogLevel, message: &str) {
        match self {
            Self::Host { func, ctx } => {
                let line = to_c_string(message);
                // SAFETY: the host promised at registration that `func` stays
                // callable with `ctx` until it is replaced, and `line` outlives
                // the call.
                unsafe { func(ctx.as_ptr(), level.as_raw(), line.as_ptr()) };
            }
            Self::Rust(func) => func(level, message),
        }
    }
}

fn to_c_string(message: &str) -> CString {
    CString::new(message).unwrap_or_else(|e| {
        let mut bytes = e.into_vec();
        bytes.retain(|&b| b != 0);
        CString::new(bytes).unwrap_or_default()
    })
}

// ============================================
// LogBridge
// ============================================

/// Replaceable log sink.
#[derive(Default)]
pub struct LogBridge {
    sink: RwLock<Option<LogSink>>,
}

static GLOBAL: OnceLock<Arc<LogBridge>> = OnceLock::new();

impl LogBridge {
    /// Creates a bridge without a sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide bridge used by the C ABI.
    pub fn global() -> Arc<Self> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new())))
    }

    /// Installs a host callback; `None` clears the sink.
    pub fn set_host_sink(&self, func: Option<HostLogFn>, ctx: HostContext) {
        *self.sink.write() = func.map(|func| LogSink::Host { func, ctx });
    }

    /// Installs a Rust closure as the sink.
    pub fn set_sink<F>(&self, func: F)
    where
        F: Fn(LogLevel, &str) + Send + Sync + 'static,
    {
        *self.sink.write() = Some(LogSink::Rust(Arc::new(func)));
    }

    /// Removes the sink.
    pub fn clear(&self) {
        self.sink.write().take();
    }

    /// Returns `true` if a sink is installed.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.sink.read().is_some()
    }

    /// Delivers one line to the sink.
    ///
    /// # Errors
    /// Returns `NotInitialized` if no sink is installed.
    pub fn write(&self, level: LogLevel, message: &str) -> Result<(), LogBridgeError> {
        let sink = self.sink.read().clone().ok_or(LogBridgeError::NotInitialized)?;
        sink.emit(level, message);
        Ok(())
    }
}

impl fmt::Debug for LogBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogBridge")
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

// ============================================
// TunnelLogger
// ============================================

/// Logger bound to one tunnel's interface name.
#[derive(Clone)]
pub struct TunnelLogger {
    interface: Arc<str>,
    bridge: Arc<LogBridge>,
}

impl TunnelLogger {
    /// Creates a logger that tags every line with `interface`.
    pub fn new(interface: impl Into<Arc<str>>, bridge: Arc<LogBridge>) -> Self {
        Self {
            interface: interface.into(),
            bridge,
        }
    }

    /// Interface name used as the tag.
    #[must_use]
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Logs at `level`, mirrored to `tracing`.
    pub fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => debug!(interface = %self.interface, "{}", message),
            LogLevel::Info => info!(interface = %self.interface, "{}", message),
            LogLevel::Error => error!(interface = %self.interface, "{}", message),
        }

        let line = format!("{}: {}", self.interface, message);
        let _ = self.bridge.write(level, &line);
    }

    /// Logs at `Debug`.
    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    /// Logs at `Info`.
    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    /// Logs at `Error`.
    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

impl DeviceLogger for TunnelLogger {
    fn log(&self, level: LogLevel, message: &str) {
        Self::log(self, level, message);
    }
}

impl fmt::Debug for TunnelLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelLogger")
            .field("interface", &self.interface)
            .finish_non_exhaustive()
    }
}

// ============================================
// tracing setup
// ============================================

/// Initializes the `tracing` subscriber.
///
/// `RUST_LOG` wins over `level`. Calling this twice is harmless.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(tracing_fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .ok();
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use std::ffi::CStr;
    use std::ptr;

    use parking_lot::Mutex;

    use super::*;

    fn capturing_bridge() -> (Arc<LogBridge>, Arc<Mutex<Vec<(LogLevel, String)>>>) {
        let bridge = Arc::new(LogBridge::new());
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        bridge.set_sink(move |level, msg| sink.lock().push((level, msg.to_owned())));
        (bridge, lines)
    }

    #[test]
    fn test_write_without_sink() {
        let bridge = LogBridge::new();
        assert!(!bridge.is_initialized());
        assert_eq!(
            bridge.write(LogLevel::Info, "dropped"),
            Err(LogBridgeError::NotInitialized)
        );
    }

    #[test]
    fn test_tunnel_logger_prefixes_interface() {
        let (bridge, lines) = capturing_bridge();
        let logger = TunnelLogger::new("utun3", Arc::clone(&bridge));

        logger.info("Device started");
        logger.error("Unable to update bind");

        let lines = lines.lock();
        assert_eq!(lines[0], (LogLevel::Info, "utun3: Device started".to_owned()));
        assert_eq!(lines[1].0, LogLevel::Error);
        assert_eq!(lines[1].1, "utun3: Unable to update bind");
    }

    #[test]
    fn test_clear_sink() {
        let (bridge, lines) = capturing_bridge();
        bridge.write(LogLevel::Debug, "one").unwrap();
        bridge.clear();
        assert!(bridge.write(LogLevel::Debug, "two").is_err());
        assert_eq!(lines.lock().len(), 1);
    }

    static HOST_LINES: std::sync::Mutex<Vec<(i32, String)>> = std::sync::Mutex::new(Vec::new());

    unsafe extern "C" fn host_log(_ctx: *mut c_void, level: i32, msg: *const c_char) {
        let text = unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned();
        HOST_LINES.lock().unwrap().push((level, text));
    }

    #[test]
    fn test_host_sink_receives_levels_and_text() {
        let bridge = LogBridge::new();
        bridge.set_host_sink(Some(host_log), HostContext::new(ptr::null_mut()));

        bridge.write(LogLevel::Error, "bad\0line").unwrap();
        bridge.write(LogLevel::Debug, "trace").unwrap();

        let lines = HOST_LINES.lock().unwrap();
        assert_eq!(lines[0], (2, "badline".to_owned()));
        assert_eq!(lines[1], (0, "trace".to_owned()));
        drop(lines);

        bridge.set_host_sink(None, HostContext::new(ptr::null_mut()));
        assert!(!bridge.is_initialized());
    }

    #[test]
    fn test_reentrant_sink_replacement() {
        let bridge = Arc::new(LogBridge::new());
        let inner = Arc::clone(&bridge);
        bridge.set_sink(move |_, _| inner.clear());

        bridge.write(LogLevel::Info, "replace me").unwrap();
        assert!(!bridge.is_initialized());
    }

    #[test]
    fn test_global_is_shared() {
        assert!(Arc::ptr_eq(&LogBridge::global(), &LogBridge::global()));
    }
}
