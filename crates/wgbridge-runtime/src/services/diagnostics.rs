// ============================================
// File: crates/wgbridge-runtime/src/services/diagnostics.rs
// ============================================
//! # Stack Trace Diagnostics
//!
//! Sending `SIGUSR2` to the process writes a backtrace of the signal
//! listener plus a summary of live tunnels to the log bridge at `Debug`
//! level. Without a host sink the report is only mirrored to `tracing`.

use std::backtrace::Backtrace;
use std::sync::Arc;

use tracing::debug;

use wgbridge_core::LogLevel;

use crate::logging::LogBridge;
use crate::services::registry::TunnelRegistry;

/// Tag opening every diagnostic report.
pub const STACKTRACE_TAG: &str = "Stacktrace";

/// Builds the report sent on `SIGUSR2`.
#[must_use]
pub fn stacktrace_report(registry: &TunnelRegistry) -> String {
    format!(
        "{STACKTRACE_TAG}: {}\n{}",
        registry.summary(),
        Backtrace::force_capture()
    )
}

/// Writes one report to `bridge`.
pub fn emit_stacktrace(registry: &TunnelRegistry, bridge: &LogBridge) {
    let report = stacktrace_report(registry);
    debug!("{}", report);
    if bridge.write(LogLevel::Debug, &report).is_err() {
        debug!("No log sink installed, stack trace not forwarded");
    }
}

/// Emits a report on every `SIGUSR2` until shutdown.
#[cfg(unix)]
pub async fn run_signal_listener(
    registry: Arc<TunnelRegistry>,
    bridge: Arc<LogBridge>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    use tokio::signal::unix::{signal, SignalKind};
    use tracing::{info, warn};

    let mut signals = match signal(SignalKind::user_defined2()) {
        Ok(s) => s,
        Err(e) => {
            warn!("Unable to listen for SIGUSR2: {}", e);
            return;
        }
    };

    loop {
        tokio::select! {
            _ = shutdown.recv() => { info!("Diagnostics listener stopping"); break; }
            received = signals.recv() => {
                if received.is_none() {
                    break;
                }
                emit_stacktrace(&registry, &bridge);
            }
        }
    }
}

/// Signals are not available; waits for shutdown.
#[cfg(not(unix))]
pub async fn run_signal_listener(
    _registry: Arc<TunnelRegistry>,
    _bridge: Arc<LogBridge>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    let _ = shutdown.recv().await;
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use tokio::runtime::Handle;
    use wgbridge_transport::{MockTun, TunConfig};

    use super::*;
    use crate::config::RuntimeConfig;
    use crate::engine::{MemoryEngine, TunnelEngine};
    use crate::services::registry::IoSource;

    fn registry() -> TunnelRegistry {
        TunnelRegistry::new(
            Arc::new(MemoryEngine::new()) as Arc<dyn TunnelEngine>,
            Arc::new(LogBridge::new()),
            Handle::current(),
            &RuntimeConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_report_lists_tunnels() {
        let registry = registry();
        registry
            .create(
                "utun5",
                "",
                IoSource::Device(Box::new(MockTun::new(TunConfig::new("utun5")))),
            )
            .unwrap();

        let report = stacktrace_report(&registry);
        assert!(report.starts_with("Stacktrace: 1 tunnel(s)\n"));
        assert!(report.contains("0: utun5 (idle)"));
    }

    #[tokio::test]
    async fn test_emit_goes_to_sink_at_debug() {
        let registry = registry();
        let bridge = LogBridge::new();
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        bridge.set_sink(move |level, msg| sink.lock().push((level, msg.to_owned())));

        emit_stacktrace(&registry, &bridge);

        let lines = lines.lock();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].0, LogLevel::Debug);
        assert!(lines[0].1.starts_with(STACKTRACE_TAG));
    }

    #[tokio::test]
    async fn test_emit_without_sink_is_noop() {
        emit_stacktrace(&registry(), &LogBridge::new());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_listener_stops_on_shutdown() {
        let (tx, rx) = tokio::sync::broadcast::channel(1);
        let task = tokio::spawn(run_signal_listener(
            Arc::new(registry()),
            Arc::new(LogBridge::new()),
            rx,
        ));
        tokio::task::yield_now().await;
        tx.send(()).unwrap();
        task.await.unwrap();
    }
}
