// ============================================
// File: crates/wgbridge-runtime/src/bridge.rs
// ============================================
//! # Process Bridge
//!
//! ## Creation Reason
//! The C ABI is a set of free functions with no place to keep state. The
//! bridge is the one process-wide object behind them: it owns the tokio
//! runtime, the registry and the background services.
//!
//! ## Startup Sequence
//! ```text
//! Bridge::install(engine, config)
//!   ├── init_tracing(config.logging.level)
//!   ├── build multi-thread runtime ("wgbridge-worker")
//!   ├── TunnelRegistry::new(engine, LogBridge::global())
//!   ├── spawn NetworkReactor::run
//!   ├── spawn RouteMonitor::run        (if reactor.watch_routes)
//!   └── spawn diagnostics listener
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - `install` can succeed once per process; the bridge is never dropped
//! - `Bridge::start` is the same wiring on a caller-owned runtime, used by
//!   tests and by embedders that already run tokio
//! - A route socket that cannot be opened is logged and skipped; hosts can
//!   still report changes through `notify_network_change`
//!
//! ## Last Modified
//! v0.1.0 - Initial bridge implementation

use std::sync::{Arc, OnceLock};

use tokio::runtime::{Handle, Runtime};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use wgbridge_transport::{NetworkChange, RouteMonitor};

use crate::config::RuntimeConfig;
use crate::engine::TunnelEngine;
use crate::error::{Result, RuntimeError};
use crate::logging::{init_tracing, LogBridge};
use crate::services::diagnostics;
use crate::services::{NetworkReactor, TunnelRegistry};

static BRIDGE: OnceLock<Bridge> = OnceLock::new();

/// Worker threads of the bridge runtime.
const WORKER_THREADS: usize = 2;

/// Process-wide owner of the registry and its services.
pub struct Bridge {
    // Set when the bridge built its own runtime.
    owned_runtime: Option<Runtime>,
    handle: Handle,
    registry: Arc<TunnelRegistry>,
    log_bridge: Arc<LogBridge>,
    changes: mpsc::Sender<NetworkChange>,
    shutdown: broadcast::Sender<()>,
    config: RuntimeConfig,
}

impl Bridge {
    /// Installs the process-wide bridge with its own runtime.
    ///
    /// # Errors
    /// - `BridgeAlreadyInstalled` on a second call
    /// - `RuntimeStart` if the runtime cannot be built
    /// - `ConfigInvalid` if `config` fails validation
    pub fn install(engine: Arc<dyn TunnelEngine>, config: RuntimeConfig) -> Result<&'static Self> {
        if BRIDGE.get().is_some() {
            return Err(RuntimeError::BridgeAlreadyInstalled);
        }
        config.validate()?;
        init_tracing(&config.logging.level);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(WORKER_THREADS)
            .thread_name("wgbridge-worker")
            .enable_all()
            .build()
            .map_err(RuntimeError::RuntimeStart)?;

        let handle = runtime.handle().clone();
        let mut bridge = Self::start(engine, config, handle, LogBridge::global());
        bridge.owned_runtime = Some(runtime);

        BRIDGE
            .set(bridge)
            .map_err(|_| RuntimeError::BridgeAlreadyInstalled)?;
        BRIDGE.get().ok_or(RuntimeError::BridgeNotInstalled)
    }

    /// Installs the bridge using the file named by `WGBRIDGE_CONFIG`.
    ///
    /// A broken file is logged and defaults are used.
    ///
    /// # Errors
    /// Same as [`Bridge::install`].
    pub fn install_from_env(engine: Arc<dyn TunnelEngine>) -> Result<&'static Self> {
        let config = RuntimeConfig::from_env().unwrap_or_else(|e| {
            warn!("Using default configuration: {}", e);
            RuntimeConfig::default()
        });
        Self::install(engine, config)
    }

    /// Returns the installed bridge.
    ///
    /// # Errors
    /// Returns `BridgeNotInstalled` before [`Bridge::install`].
    pub fn get() -> Result<&'static Self> {
        BRIDGE.get().ok_or(RuntimeError::BridgeNotInstalled)
    }

    /// Wires the registry and services onto an existing runtime.
    pub fn start(
        engine: Arc<dyn TunnelEngine>,
        config: RuntimeConfig,
        handle: Handle,
        log_bridge: Arc<LogBridge>,
    ) -> Self {
        let registry = Arc::new(TunnelRegistry::new(
            engine,
            Arc::clone(&log_bridge),
            handle.clone(),
            &config,
        ));
        let (shutdown, _) = broadcast::channel(1);

        let (reactor, changes) = NetworkReactor::new(Arc::clone(&registry), &config.reactor);
        handle.spawn(reactor.run(shutdown.subscribe()));

        if config.reactor.watch_routes {
            let _guard = handle.enter();
            match RouteMonitor::open() {
                Ok(monitor) => {
                    handle.spawn(monitor.run(changes.clone(), shutdown.subscribe()));
                }
                Err(e) => warn!("Route monitor unavailable: {}", e),
            }
        }

        handle.spawn(diagnostics::run_signal_listener(
            Arc::clone(&registry),
            Arc::clone(&log_bridge),
            shutdown.subscribe(),
        ));

        info!(version = env!("CARGO_PKG_VERSION"), "Bridge started");

        Self {
            owned_runtime: None,
            handle,
            registry,
            log_bridge,
            changes,
            shutdown,
            config,
        }
    }

    /// The tunnel registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<TunnelRegistry> {
        &self.registry
    }

    /// The log bridge tunnels write to.
    #[must_use]
    pub fn log_bridge(&self) -> &Arc<LogBridge> {
        &self.log_bridge
    }

    /// Handle of the runtime background tasks run on.
    #[must_use]
    pub fn runtime_handle(&self) -> &Handle {
        &self.handle
    }

    /// The configuration the bridge was started with.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Reports a network change from the host. Returns `false` if the
    /// event was dropped.
    pub fn notify_network_change(&self) -> bool {
        match self.changes.try_send(NetworkChange::from_host()) {
            Ok(()) => true,
            Err(e) => {
                debug!("Network change not queued: {}", e);
                false
            }
        }
    }

    /// Stops the reactor, route monitor and diagnostics listener.
    /// Tunnels stay up.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("registry", &self.registry)
            .field("owns_runtime", &self.owned_runtime.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use wgbridge_transport::{MockTun, TunConfig};

    use super::*;
    use crate::engine::MemoryEngine;
    use crate::services::{IoSource, ReresolveStatus};

    fn start(engine: Arc<MemoryEngine>) -> Bridge {
        let mut config = RuntimeConfig::default();
        config.reactor.watch_routes = false;
        Bridge::start(engine, config, Handle::current(), Arc::new(LogBridge::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_notification_reaches_reactor() {
        let engine = Arc::new(MemoryEngine::new());
        let bridge = start(Arc::clone(&engine));
        let handle = bridge
            .registry()
            .create(
                "utun2",
                "listen_port=4000\n",
                IoSource::Device(Box::new(MockTun::new(TunConfig::new("utun2")))),
            )
            .unwrap();

        assert!(bridge.notify_network_change());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(
            bridge.registry().reresolve_state(handle),
            Some(ReresolveStatus::Pending)
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        let calls = engine.last_device().unwrap().ipc_set_calls();
        assert_eq!(calls.last().unwrap(), "listen_port=4000\n");

        bridge.shutdown();
    }

    #[tokio::test]
    async fn test_accessors() {
        let bridge = start(Arc::new(MemoryEngine::new()));
        assert!(bridge.registry().is_empty());
        assert!(!bridge.log_bridge().is_initialized());
        assert!(!bridge.config().reactor.watch_routes);
        assert!(format!("{bridge:?}").contains("owns_runtime: false"));
        bridge.shutdown();
    }
}
