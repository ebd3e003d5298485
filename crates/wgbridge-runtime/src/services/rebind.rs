// ============================================
// File: crates/wgbridge-runtime/src/services/rebind.rs
// ============================================
//! # Socket Rebind Service
//!
//! After a path change the outer UDP sockets may be bound to an address
//! that no longer exists. Rebinding can fail for a while until the new
//! interface is configured, so attempts are retried on a fixed interval.
//!
//! ```text
//! attempt 1 ──fail──► sleep ──► still registered? ──no──► stop
//!                                      │yes
//!                                      ▼
//! attempt 2 ... attempt N ──fail──► "Gave up ..."
//!      │ok
//!      ▼
//! keepalives to peers with a current keypair
//! ```
//!
//! An in-flight rebind is never cancelled; it holds its own `Arc` to the
//! device and stops on its own once the tunnel is gone.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;

use wgbridge_core::TunnelHandle;

use crate::config::RebindConfig;
use crate::services::registry::{TunnelRef, TunnelRegistry};

/// Logged once all attempts have failed.
pub const GAVE_UP_MESSAGE: &str = "Gave up trying to update bind; tunnel is likely dysfunctional";

/// Spawns the retry loop for `tunnel` on the registry's runtime.
pub(crate) fn spawn(
    registry: Arc<TunnelRegistry>,
    handle: TunnelHandle,
    tunnel: TunnelRef,
    policy: &RebindConfig,
) -> JoinHandle<()> {
    let runtime = registry.runtime().clone();
    runtime.spawn(run(registry, handle, tunnel, policy.clone()))
}

async fn run(registry: Arc<TunnelRegistry>, handle: TunnelHandle, tunnel: TunnelRef, policy: RebindConfig) {
    let TunnelRef {
        device,
        logger,
        generation,
    } = tunnel;

    for attempt in 1..=policy.max_attempts {
        if attempt > 1 {
            tokio::time::sleep(policy.retry_interval()).await;
            if !registry.is_current(handle, generation) {
                debug!(handle = %handle, attempt, "Tunnel gone, abandoning rebind");
                return;
            }
        }

        match device.bind_update() {
            Ok(()) => {
                device.send_keepalives_to_peers_with_current_keypair();
                debug!(handle = %handle, attempt, "Bind updated");
                return;
            }
            Err(e) => {
                logger.error(&format!("Unable to update bind, try {attempt}: {e}"));
            }
        }
    }

    logger.error(GAVE_UP_MESSAGE);
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;
    use tokio::runtime::Handle;
    use wgbridge_core::LogLevel;
    use wgbridge_transport::{MockTun, TunConfig};

    use super::*;
    use crate::config::RuntimeConfig;
    use crate::engine::memory::ALWAYS_FAIL;
    use crate::engine::{MemoryEngine, TunnelEngine};
    use crate::logging::LogBridge;
    use crate::services::registry::IoSource;

    const PEER: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    struct Fixture {
        registry: Arc<TunnelRegistry>,
        engine: Arc<MemoryEngine>,
        lines: Arc<Mutex<Vec<(LogLevel, String)>>>,
        handle: TunnelHandle,
    }

    fn fixture(bind_failures: u32) -> Fixture {
        let engine = Arc::new(MemoryEngine::new());
        engine.set_bind_failures(bind_failures);

        let bridge = Arc::new(LogBridge::new());
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        bridge.set_sink(move |level, msg| sink.lock().push((level, msg.to_owned())));

        let registry = Arc::new(TunnelRegistry::new(
            Arc::clone(&engine) as Arc<dyn TunnelEngine>,
            bridge,
            Handle::current(),
            &RuntimeConfig::default(),
        ));
        let handle = registry
            .create(
                "utun1",
                &format!("public_key={PEER}\nendpoint=192.0.2.9:51820\n"),
                IoSource::Device(Box::new(MockTun::new(TunConfig::new("utun1")))),
            )
            .unwrap();

        Fixture {
            registry,
            engine,
            lines,
            handle,
        }
    }

    impl Fixture {
        fn gave_up(&self) -> bool {
            self.lines
                .lock()
                .iter()
                .any(|(level, msg)| *level == LogLevel::Error && msg == &format!("utun1: {GAVE_UP_MESSAGE}"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let fx = fixture(ALWAYS_FAIL);

        fx.registry.rebind_sockets(fx.handle).unwrap().await.unwrap();

        let device = fx.engine.last_device().unwrap();
        assert_eq!(device.bind_attempts(), 10);
        assert_eq!(device.keepalives_sent(), 0);
        assert!(fx.gave_up());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_at_first_success_with_keepalives() {
        let fx = fixture(3);

        let start = tokio::time::Instant::now();
        fx.registry.rebind_sockets(fx.handle).unwrap().await.unwrap();

        let device = fx.engine.last_device().unwrap();
        assert_eq!(device.bind_attempts(), 4);
        assert_eq!(device.keepalives_sent(), 1);
        assert!(!fx.gave_up());
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1500));
        assert!(elapsed < Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_tunnel_destroyed() {
        let fx = fixture(ALWAYS_FAIL);

        let task = fx.registry.rebind_sockets(fx.handle).unwrap();
        tokio::task::yield_now().await;
        assert!(fx.registry.destroy(fx.handle));

        task.await.unwrap();
        assert_eq!(fx.engine.last_device().unwrap().bind_attempts(), 1);
        assert!(!fx.gave_up());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_handle_reused() {
        let fx = fixture(ALWAYS_FAIL);

        let task = fx.registry.rebind_sockets(fx.handle).unwrap();
        tokio::task::yield_now().await;
        fx.registry.destroy(fx.handle);
        let reused = fx
            .registry
            .create(
                "utun2",
                "",
                IoSource::Device(Box::new(MockTun::new(TunConfig::new("utun2")))),
            )
            .unwrap();
        assert_eq!(reused, fx.handle);

        task.await.unwrap();
        assert_eq!(fx.engine.devices()[0].bind_attempts(), 1);
        assert_eq!(fx.engine.devices()[1].bind_attempts(), 0);
    }

    #[tokio::test]
    async fn test_unknown_handle() {
        let fx = fixture(0);
        fx.registry.destroy(fx.handle);
        assert!(fx.registry.rebind_sockets(fx.handle).is_none());
    }
}
