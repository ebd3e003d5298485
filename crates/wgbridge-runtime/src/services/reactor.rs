// ============================================
// File: crates/wgbridge-runtime/src/services/reactor.rs
// ============================================
//! # Network-Change Reactor
//!
//! ## Creation Reason
//! When the device changes networks, peers whose endpoints are hostnames
//! may now resolve differently. Re-applying each tunnel's endpoints-only
//! fragment makes the engine resolve them again without touching keys or
//! sessions.
//!
//! ## Main Functionality
//! - Consumes `NetworkChange` events from the route monitor and the host
//! - Debounces per tunnel: the first event starts a timer, later events
//!   are coalesced into it
//! - On expiry re-applies the cached fragment to the tunnel's device
//!
//! ## State Machine (per tunnel)
//! ```text
//!            change event
//!   ┌──────┐ ───────────► ┌─────────┐
//!   │ Idle │              │ Pending │ ◄── change event (ignored)
//!   └──────┘ ◄─────────── └─────────┘
//!            timer fires:
//!            apply endpoints
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - State transitions happen under the registry lock, see
//!   `TunnelRegistry::schedule_reresolve` / `finish_reresolve`
//! - Events do NOT reset a running timer
//! - A timer whose tunnel was destroyed and whose handle was reused does
//!   nothing; generations are compared
//!
//! ## Last Modified
//! v0.1.0 - Initial reactor implementation

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use wgbridge_core::TunnelHandle;
use wgbridge_transport::NetworkChange;

use crate::config::ReactorConfig;
use crate::services::registry::TunnelRegistry;

/// Capacity of the network-change queue. Extra events are dropped; one
/// queued event is as good as many.
pub const CHANGE_QUEUE_DEPTH: usize = 16;

/// Debounced endpoint re-resolution for every tunnel.
pub struct NetworkReactor {
    registry: Arc<TunnelRegistry>,
    debounce: Duration,
    changes: mpsc::Receiver<NetworkChange>,
}

impl NetworkReactor {
    /// Creates a reactor and returns the sender feeding it.
    pub fn new(registry: Arc<TunnelRegistry>, config: &ReactorConfig) -> (Self, mpsc::Sender<NetworkChange>) {
        let (tx, rx) = mpsc::channel(CHANGE_QUEUE_DEPTH);
        (
            Self {
                registry,
                debounce: config.debounce(),
                changes: rx,
            },
            tx,
        )
    }

    /// Processes change events until shutdown.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(debounce = ?self.debounce, "Network reactor started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => { info!("Network reactor stopping"); break; }
                Some(change) = self.changes.recv() => {
                    let scheduled = schedule(&self.registry, self.debounce);
                    debug!(source = ?change.source, scheduled, "Network change");
                }
            }
        }
    }
}

/// Moves every idle tunnel to `Pending` and starts its timer. Returns the
/// number of timers started.
pub fn schedule(registry: &Arc<TunnelRegistry>, debounce: Duration) -> usize {
    let runtime = registry.runtime().clone();
    registry.schedule_reresolve(|handle, generation| {
        let registry = Arc::clone(registry);
        runtime.spawn(async move {
            tokio::time::sleep(debounce).await;
            reresolve(&registry, handle, generation);
        })
    })
}

fn reresolve(registry: &TunnelRegistry, handle: TunnelHandle, generation: u64) {
    let Some((endpoints, tunnel)) = registry.finish_reresolve(handle, generation) else {
        debug!(handle = %handle, "Tunnel gone before re-resolution");
        return;
    };

    let logger = &tunnel.logger;
    logger.debug("Network change detected");
    logger.info("Setting endpoints for re-resolution due to network change");
    if let Err(e) = tunnel.device.ipc_set(&endpoints) {
        logger.error(&format!("Unable to set endpoints for re-resolution: {e}"));
    }
}

// ============================================
// Tests
// ============================================
