// ============================================
// File: crates/wgbridge-runtime/src/services/registry.rs
// ============================================
//! # Tunnel Handle Registry
//!
//! ## Creation Reason
//! Hosts refer to tunnels by small integers. The registry maps those
//! handles to live devices and serializes every lookup, insertion and
//! removal behind one lock.
//!
//! ## Main Functionality
//! - Tunnel creation from a descriptor, host callbacks or a ready device
//! - Lowest-free handle allocation (first gap from 0)
//! - Configuration set/get, roaming policy, interface scoping
//! - Reactor state per tunnel (`Idle` / `Pending`)
//!
//! ## Handle Allocation
//! ```text
//! live: {0, 1, 3}      create → 2
//! live: {0, 1, 2, 3}   create → 4
//! live: {1, 2}         create → 0
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Engine calls are never made while `tunnels` is locked; clone the
//!   device `Arc` out, drop the guard, then call
//! - Every record carries a generation number so background tasks can
//!   tell a reused handle from the tunnel they started on
//! - `destroy` aborts a pending debounce timer under the lock, and
//!   closes the device after releasing it
//!
//! ## Last Modified
//! v0.1.0 - Initial registry implementation

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use wgbridge_core::{endpoints_only, TunnelHandle};
use wgbridge_transport::{
    CallbackTun, HostContext, ReadFn, TransportError, TunConfig, TunDevice, WriteFn,
};

#[cfg(unix)]
use std::os::unix::io::RawFd;
#[cfg(unix)]
use wgbridge_transport::FdTun;

use crate::config::{RebindConfig, RuntimeConfig};
use crate::engine::{AddressFamily, TunnelDevice, TunnelEngine};
use crate::error::{Result, RuntimeError};
use crate::logging::{LogBridge, TunnelLogger};
use crate::services::rebind;

/// Errors returned by registry operations.
pub type RegistryError = RuntimeError;

// ============================================
// IoSource
// ============================================

/// Where a new tunnel reads and writes packets.
pub enum IoSource {
    /// A kernel TUN descriptor owned by the host; it is duplicated.
    #[cfg(unix)]
    Descriptor(RawFd),

    /// Host read/write functions. An `mtu` of 0 selects the configured
    /// default.
    Callbacks {
        /// Packet read function.
        read: ReadFn,
        /// Packet write function.
        write: WriteFn,
        /// Opaque pointer passed to both functions.
        ctx: HostContext,
        /// Device MTU.
        mtu: u16,
    },

    /// An already-built device.
    Device(Box<dyn TunDevice>),
}

impl std::fmt::Debug for IoSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            #[cfg(unix)]
            Self::Descriptor(fd) => f.debug_tuple("Descriptor").field(fd).finish(),
            Self::Callbacks { mtu, .. } => f.debug_struct("Callbacks").field("mtu", mtu).finish_non_exhaustive(),
            Self::Device(dev) => f.debug_tuple("Device").field(&dev.name()).finish(),
        }
    }
}

// ============================================
// TunnelRecord
// ============================================

/// Debounce state of one tunnel.
#[derive(Debug, Default)]
pub(crate) enum ReresolveState {
    /// No re-resolution scheduled.
    #[default]
    Idle,
    /// A timer task will re-apply the endpoints.
    Pending(JoinHandle<()>),
}

/// Public view of [`ReresolveState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReresolveStatus {
    /// No re-resolution scheduled.
    Idle,
    /// A debounce timer is running.
    Pending,
}

pub(crate) struct TunnelRecord {
    device: Arc<dyn TunnelDevice>,
    logger: TunnelLogger,
    generation: u64,
    reresolve: ReresolveState,
    endpoints: Arc<str>,
}

/// Snapshot of a live tunnel handed to background tasks.
#[derive(Clone)]
pub(crate) struct TunnelRef {
    pub(crate) device: Arc<dyn TunnelDevice>,
    pub(crate) logger: TunnelLogger,
    pub(crate) generation: u64,
}

// ============================================
// TunnelRegistry
// ============================================

/// Registry of live tunnels.
pub struct TunnelRegistry {
    engine: Arc<dyn TunnelEngine>,
    log_bridge: Arc<LogBridge>,
    runtime: Handle,
    default_mtu: u16,
    max_tunnels: usize,
    rebind: RebindConfig,
    default_roaming: AtomicBool,
    next_generation: AtomicU64,
    tunnels: Mutex<BTreeMap<TunnelHandle, TunnelRecord>>,
}

impl TunnelRegistry {
    /// Creates an empty registry whose background tasks run on `runtime`.
    pub fn new(
        engine: Arc<dyn TunnelEngine>,
        log_bridge: Arc<LogBridge>,
        runtime: Handle,
        config: &RuntimeConfig,
    ) -> Self {
        Self {
            engine,
            log_bridge,
            runtime,
            default_mtu: config.tunnel.default_mtu,
            max_tunnels: config.tunnel.max_tunnels,
            rebind: config.rebind.clone(),
            default_roaming: AtomicBool::new(config.tunnel.roaming),
            next_generation: AtomicU64::new(0),
            tunnels: Mutex::new(BTreeMap::new()),
        }
    }

    /// Runtime handle background tasks are spawned on.
    #[must_use]
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    // ========================================
    // Lifecycle
    // ========================================

    /// Creates, configures and starts a tunnel.
    ///
    /// On any failure no record is left behind and the device is closed.
    ///
    /// # Errors
    /// - `PacketDevice` if the `IoSource` cannot be turned into a device
    /// - `DeviceCreation` if the engine cannot create or start a device
    /// - `Protocol` if the engine rejects `initial_config`
    /// - `HandlesExhausted` if no handle is free
    pub fn create(
        &self,
        interface_name: &str,
        initial_config: &str,
        io_source: IoSource,
    ) -> Result<TunnelHandle> {
        let tun = self.build_tun(interface_name, io_source)?;
        let name = if interface_name.is_empty() {
            tun.name().to_owned()
        } else {
            interface_name.to_owned()
        };

        let logger = TunnelLogger::new(name.as_str(), Arc::clone(&self.log_bridge));
        let device = self.engine.create_device(tun, Arc::new(logger.clone()))?;

        if let Err(e) = device.ipc_set(initial_config) {
            logger.error(&format!("Unable to set IPC settings: {e}"));
            device.close();
            return Err(RuntimeError::Protocol(e));
        }

        device.set_roaming(self.default_roaming.load(Ordering::SeqCst));

        if let Err(e) = device.up() {
            logger.error(&format!("Unable to bring up device: {e}"));
            device.close();
            return Err(RuntimeError::device_creation(&name, e.to_string()));
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let record = TunnelRecord {
            device: Arc::clone(&device),
            logger: logger.clone(),
            generation,
            reresolve: ReresolveState::Idle,
            endpoints: endpoints_only(initial_config).into(),
        };

        let mut tunnels = self.tunnels.lock();
        let Some(handle) = lowest_free(&tunnels, self.max_tunnels) else {
            drop(tunnels);
            logger.error("Unable to find an empty tunnel handle");
            device.close();
            return Err(RuntimeError::HandlesExhausted {
                limit: self.max_tunnels,
            });
        };
        tunnels.insert(handle, record);
        drop(tunnels);

        info!(handle = %handle, interface = %name, "Tunnel created");
        logger.info("Device started");
        Ok(handle)
    }

    fn build_tun(&self, interface_name: &str, io_source: IoSource) -> Result<Box<dyn TunDevice>> {
        match io_source {
            #[cfg(unix)]
            IoSource::Descriptor(fd) => {
                let _guard = self.runtime.enter();
                let tun = FdTun::from_raw_fd(fd, self.default_mtu)
                    .map_err(|e| packet_device_failed(interface_name, e))?;
                Ok(Box::new(tun))
            }
            IoSource::Callbacks {
                read,
                write,
                ctx,
                mtu,
            } => {
                let mut config = if interface_name.is_empty() {
                    TunConfig::default()
                } else {
                    TunConfig::new(interface_name)
                };
                config.mtu = if mtu == 0 { self.default_mtu } else { mtu };

                let tun = CallbackTun::new(config, read, write, ctx)
                    .map_err(|e| packet_device_failed(interface_name, e))?;
                Ok(Box::new(tun))
            }
            IoSource::Device(tun) => Ok(tun),
        }
    }

    /// Removes and closes a tunnel. Returns `false` for unknown handles.
    pub fn destroy(&self, handle: TunnelHandle) -> bool {
        let mut tunnels = self.tunnels.lock();
        let Some(record) = tunnels.remove(&handle) else {
            return false;
        };
        if let ReresolveState::Pending(timer) = &record.reresolve {
            timer.abort();
        }
        drop(tunnels);

        record.device.close();
        info!(handle = %handle, interface = %record.logger.interface(), "Tunnel destroyed");
        true
    }

    // ========================================
    // Configuration
    // ========================================

    /// Applies a configuration fragment to a live tunnel.
    ///
    /// # Errors
    /// - `UnknownHandle` if `handle` is not registered
    /// - `Protocol` with the engine's code if the fragment is rejected
    pub fn apply_config(&self, handle: TunnelHandle, delta: &str) -> Result<()> {
        let tunnel = self.lookup(handle).ok_or(RuntimeError::unknown_handle(handle))?;
        tunnel.device.ipc_set(delta).map_err(|e| {
            tunnel.logger.error(&format!("Unable to set IPC settings: {e}"));
            RuntimeError::Protocol(e)
        })
    }

    /// Serializes a tunnel's configuration; `None` if unknown or unreadable.
    #[must_use]
    pub fn read_config(&self, handle: TunnelHandle) -> Option<String> {
        let tunnel = self.lookup(handle)?;
        match tunnel.device.ipc_get() {
            Ok(config) => Some(config),
            Err(e) => {
                tunnel.logger.error(&format!("Unable to get IPC settings: {e}"));
                None
            }
        }
    }

    /// Starts a background socket rebind. Returns `None` for unknown
    /// handles.
    pub fn rebind_sockets(self: &Arc<Self>, handle: TunnelHandle) -> Option<JoinHandle<()>> {
        let tunnel = self.lookup(handle)?;
        Some(rebind::spawn(Arc::clone(self), handle, tunnel, &self.rebind))
    }

    /// Sets the roaming policy of one tunnel.
    ///
    /// # Errors
    /// Returns `UnknownHandle` if `handle` is not registered.
    pub fn set_roaming_policy(&self, handle: TunnelHandle, enabled: bool) -> Result<()> {
        let tunnel = self.lookup(handle).ok_or(RuntimeError::unknown_handle(handle))?;
        tunnel.device.set_roaming(enabled);
        debug!(handle = %handle, enabled, "Roaming policy updated");
        Ok(())
    }

    /// Sets the roaming policy of every live and future tunnel.
    pub fn set_default_roaming(&self, enabled: bool) {
        self.default_roaming.store(enabled, Ordering::SeqCst);

        let devices: Vec<_> = self
            .tunnels
            .lock()
            .values()
            .map(|r| Arc::clone(&r.device))
            .collect();
        for device in devices {
            device.set_roaming(enabled);
        }
        info!(enabled, "Default roaming policy updated");
    }

    /// Returns the roaming policy applied to new tunnels.
    #[must_use]
    pub fn default_roaming(&self) -> bool {
        self.default_roaming.load(Ordering::SeqCst)
    }

    /// Scopes both outer sockets to interface `scope`. Failures are logged.
    pub fn bind_to_interface_scope(&self, handle: TunnelHandle, scope: u32) {
        let Some(tunnel) = self.lookup(handle) else {
            debug!(handle = %handle, "Ignoring interface scope for unknown handle");
            return;
        };

        for family in AddressFamily::ALL {
            if let Err(e) = tunnel.device.bind_socket_to_interface(family, scope) {
                tunnel
                    .logger
                    .error(&format!("Unable to bind {family} socket to interface: {e}"));
            }
        }
    }

    // ========================================
    // Introspection
    // ========================================

    /// Live handles in ascending order.
    #[must_use]
    pub fn handles(&self) -> Vec<TunnelHandle> {
        self.tunnels.lock().keys().copied().collect()
    }

    /// Number of live tunnels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tunnels.lock().len()
    }

    /// Returns `true` if no tunnel is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tunnels.lock().is_empty()
    }

    /// Returns `true` if `handle` is live.
    #[must_use]
    pub fn contains(&self, handle: TunnelHandle) -> bool {
        self.tunnels.lock().contains_key(&handle)
    }

    /// Debounce state of a tunnel.
    #[must_use]
    pub fn reresolve_state(&self, handle: TunnelHandle) -> Option<ReresolveStatus> {
        self.tunnels.lock().get(&handle).map(|r| match r.reresolve {
            ReresolveState::Idle => ReresolveStatus::Idle,
            ReresolveState::Pending(_) => ReresolveStatus::Pending,
        })
    }

    /// One line per live tunnel, for diagnostics.
    #[must_use]
    pub fn summary(&self) -> String {
        let tunnels = self.tunnels.lock();
        let mut out = format!("{} tunnel(s)\n", tunnels.len());
        for (handle, record) in tunnels.iter() {
            let state = match record.reresolve {
                ReresolveState::Idle => "idle",
                ReresolveState::Pending(_) => "pending",
            };
            let _ = writeln!(out, "  {handle}: {} ({state})", record.logger.interface());
        }
        out
    }

    // ========================================
    // Crate-internal access for services
    // ========================================

    pub(crate) fn lookup(&self, handle: TunnelHandle) -> Option<TunnelRef> {
        self.tunnels.lock().get(&handle).map(|r| TunnelRef {
            device: Arc::clone(&r.device),
            logger: r.logger.clone(),
            generation: r.generation,
        })
    }

    /// Returns `true` if `handle` still names the tunnel of `generation`.
    pub(crate) fn is_current(&self, handle: TunnelHandle, generation: u64) -> bool {
        self.tunnels
            .lock()
            .get(&handle)
            .is_some_and(|r| r.generation == generation)
    }

    /// Moves every idle tunnel to `Pending`, spawning its timer with
    /// `schedule(handle, generation)`. Returns the number scheduled.
    pub(crate) fn schedule_reresolve<F>(&self, mut schedule: F) -> usize
    where
        F: FnMut(TunnelHandle, u64) -> JoinHandle<()>,
    {
        let mut tunnels = self.tunnels.lock();
        let mut scheduled = 0;
        for (&handle, record) in tunnels.iter_mut() {
            if matches!(record.reresolve, ReresolveState::Idle) {
                record.reresolve = ReresolveState::Pending(schedule(handle, record.generation));
                scheduled += 1;
            }
        }
        scheduled
    }

    /// Returns a pending tunnel of `generation` to `Idle` and hands back
    /// its endpoints fragment with the tunnel itself. The caller applies
    /// the fragment to that device, never to whatever `handle` names later.
    pub(crate) fn finish_reresolve(
        &self,
        handle: TunnelHandle,
        generation: u64,
    ) -> Option<(Arc<str>, TunnelRef)> {
        let mut tunnels = self.tunnels.lock();
        let record = tunnels.get_mut(&handle)?;
        if record.generation != generation {
            return None;
        }
        record.reresolve = ReresolveState::Idle;
        let tunnel = TunnelRef {
            device: Arc::clone(&record.device),
            logger: record.logger.clone(),
            generation,
        };
        Some((Arc::clone(&record.endpoints), tunnel))
    }
}

impl Drop for TunnelRegistry {
    fn drop(&mut self) {
        let tunnels = std::mem::take(self.tunnels.get_mut());
        if !tunnels.is_empty() {
            warn!(count = tunnels.len(), "Registry dropped with live tunnels, closing them");
        }
        for record in tunnels.into_values() {
            if let ReresolveState::Pending(timer) = &record.reresolve {
                timer.abort();
            }
            record.device.close();
        }
    }
}

impl std::fmt::Debug for TunnelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelRegistry")
            .field("tunnels", &self.len())
            .field("max_tunnels", &self.max_tunnels)
            .field("default_roaming", &self.default_roaming())
            .finish_non_exhaustive()
    }
}

fn packet_device_failed(interface_name: &str, error: TransportError) -> RuntimeError {
    warn!(interface = %interface_name, errno = ?error.os_code(), "Unable to open packet device: {}", error);
    RuntimeError::packet_device(interface_name, error)
}

/// First handle not in `tunnels`, or `None` once `limit` are live.
fn lowest_free(tunnels: &BTreeMap<TunnelHandle, TunnelRecord>, limit: usize) -> Option<TunnelHandle> {
    if tunnels.len() >= limit {
        return None;
    }
    let mut candidate = TunnelHandle::FIRST;
    for &handle in tunnels.keys() {
        if handle != candidate {
            break;
        }
        candidate = candidate.next()?;
    }
    Some(candidate)
}

// ============================================
// Tests
// ============================================
