// ============================================
// File: crates/wgbridge-runtime/src/engine/memory.rs
// ============================================
//! # In-Memory Tunnel Engine
//!
//! ## Creation Reason
//! Registry, reactor and bridge tests need an engine that behaves like the
//! real one at the configuration level without any cryptography or
//! sockets.
//!
//! ## Main Functionality
//! - Applies configuration fragments atomically to an in-memory state
//! - Serializes that state back in the same line format
//! - Counts `bind_update`, keepalive and scope-binding calls
//! - Failure injection for creation, configuration and rebinds
//!
//! ## Handshake Model
//! There is no handshake. A peer counts as holding a current keypair once
//! the device is up and the peer has an endpoint.
//!
//! ## ⚠️ Important Note for Next Developer
//! - This is for testing only - do not use in production
//! - Unknown keys are rejected with `IpcError::PROTOCOL`, malformed values
//!   with `IpcError::INVALID`
//!
//! ## Last Modified
//! v0.1.0 - Initial in-memory engine

use std::io;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use wgbridge_core::uapi::{KEY_ENDPOINT, KEY_LISTEN_PORT, KEY_PUBLIC_KEY, KEY_REMOVE};
use wgbridge_core::{IpcError, LogLevel};
use wgbridge_transport::TunDevice;

use super::fragment::{validate_key, ConfigFragment};
use super::{AddressFamily, DeviceLogger, TunnelDevice, TunnelEngine};
use crate::error::{Result, RuntimeError};

const KEY_PRIVATE_KEY: &str = "private_key";
const KEY_FWMARK: &str = "fwmark";
const KEY_REPLACE_PEERS: &str = "replace_peers";
const KEY_PRESHARED_KEY: &str = "preshared_key";
const KEY_KEEPALIVE: &str = "persistent_keepalive_interval";
const KEY_REPLACE_ALLOWED_IPS: &str = "replace_allowed_ips";
const KEY_ALLOWED_IP: &str = "allowed_ip";
const KEY_UPDATE_ONLY: &str = "update_only";
const KEY_PROTOCOL_VERSION: &str = "protocol_version";

/// Bind failure count meaning "never succeed".
pub const ALWAYS_FAIL: u32 = u32::MAX;

// ============================================
// MemoryEngine
// ============================================

/// Engine that keeps every device in memory.
#[derive(Default)]
pub struct MemoryEngine {
    devices: Mutex<Vec<Arc<MemoryDevice>>>,
    create_failure: Mutex<Option<String>>,
    bind_failures: AtomicU32,
}

impl MemoryEngine {
    /// Creates an engine with no failure injection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `create_device` call fail with `reason`.
    pub fn fail_next_create(&self, reason: impl Into<String>) {
        *self.create_failure.lock() = Some(reason.into());
    }

    /// Sets how many `bind_update` calls fail on devices created from now on.
    pub fn set_bind_failures(&self, failures: u32) {
        self.bind_failures.store(failures, Ordering::SeqCst);
    }

    /// Returns every device created so far, oldest first.
    #[must_use]
    pub fn devices(&self) -> Vec<Arc<MemoryDevice>> {
        self.devices.lock().clone()
    }

    /// Returns the most recently created device.
    #[must_use]
    pub fn last_device(&self) -> Option<Arc<MemoryDevice>> {
        self.devices.lock().last().cloned()
    }
}

impl TunnelEngine for MemoryEngine {
    fn create_device(
        &self,
        tun: Box<dyn TunDevice>,
        logger: Arc<dyn DeviceLogger>,
    ) -> Result<Arc<dyn TunnelDevice>> {
        if let Some(reason) = self.create_failure.lock().take() {
            tun.close();
            return Err(RuntimeError::device_creation(tun.name(), reason));
        }

        let device = Arc::new(MemoryDevice {
            tun,
            logger,
            state: Mutex::new(DeviceState::default()),
            ipc_set_failure: Mutex::new(None),
            bind_failures: AtomicU32::new(self.bind_failures.load(Ordering::SeqCst)),
            bind_attempts: AtomicU32::new(0),
            keepalives_sent: AtomicU64::new(0),
            ipc_set_calls: Mutex::new(Vec::new()),
            scope_bindings: Mutex::new(Vec::new()),
        });
        device.logger.log(LogLevel::Debug, "Device created");

        self.devices.lock().push(Arc::clone(&device));
        Ok(device)
    }
}

// ============================================
// Device State
// ============================================

#[derive(Debug, Clone, Default)]
struct DeviceState {
    private_key: Option<String>,
    listen_port: Option<u16>,
    fwmark: Option<u32>,
    peers: Vec<PeerState>,
    up: bool,
    closed: bool,
    roaming: bool,
}

#[derive(Debug, Clone)]
struct PeerState {
    public_key: String,
    preshared_key: Option<String>,
    endpoint: Option<String>,
    keepalive: u16,
    allowed_ips: Vec<String>,
}

impl PeerState {
    fn new(public_key: &str) -> Self {
        Self {
            public_key: public_key.to_owned(),
            preshared_key: None,
            endpoint: None,
            keepalive: 0,
            allowed_ips: Vec::new(),
        }
    }
}

fn parse_bool(key: &str, value: &str) -> std::result::Result<bool, IpcError> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(IpcError::invalid(format!("{key}: expected true or false"))),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> std::result::Result<T, IpcError> {
    value
        .parse()
        .map_err(|_| IpcError::invalid(format!("{key}: invalid number '{value}'")))
}

impl DeviceState {
    fn apply(&mut self, fragment: &ConfigFragment) -> std::result::Result<(), IpcError> {
        for entry in &fragment.device {
            let value = entry.value.as_str();
            match entry.key.as_str() {
                KEY_PRIVATE_KEY => {
                    validate_key(KEY_PRIVATE_KEY, value)?;
                    self.private_key = Some(value.to_owned());
                }
                KEY_LISTEN_PORT => {
                    self.listen_port = Some(parse_number(KEY_LISTEN_PORT, value)?);
                }
                KEY_FWMARK => {
                    self.fwmark = Some(parse_number(KEY_FWMARK, value)?);
                }
                KEY_REPLACE_PEERS => {
                    if parse_bool(KEY_REPLACE_PEERS, value)? {
                        self.peers.clear();
                    }
                }
                other => return Err(IpcError::protocol(format!("unknown device key '{other}'"))),
            }
        }

        for block in &fragment.peers {
            let update_only = block
                .get(KEY_UPDATE_ONLY)
                .map(|v| parse_bool(KEY_UPDATE_ONLY, v))
                .transpose()?
                .unwrap_or(false);

            let existing = self
                .peers
                .iter()
                .position(|p| p.public_key == block.public_key);

            if block.is_removed() {
                if let Some(idx) = existing {
                    self.peers.remove(idx);
                }
                continue;
            }

            let idx = match existing {
                Some(idx) => idx,
                None if update_only => continue,
                None => {
                    self.peers.push(PeerState::new(&block.public_key));
                    self.peers.len() - 1
                }
            };
            let peer = &mut self.peers[idx];

            for entry in &block.entries {
                let value = entry.value.as_str();
                match entry.key.as_str() {
                    KEY_ENDPOINT => {
                        if value.rsplit_once(':').is_none() {
                            return Err(IpcError::invalid(format!("endpoint: missing port in '{value}'")));
                        }
                        peer.endpoint = Some(value.to_owned());
                    }
                    KEY_PRESHARED_KEY => {
                        validate_key(KEY_PRESHARED_KEY, value)?;
                        peer.preshared_key = Some(value.to_owned());
                    }
                    KEY_KEEPALIVE => peer.keepalive = parse_number(KEY_KEEPALIVE, value)?,
                    KEY_REPLACE_ALLOWED_IPS => {
                        if parse_bool(KEY_REPLACE_ALLOWED_IPS, value)? {
                            peer.allowed_ips.clear();
                        }
                    }
                    KEY_ALLOWED_IP => {
                        if !value.contains('/') {
                            return Err(IpcError::invalid(format!("allowed_ip: missing prefix in '{value}'")));
                        }
                        peer.allowed_ips.push(value.to_owned());
                    }
                    KEY_PROTOCOL_VERSION => {
                        if value != "1" {
                            return Err(IpcError::invalid(format!("unsupported protocol version {value}")));
                        }
                    }
                    KEY_REMOVE | KEY_UPDATE_ONLY => {}
                    other => return Err(IpcError::protocol(format!("unknown peer key '{other}'"))),
                }
            }
        }

        Ok(())
    }

    fn render(&self) -> String {
        let mut out = String::new();
        if let Some(key) = &self.private_key {
            out.push_str(&format!("{KEY_PRIVATE_KEY}={key}\n"));
        }
        if let Some(port) = self.listen_port {
            out.push_str(&format!("{KEY_LISTEN_PORT}={port}\n"));
        }
        if let Some(mark) = self.fwmark {
            out.push_str(&format!("{KEY_FWMARK}={mark}\n"));
        }
        for peer in &self.peers {
            out.push_str(&format!("{KEY_PUBLIC_KEY}={}\n", peer.public_key));
            if let Some(psk) = &peer.preshared_key {
                out.push_str(&format!("{KEY_PRESHARED_KEY}={psk}\n"));
            }
            if let Some(endpoint) = &peer.endpoint {
                out.push_str(&format!("{KEY_ENDPOINT}={endpoint}\n"));
            }
            out.push_str(&format!("{KEY_KEEPALIVE}={}\n", peer.keepalive));
            for ip in &peer.allowed_ips {
                out.push_str(&format!("{KEY_ALLOWED_IP}={ip}\n"));
            }
        }
        out
    }
}

// ============================================
// MemoryDevice
// ============================================

/// Device created by [`MemoryEngine`].
pub struct MemoryDevice {
    tun: Box<dyn TunDevice>,
    logger: Arc<dyn DeviceLogger>,
    state: Mutex<DeviceState>,
    ipc_set_failure: Mutex<Option<IpcError>>,
    bind_failures: AtomicU32,
    bind_attempts: AtomicU32,
    keepalives_sent: AtomicU64,
    ipc_set_calls: Mutex<Vec<String>>,
    scope_bindings: Mutex<Vec<(AddressFamily, u32)>>,
}

impl MemoryDevice {
    /// Makes the next `ipc_set` call fail with `error`.
    pub fn fail_next_ipc_set(&self, error: IpcError) {
        *self.ipc_set_failure.lock() = Some(error);
    }

    /// Sets how many further `bind_update` calls fail.
    pub fn set_bind_failures(&self, failures: u32) {
        self.bind_failures.store(failures, Ordering::SeqCst);
    }

    /// Name of the underlying packet device.
    #[must_use]
    pub fn name(&self) -> &str {
        self.tun.name()
    }

    /// MTU of the underlying packet device.
    #[must_use]
    pub fn mtu(&self) -> u16 {
        self.tun.mtu()
    }

    /// Returns `true` once `up()` succeeded and the device is not closed.
    #[must_use]
    pub fn is_up(&self) -> bool {
        let state = self.state.lock();
        state.up && !state.closed
    }

    /// Returns `true` once `close()` was called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Current roaming policy.
    #[must_use]
    pub fn roaming(&self) -> bool {
        self.state.lock().roaming
    }

    /// Number of `bind_update` calls so far.
    #[must_use]
    pub fn bind_attempts(&self) -> u32 {
        self.bind_attempts.load(Ordering::SeqCst)
    }

    /// Number of keepalives sent so far, summed over peers.
    #[must_use]
    pub fn keepalives_sent(&self) -> u64 {
        self.keepalives_sent.load(Ordering::SeqCst)
    }

    /// Every fragment passed to `ipc_set`, including rejected ones.
    #[must_use]
    pub fn ipc_set_calls(&self) -> Vec<String> {
        self.ipc_set_calls.lock().clone()
    }

    /// Every successful `bind_socket_to_interface` call.
    #[must_use]
    pub fn scope_bindings(&self) -> Vec<(AddressFamily, u32)> {
        self.scope_bindings.lock().clone()
    }
}

impl TunnelDevice for MemoryDevice {
    fn ipc_set(&self, config: &str) -> std::result::Result<(), IpcError> {
        self.ipc_set_calls.lock().push(config.to_owned());

        if let Some(error) = self.ipc_set_failure.lock().take() {
            return Err(error);
        }

        let fragment = ConfigFragment::parse(config)?;

        let mut state = self.state.lock();
        if state.closed {
            return Err(IpcError::io("device is closed"));
        }
        let mut next = state.clone();
        next.apply(&fragment)?;
        *state = next;
        drop(state);

        self.logger.log(LogLevel::Debug, "UAPI: Updating configuration");
        Ok(())
    }

    fn ipc_get(&self) -> std::result::Result<String, IpcError> {
        let state = self.state.lock();
        if state.closed {
            return Err(IpcError::io("device is closed"));
        }
        Ok(state.render())
    }

    fn up(&self) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "device is closed"));
        }
        state.up = true;
        drop(state);
        self.logger.log(LogLevel::Debug, "Interface state was Down, requested Up, now Up");
        Ok(())
    }

    fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.up = false;
        drop(state);

        self.tun.close();
        self.logger.log(LogLevel::Debug, "Device closed");
    }

    fn bind_update(&self) -> io::Result<()> {
        self.bind_attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .bind_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                ALWAYS_FAIL => Some(ALWAYS_FAIL),
                n => Some(n - 1),
            })
            .is_ok();

        if failing {
            return Err(io::Error::new(io::ErrorKind::AddrNotAvailable, "no route to bind"));
        }
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "device is closed"));
        }
        Ok(())
    }

    fn send_keepalives_to_peers_with_current_keypair(&self) {
        let state = self.state.lock();
        if !state.up || state.closed {
            return;
        }
        let count = state.peers.iter().filter(|p| p.endpoint.is_some()).count();
        drop(state);
        self.keepalives_sent.fetch_add(count as u64, Ordering::SeqCst);
    }

    fn set_roaming(&self, enabled: bool) {
        self.state.lock().roaming = enabled;
    }

    fn bind_socket_to_interface(&self, family: AddressFamily, scope: u32) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "device is closed"));
        }
        self.scope_bindings.lock().push((family, scope));
        Ok(())
    }
}

impl std::fmt::Debug for MemoryDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryDevice")
            .field("name", &self.tun.name())
            .field("up", &state.up)
            .field("closed", &state.closed)
            .field("peers", &state.peers.len())
            .finish_non_exhaustive()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use wgbridge_transport::{MockTun, TunConfig};

    use super::*;

    struct NullLogger;

    impl DeviceLogger for NullLogger {
        fn log(&self, _level: LogLevel, _message: &str) {}
    }

    fn key(c: char) -> String {
        std::iter::repeat(c).take(64).collect()
    }

    fn device(engine: &MemoryEngine) -> Arc<dyn TunnelDevice> {
        engine
            .create_device(
                Box::new(MockTun::new(TunConfig::new("mem0"))),
                Arc::new(NullLogger),
            )
            .unwrap()
    }

    #[test]
    fn test_set_then_get() {
        let engine = MemoryEngine::new();
        let dev = device(&engine);

        let config = format!(
            "private_key={}\nlisten_port=51820\npublic_key={}\nendpoint=10.0.0.1:51820\nallowed_ip=0.0.0.0/0\n",
            key('a'),
            key('b')
        );
        dev.ipc_set(&config).unwrap();

        let dump = dev.ipc_get().unwrap();
        assert!(dump.contains("listen_port=51820"));
        assert!(dump.contains(&format!("public_key={}", key('b'))));
        assert!(dump.contains("endpoint=10.0.0.1:51820"));
        assert!(dump.contains("allowed_ip=0.0.0.0/0"));
    }

    #[test]
    fn test_failed_set_leaves_state_unchanged() {
        let engine = MemoryEngine::new();
        let dev = device(&engine);
        dev.ipc_set("listen_port=1000\n").unwrap();

        let err = dev.ipc_set("listen_port=2000\nbogus=1\n").unwrap_err();
        assert_eq!(err.code(), IpcError::PROTOCOL);
        assert!(dev.ipc_get().unwrap().contains("listen_port=1000"));

        let err = dev.ipc_set("listen_port=notaport\n").unwrap_err();
        assert_eq!(err.code(), IpcError::INVALID);

        let err = dev.ipc_set("no equals sign\n").unwrap_err();
        assert_eq!(err.code(), IpcError::INVALID);
    }

    #[test]
    fn test_peer_update_and_remove() {
        let engine = MemoryEngine::new();
        let dev = device(&engine);
        let peer = key('c');

        dev.ipc_set(&format!("public_key={peer}\nendpoint=1.1.1.1:1\n")).unwrap();
        dev.ipc_set(&format!("public_key={peer}\nupdate_only=true\nendpoint=2.2.2.2:2\n"))
            .unwrap();
        assert!(dev.ipc_get().unwrap().contains("endpoint=2.2.2.2:2"));

        dev.ipc_set(&format!("public_key={}\nupdate_only=true\nendpoint=3.3.3.3:3\n", key('d')))
            .unwrap();
        assert!(!dev.ipc_get().unwrap().contains("3.3.3.3"));

        dev.ipc_set(&format!("public_key={peer}\nremove=true\n")).unwrap();
        assert!(!dev.ipc_get().unwrap().contains(&peer));
    }

    #[test]
    fn test_bind_failures_then_success() {
        let engine = MemoryEngine::new();
        engine.set_bind_failures(2);
        let dev = device(&engine);

        assert!(dev.bind_update().is_err());
        assert!(dev.bind_update().is_err());
        assert!(dev.bind_update().is_ok());
        assert_eq!(engine.last_device().unwrap().bind_attempts(), 3);
    }

    #[test]
    fn test_keepalives_only_when_up() {
        let engine = MemoryEngine::new();
        let dev = device(&engine);
        dev.ipc_set(&format!(
            "public_key={}\nendpoint=1.1.1.1:1\npublic_key={}\n",
            key('e'),
            key('f')
        ))
        .unwrap();

        dev.send_keepalives_to_peers_with_current_keypair();
        let mem = engine.last_device().unwrap();
        assert_eq!(mem.keepalives_sent(), 0);

        dev.up().unwrap();
        dev.send_keepalives_to_peers_with_current_keypair();
        assert_eq!(mem.keepalives_sent(), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let engine = MemoryEngine::new();
        let dev = device(&engine);
        dev.up().unwrap();
        dev.close();
        dev.close();

        let mem = engine.last_device().unwrap();
        assert!(mem.is_closed());
        assert!(!mem.is_up());
        assert!(dev.ipc_get().is_err());
        assert!(dev.bind_socket_to_interface(AddressFamily::V4, 3).is_err());
    }

    #[test]
    fn test_create_failure_injection() {
        let engine = MemoryEngine::new();
        engine.fail_next_create("out of memory");
        let err = engine
            .create_device(Box::new(MockTun::default()), Arc::new(NullLogger))
            .err()
            .unwrap();
        assert!(err.to_string().contains("out of memory"));
        assert!(engine.devices().is_empty());

        let _ = device(&engine);
        assert_eq!(engine.devices().len(), 1);
    }
}
