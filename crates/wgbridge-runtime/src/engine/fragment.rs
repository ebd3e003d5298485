// ============================================
// File: crates/wgbridge-runtime/src/engine/fragment.rs
// ============================================
//! # Configuration Fragment Parser
//!
//! Splits `ipc_set` text into a device preamble and peer blocks for
//! `MemoryEngine`. Every `public_key=` line opens a new block; anything
//! before the first one belongs to the device.
//!
//! Errors are `IpcError::INVALID`, the code the engine itself uses for
//! malformed input.

use wgbridge_core::uapi::{KEY_PUBLIC_KEY, KEY_REMOVE};
use wgbridge_core::IpcError;

/// Length of a decoded public, private or preshared key.
pub(crate) const KEY_LEN: usize = 32;

/// One `key=value` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Entry {
    pub(crate) key: String,
    pub(crate) value: String,
}

/// The opening `public_key=` line and the attributes that follow it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PeerBlock {
    pub(crate) public_key: String,
    pub(crate) entries: Vec<Entry>,
}

impl PeerBlock {
    /// Last value for `key`.
    pub(crate) fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.key == key)
            .map(|e| e.value.as_str())
    }

    pub(crate) fn is_removed(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.key == KEY_REMOVE && e.value == "true")
    }
}

/// A parsed `ipc_set` transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ConfigFragment {
    pub(crate) device: Vec<Entry>,
    pub(crate) peers: Vec<PeerBlock>,
}

impl ConfigFragment {
    /// Parses configuration text. Blank lines and a trailing `\r` are
    /// tolerated.
    pub(crate) fn parse(text: &str) -> Result<Self, IpcError> {
        let mut fragment = Self::default();

        for (idx, raw) in text.split('\n').enumerate() {
            let line = raw.strip_suffix('\r').unwrap_or(raw);
            if line.is_empty() {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(IpcError::invalid(format!("line {}: missing '='", idx + 1)));
            };

            if key == KEY_PUBLIC_KEY {
                validate_key(KEY_PUBLIC_KEY, value)?;
                fragment.peers.push(PeerBlock {
                    public_key: value.to_owned(),
                    entries: Vec::new(),
                });
                continue;
            }

            let entry = Entry {
                key: key.to_owned(),
                value: value.to_owned(),
            };
            match fragment.peers.last_mut() {
                Some(peer) => peer.entries.push(entry),
                None => fragment.device.push(entry),
            }
        }

        Ok(fragment)
    }
}

/// Checks that `value` is a hex-encoded 32-byte key.
pub(crate) fn validate_key(key: &str, value: &str) -> Result<(), IpcError> {
    let bytes = hex::decode(value).map_err(|e| IpcError::invalid(format!("{key}: {e}")))?;
    if bytes.len() != KEY_LEN {
        return Err(IpcError::invalid(format!(
            "{key}: expected {KEY_LEN} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(())
}
