// ============================================
// File: crates/wgbridge-core/src/uapi/endpoints.rs
// ============================================
//! # Endpoints-Only Fragments
//!
//! ## Creation Reason
//! After a network change, re-applying each peer's `endpoint=` line makes
//! the engine resolve hostnames again without touching keys or sessions.
//! This module reduces a full configuration to exactly those lines.
//!
//! ## Algorithm
//! ```text
//! listen_port=...   ──► kept (defaults to listen_port=0)
//! public_key=A      ──► opens block A
//! endpoint=X        ──► remembered for A
//! remove=true       ──► forgets A and X
//! public_key=B      ──► flushes A/X if both present, opens B
//! <end>             ──► flushes the last block
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - This scan is lenient on purpose: it runs over text the engine already
//!   accepted, and must never fail
//! - The endpoint is reset at every `public_key=`, so one peer's endpoint
//!   is never attributed to the next
//!
//! ## Last Modified
//! v0.1.0 - Initial implementation

use std::fmt::Write as _;

use tracing::trace;

use crate::uapi::{KEY_ENDPOINT, KEY_LISTEN_PORT, KEY_PUBLIC_KEY, KEY_REMOVE};

/// Reduces `settings` to its listen port plus `public_key`/`endpoint`
/// pairs of peers that have a non-removed endpoint.
///
/// # Example
/// ```
/// use wgbridge_core::uapi::endpoints_only;
///
/// let out = endpoints_only("private_key=00\npublic_key=A\nendpoint=1.2.3.4:1\n");
/// assert_eq!(out, "listen_port=0\npublic_key=A\nendpoint=1.2.3.4:1\n");
/// ```
#[must_use]
pub fn endpoints_only(settings: &str) -> String {
    let mut listen_port: Option<&str> = None;
    let mut peers = String::new();
    let mut pubkey: Option<&str> = None;
    let mut endpoint: Option<&str> = None;
    let mut kept = 0usize;

    for raw in settings.split('\n') {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        let (key, value) = line.split_once('=').unwrap_or((line, ""));

        if key == KEY_LISTEN_PORT {
            listen_port = Some(line);
        } else if key == KEY_PUBLIC_KEY {
            kept += usize::from(flush(pubkey, endpoint, &mut peers));
            pubkey = Some(line);
            endpoint = None;
        } else if key == KEY_ENDPOINT {
            endpoint = Some(line);
        } else if key == KEY_REMOVE && value == "true" {
            pubkey = None;
            endpoint = None;
        }
    }
    kept += usize::from(flush(pubkey, endpoint, &mut peers));
    trace!(peers = kept, "Extracted endpoints-only fragment");

    let mut out = String::with_capacity(peers.len() + 16);
    out.push_str(listen_port.unwrap_or("listen_port=0"));
    out.push('\n');
    out.push_str(&peers);
    out
}

fn flush(pubkey: Option<&str>, endpoint: Option<&str>, out: &mut String) -> bool {
    let (Some(pk), Some(ep)) = (pubkey, endpoint) else {
        return false;
    };
    // Writing to a String cannot fail.
    let _ = writeln!(out, "{pk}\n{ep}");
    true
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removed_peer_is_omitted() {
        let settings = "private_key=11\nlisten_port=51820\n\
            public_key=A\nendpoint=1.2.3.4:51820\nallowed_ip=10.0.0.1/32\n\
            public_key=B\nremove=true\n\
            public_key=C\nendpoint=5.6.7.8:51820\n";

        assert_eq!(
            endpoints_only(settings),
            "listen_port=51820\npublic_key=A\nendpoint=1.2.3.4:51820\npublic_key=C\nendpoint=5.6.7.8:51820\n"
        );
    }

    #[test]
    fn test_missing_listen_port_defaults_to_zero() {
        let out = endpoints_only("public_key=A\nendpoint=h:1\n");
        assert!(out.starts_with("listen_port=0\n"));
    }

    #[test]
    fn test_peer_without_endpoint_is_excluded() {
        let out = endpoints_only("public_key=A\npublic_key=B\nendpoint=h:2\n");
        assert_eq!(out, "listen_port=0\npublic_key=B\nendpoint=h:2\n");
    }

    #[test]
    fn test_endpoint_does_not_leak_into_next_peer() {
        let out = endpoints_only("public_key=A\nendpoint=h:1\npublic_key=B\n");
        assert_eq!(out, "listen_port=0\npublic_key=A\nendpoint=h:1\n");
    }

    #[test]
    fn test_remove_after_endpoint_discards_block() {
        let out = endpoints_only("public_key=A\nendpoint=h:1\nremove=true\n");
        assert_eq!(out, "listen_port=0\n");
    }

    #[test]
    fn test_remove_false_keeps_block() {
        let out = endpoints_only("public_key=A\nremove=false\nendpoint=h:1\n");
        assert_eq!(out, "listen_port=0\npublic_key=A\nendpoint=h:1\n");
    }

    #[test]
    fn test_last_endpoint_wins() {
        let out = endpoints_only("public_key=A\nendpoint=h:1\nendpoint=h:2\n");
        assert_eq!(out, "listen_port=0\npublic_key=A\nendpoint=h:2\n");
    }

    #[test]
    fn test_empty_settings() {
        assert_eq!(endpoints_only(""), "listen_port=0\n");
    }
}
