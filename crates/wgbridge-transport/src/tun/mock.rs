// ============================================
// File: crates/wgbridge-transport/src/tun/mock.rs
// ============================================
//! # Mock TUN Device Implementation
//!
//! ## Creation Reason
//! Lets the registry and engine tests run without a kernel interface or
//! host callbacks.
//!
//! ## Main Functionality
//! - Inbound queue the test fills with `push_inbound`
//! - Outbound capture drained with `drain_outbound`
//! - Link event injection
//! - Same close semantics as the real adapters
//!
//! ## Usage in Tests
//! ```ignore
//! use wgbridge_transport::tun::MockTun;
//! use wgbridge_transport::traits::{TunConfig, TunDevice};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let tun = MockTun::new(TunConfig::new("mock0"));
//! tun.push_inbound(b"test packet".to_vec()).unwrap();
//!
//! let mut buf = [0u8; 1500];
//! let len = tun.read(&mut buf).await.unwrap();
//! assert_eq!(&buf[..len], b"test packet");
//! # }
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - This is for testing only - do not use in production
//! - Both directions are bounded by `QUEUE_LIMIT`
//!
//! ## Last Modified
//! v0.1.0 - Initial mock implementation

use std::collections::VecDeque;
use std::fmt;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use crate::error::{Result, TransportError};
use crate::traits::{TunConfig, TunDevice, TunEvent};
use crate::tun::{CloseSignal, EventChannel};

/// Packets held per direction before pushes and writes are refused.
const QUEUE_LIMIT: usize = 256;

fn push_bounded(queue: &Mutex<VecDeque<Vec<u8>>>, packet: Vec<u8>, what: &str) -> Result<()> {
    let mut queue = queue.lock();
    if queue.len() == QUEUE_LIMIT {
        return Err(TransportError::QueueFull {
            queue: format!("mock {what}"),
        });
    }
    queue.push_back(packet);
    Ok(())
}

/// In-memory packet device.
pub struct MockTun {
    config: TunConfig,
    inbound: Mutex<VecDeque<Vec<u8>>>,
    outbound: Mutex<VecDeque<Vec<u8>>>,
    inbound_ready: Notify,
    events: EventChannel,
    closed: CloseSignal,
}

impl MockTun {
    /// Creates a device named and sized by `config`. `TunEvent::Up` is
    /// already queued.
    #[must_use]
    pub fn new(config: TunConfig) -> Self {
        Self {
            config,
            inbound: Mutex::default(),
            outbound: Mutex::default(),
            inbound_ready: Notify::new(),
            events: EventChannel::new_up(),
            closed: CloseSignal::new(),
        }
    }

    /// Queues a packet for the engine to read.
    ///
    /// # Errors
    /// Returns `QueueFull` once `QUEUE_LIMIT` packets are waiting.
    pub fn push_inbound(&self, packet: Vec<u8>) -> Result<()> {
        push_bounded(&self.inbound, packet, "inbound")?;
        self.inbound_ready.notify_one();
        Ok(())
    }

    /// Queues a link event. Returns `false` if it was dropped.
    pub fn emit(&self, event: TunEvent) -> bool {
        self.events.send(event)
    }

    /// Removes and returns every packet the engine wrote, oldest first.
    #[must_use]
    pub fn drain_outbound(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.outbound.lock()).into()
    }

    /// Number of packets not yet read by the engine.
    #[must_use]
    pub fn inbound_len(&self) -> usize {
        self.inbound.lock().len()
    }

    /// Number of captured packets not yet drained.
    #[must_use]
    pub fn outbound_len(&self) -> usize {
        self.outbound.lock().len()
    }

    async fn pop_inbound(&self, buf: &mut [u8]) -> usize {
        loop {
            let ready = self.inbound_ready.notified();
            let next = self.inbound.lock().pop_front();
            if let Some(packet) = next {
                let n = buf.len().min(packet.len());
                buf[..n].copy_from_slice(&packet[..n]);
                return n;
            }
            ready.await;
        }
    }
}

#[async_trait]
impl TunDevice for MockTun {
    async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        tokio::select! {
            biased;
            () = self.closed.closed() => Err(TransportError::Closed),
            n = self.pop_inbound(buf) => Ok(n),
        }
    }

    async fn write(&self, buf: &[u8]) -> Result<usize> {
        if self.closed.is_closed() {
            return Err(TransportError::Closed);
        }
        push_bounded(&self.outbound, buf.to_vec(), "outbound")?;
        Ok(buf.len())
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn mtu(&self) -> u16 {
        self.config.mtu
    }

    fn take_events(&self) -> Option<mpsc::Receiver<TunEvent>> {
        self.events.take()
    }

    fn close(&self) {
        if self.closed.close() {
            self.events.close();
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.is_closed()
    }
}

impl fmt::Debug for MockTun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTun")
            .field("config", &self.config)
            .field("closed", &self.is_closed())
            .field("inbound", &self.inbound_len())
            .field("outbound", &self.outbound_len())
            .finish()
    }
}

impl Default for MockTun {
    fn default() -> Self {
        Self::new(TunConfig::default())
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_packets_flow_both_ways() {
        let tun = MockTun::new(TunConfig::new("utun8").with_mtu(1420));
        assert_eq!(tun.mtu(), 1420);

        tun.push_inbound(vec![0x45, 0x00, 0x00, 0x14]).unwrap();
        tun.push_inbound(vec![0x60]).unwrap();
        assert_eq!(tun.inbound_len(), 2);

        let mut buf = [0u8; 64];
        let n = tun.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0x45, 0x00, 0x00, 0x14]);
        assert_eq!(tun.inbound_len(), 1);

        assert_eq!(tun.write(&[1, 2, 3]).await.unwrap(), 3);
        assert_eq!(tun.write(&[4]).await.unwrap(), 1);
        assert_eq!(tun.drain_outbound(), vec![vec![1, 2, 3], vec![4]]);
        assert_eq!(tun.outbound_len(), 0);
    }

    #[tokio::test]
    async fn test_read_blocks_until_push() {
        let tun = Arc::new(MockTun::default());
        let reader = {
            let tun = Arc::clone(&tun);
            tokio::spawn(async move {
                let mut buf = [0u8; 16];
                let n = tun.read(&mut buf).await.unwrap();
                buf[..n].to_vec()
            })
        };
        tokio::task::yield_now().await;
        tun.push_inbound(b"late".to_vec()).unwrap();

        assert_eq!(reader.await.unwrap(), b"late");
    }

    #[tokio::test]
    async fn test_short_buffer_truncates() {
        let tun = MockTun::default();
        tun.push_inbound(vec![7; 100]).unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(tun.read(&mut buf).await.unwrap(), 4);
        assert_eq!(buf, [7; 4]);
    }

    #[test]
    fn test_queue_limit() {
        let tun = MockTun::default();
        for _ in 0..QUEUE_LIMIT {
            tun.push_inbound(Vec::new()).unwrap();
        }
        let err = tun.push_inbound(Vec::new()).unwrap_err();
        assert!(matches!(err, TransportError::QueueFull { .. }));
    }

    #[tokio::test]
    async fn test_events_start_with_up() {
        let tun = MockTun::default();
        let mut events = tun.take_events().unwrap();
        assert!(tun.take_events().is_none());
        assert!(tun.emit(TunEvent::MtuUpdate(1400)));

        assert_eq!(events.recv().await, Some(TunEvent::Up));
        assert_eq!(events.recv().await, Some(TunEvent::MtuUpdate(1400)));
    }

    #[tokio::test]
    async fn test_close_wakes_reader_and_rejects_writes() {
        let tun = Arc::new(MockTun::default());
        let reader = {
            let tun = Arc::clone(&tun);
            tokio::spawn(async move {
                let mut buf = [0u8; 16];
                tun.read(&mut buf).await
            })
        };
        tokio::task::yield_now().await;

        tun.close();
        tun.close();
        assert!(reader.await.unwrap().unwrap_err().is_closed());
        assert!(tun.write(b"x").await.unwrap_err().is_closed());
        assert!(!tun.emit(TunEvent::Down));
    }
}
