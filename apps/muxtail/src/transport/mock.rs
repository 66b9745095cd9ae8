//! Scriptable in-memory transport for resilience tests.
//!
//! Each successful dial hands the test a [`MockPeer`] — the server side of
//! the channel — through the receiver returned by [`MockConnector::new`].
//! The connector also counts dials and live transports so tests can assert
//! the single-transport invariant directly.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;

use super::{CloseReason, Connector, Inbound, Outbound, OutboundHandle, Transport, TransportError};
use crate::protocol::{ControlFrame, OutputSnapshot, ServerFrame};
use crate::session::Target;

#[derive(Clone)]
pub struct MockConnector {
    inner: Arc<MockConnectorState>,
}

struct MockConnectorState {
    peers_tx: mpsc::UnboundedSender<MockPeer>,
    live: AtomicUsize,
    connects: AtomicUsize,
    fail_next: AtomicUsize,
}

impl MockConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockPeer>) {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        let connector = Self {
            inner: Arc::new(MockConnectorState {
                peers_tx,
                live: AtomicUsize::new(0),
                connects: AtomicUsize::new(0),
                fail_next: AtomicUsize::new(0),
            }),
        };
        (connector, peers_rx)
    }

    /// Number of transports currently alive.
    pub fn live_transports(&self) -> usize {
        self.inner.live.load(Ordering::SeqCst)
    }

    /// Total dial attempts, successful or not.
    pub fn total_connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Refuse the next `n` dials with a construction failure.
    pub fn fail_next(&self, n: usize) {
        self.inner.fail_next.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, target: &Target) -> Result<Box<dyn Transport>, TransportError> {
        self.inner.connects.fetch_add(1, Ordering::SeqCst);

        let mut remaining = self.inner.fail_next.load(Ordering::SeqCst);
        while remaining > 0 {
            match self.inner.fail_next.compare_exchange(
                remaining,
                remaining - 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Err(TransportError::Connect("connection refused".into())),
                Err(actual) => remaining = actual,
            }
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        self.inner.live.fetch_add(1, Ordering::SeqCst);
        let transport = MockTransport {
            out_tx,
            in_rx,
            _live: LiveGuard(self.inner.clone()),
        };
        let peer = MockPeer {
            target: target.clone(),
            in_tx,
            out_rx,
        };
        let _ = self.inner.peers_tx.send(peer);
        Ok(Box::new(transport))
    }
}

struct LiveGuard(Arc<MockConnectorState>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.live.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct MockTransport {
    out_tx: mpsc::UnboundedSender<Outbound>,
    in_rx: mpsc::UnboundedReceiver<Inbound>,
    _live: LiveGuard,
}

#[async_trait]
impl Transport for MockTransport {
    fn outbound(&self) -> OutboundHandle {
        OutboundHandle::new(self.out_tx.clone())
    }

    async fn recv(&mut self) -> Option<Inbound> {
        self.in_rx.recv().await
    }
}

/// The server side of a mock transport.
pub struct MockPeer {
    pub target: Target,
    in_tx: mpsc::UnboundedSender<Inbound>,
    out_rx: mpsc::UnboundedReceiver<Outbound>,
}

impl MockPeer {
    pub fn send_frame(&self, frame: ServerFrame) {
        let _ = self.in_tx.send(Inbound::Frame(frame));
    }

    pub fn send_snapshot(&self, target: &Target, content: &str) {
        self.send_frame(ServerFrame::Snapshot(OutputSnapshot {
            target: target.clone(),
            content: content.to_string(),
            timestamp: "2025-01-01T00:00:00".to_string(),
        }));
    }

    pub fn send_heartbeat(&self) {
        self.send_frame(ServerFrame::Control(ControlFrame::Heartbeat));
    }

    pub fn send_pong(&self) {
        self.send_frame(ServerFrame::Control(ControlFrame::Pong));
    }

    /// Closes the client's view of the channel with the given reason.
    pub fn close(&self, reason: CloseReason) {
        let _ = self.in_tx.send(Inbound::Closed(reason));
    }

    pub async fn next_outbound(&mut self) -> Option<Outbound> {
        self.out_rx.recv().await
    }

    pub fn try_next_outbound(&mut self) -> Option<Outbound> {
        self.out_rx.try_recv().ok()
    }

    /// Drains pending outbound traffic, returning how many pings were seen.
    pub fn drain_pings(&mut self) -> usize {
        let mut pings = 0;
        while let Some(cmd) = self.try_next_outbound() {
            if matches!(
                cmd,
                Outbound::Frame(crate::protocol::ClientFrame::Ping { .. })
            ) {
                pings += 1;
            }
        }
        pings
    }
}
