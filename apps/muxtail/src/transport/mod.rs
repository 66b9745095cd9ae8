use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::protocol::{ClientFrame, ServerFrame};
use crate::session::Target;

pub mod mock;
pub mod websocket;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to open live channel: {0}")]
    Connect(String),
    #[error("live channel is closed")]
    ChannelClosed,
}

/// Why the live channel closed. Normal closures are intentional and never
/// reconnected; anything else schedules a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Normal,
    Abnormal,
}

/// Traffic received from the live channel.
#[derive(Debug)]
pub enum Inbound {
    Frame(ServerFrame),
    Closed(CloseReason),
}

/// Commands accepted by a transport's write half.
#[derive(Debug)]
pub enum Outbound {
    Frame(ClientFrame),
    Close { normal: bool },
}

/// Cheaply cloneable write half of a transport.
#[derive(Debug, Clone)]
pub struct OutboundHandle {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl OutboundHandle {
    pub fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { tx }
    }

    pub fn send_frame(&self, frame: ClientFrame) -> Result<(), TransportError> {
        self.tx
            .send(Outbound::Frame(frame))
            .map_err(|_| TransportError::ChannelClosed)
    }

    /// Requests closure of the underlying socket. Best effort; a transport
    /// that is already gone has nothing left to close.
    pub fn close(&self, normal: bool) {
        let _ = self.tx.send(Outbound::Close { normal });
    }
}

/// A single live transport. At most one exists per connection manager at any
/// time; the manager's reader task takes ownership of it.
#[async_trait]
pub trait Transport: Send {
    /// Write half, usable independently of the reader.
    fn outbound(&self) -> OutboundHandle;

    /// Next inbound event. `None` once the channel is fully drained after a
    /// close.
    async fn recv(&mut self) -> Option<Inbound>;
}

/// Builds transports for a target. The seam the connection manager dials
/// through, so tests can substitute a scripted in-memory implementation.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &Target) -> Result<Box<dyn Transport>, TransportError>;
}
