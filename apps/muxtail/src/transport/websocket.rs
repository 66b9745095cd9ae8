use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use url::Url;

use super::{CloseReason, Connector, Inbound, Outbound, OutboundHandle, Transport, TransportError};
use crate::config::Config;
use crate::protocol::parse_server_frame;
use crate::session::Target;

/// Dials the live output channel at `{server}/api/tmux/ws/{target}`.
pub struct WebSocketConnector {
    config: Config,
}

impl WebSocketConnector {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, target: &Target) -> Result<Box<dyn Transport>, TransportError> {
        let raw = self.config.ws_url(target);
        let url = Url::parse(&raw).map_err(|err| TransportError::Connect(err.to_string()))?;
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        Ok(Box::new(WebSocketTransport::start(ws_stream)))
    }
}

/// WebSocket implementation of the Transport trait. The socket lives in a
/// spawned task bridged over channels; dropping the transport aborts it.
pub struct WebSocketTransport {
    out_tx: mpsc::UnboundedSender<Outbound>,
    in_rx: mpsc::UnboundedReceiver<Inbound>,
    ws_task: Option<tokio::task::JoinHandle<()>>,
}

impl WebSocketTransport {
    fn start(ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        let ws_task = tokio::spawn(async move {
            run_socket(ws_stream, out_rx, in_tx).await;
        });

        Self {
            out_tx,
            in_rx,
            ws_task: Some(ws_task),
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn outbound(&self) -> OutboundHandle {
        OutboundHandle::new(self.out_tx.clone())
    }

    async fn recv(&mut self) -> Option<Inbound> {
        self.in_rx.recv().await
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(task) = self.ws_task.take() {
            task.abort();
        }
    }
}

async fn run_socket(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut out_rx: mpsc::UnboundedReceiver<Outbound>,
    in_tx: mpsc::UnboundedSender<Inbound>,
) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            cmd = out_rx.recv() => match cmd {
                Some(Outbound::Frame(frame)) => {
                    let Some(text) = frame.encode() else { continue };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        let _ = in_tx.send(Inbound::Closed(CloseReason::Abnormal));
                        break;
                    }
                }
                Some(Outbound::Close { normal }) => {
                    let code = if normal { CloseCode::Normal } else { CloseCode::Away };
                    let _ = ws_sender
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: "".into(),
                        })))
                        .await;
                    break;
                }
                // All handles dropped; shut the socket down politely.
                None => {
                    let _ = ws_sender
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "".into(),
                        })))
                        .await;
                    break;
                }
            },
            msg = ws_receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match parse_server_frame(&text) {
                        Some(frame) => {
                            if in_tx.send(Inbound::Frame(frame)).is_err() {
                                break;
                            }
                        }
                        None => {
                            tracing::trace!(len = text.len(), "dropping malformed frame");
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = match frame {
                        Some(f) if f.code == CloseCode::Normal => CloseReason::Normal,
                        _ => CloseReason::Abnormal,
                    };
                    let _ = in_tx.send(Inbound::Closed(reason));
                    break;
                }
                Some(Ok(_)) => {} // protocol-level ping/pong/binary
                Some(Err(_)) | None => {
                    let _ = in_tx.send(Inbound::Closed(CloseReason::Abnormal));
                    break;
                }
            },
        }
    }
}
