//! Transport adapter: typed events over the wire connection.
//!
//! The adapter owns the wire envelope (encoding [`ClientEvent`]s out,
//! decoding [`ServerEvent`]s in) and nothing else; state-machine logic
//! lives in the coordinator. Sends are fire-and-forget and ordered (one
//! queue, one writer). The subscription ends with a single
//! [`TransportEvent::Closed`] when the connection dies; reconnecting means
//! building a new adapter.

use crate::error::{VoiceError, VoiceResult};
use crate::events::{ClientEvent, ServerEvent};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

/// What the subscription yields.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A decoded server event.
    Event(ServerEvent),

    /// The connection ended; no further events will arrive.
    Closed { reason: Option<String> },
}

/// Ordered, fire-and-forget sender of client events.
#[derive(Clone)]
pub struct TransportHandle {
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl TransportHandle {
    /// Wrap an outbound event queue. Used by transport implementations and
    /// test rigs.
    pub fn new(tx: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self { tx }
    }

    /// Queue an event for sending. Fails with
    /// [`VoiceError::TransportClosed`] once the writer is gone.
    pub fn send(&self, event: ClientEvent) -> VoiceResult<()> {
        self.tx
            .send(event)
            .map_err(|_| VoiceError::TransportClosed)
    }
}

/// WebSocket-backed transport. Connection establishment (URL, auth headers)
/// belongs to the caller; the adapter takes over an established socket.
pub struct WsTransport;

impl WsTransport {
    /// Split the socket and spawn the reader/writer tasks. Returns the send
    /// handle and the inbound event subscription.
    pub fn spawn<S>(
        ws: WebSocketStream<S>,
    ) -> (TransportHandle, mpsc::UnboundedReceiver<TransportEvent>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientEvent>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<TransportEvent>();

        // Writer: one queue preserves send order.
        tokio::spawn(async move {
            while let Some(event) = out_rx.recv().await {
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("unencodable client event: {}", e);
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    warn!("transport write failed: {}", e);
                    break;
                }
            }
        });

        // Reader: decode text frames, surface closure exactly once.
        tokio::spawn(async move {
            loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(event) => {
                                if in_tx.send(TransportEvent::Event(event)).is_err() {
                                    break;
                                }
                            }
                            Err(e) => debug!("skipping undecodable server event: {}", e),
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame.map(|f| f.reason.to_string());
                        let _ = in_tx.send(TransportEvent::Closed { reason });
                        break;
                    }
                    Some(Ok(_)) => {
                        // Ping/pong are answered by tungstenite; binary
                        // frames are not part of this protocol.
                    }
                    Some(Err(e)) => {
                        let _ = in_tx.send(TransportEvent::Closed {
                            reason: Some(e.to_string()),
                        });
                        break;
                    }
                    None => {
                        let _ = in_tx.send(TransportEvent::Closed { reason: None });
                        break;
                    }
                }
            }
        });

        (TransportHandle::new(out_tx), in_rx)
    }
}
