//! Client transport channel over WebSocket.
//!
//! [`Channel::open`] connects once. Outbound messages are queued without
//! blocking the caller and written by a writer task; inbound frames are
//! parsed, put back in emission order, and delivered as [`ChannelEvent`]s.
//! A lost connection is reported once as [`ChannelEvent::Closed`]; there is
//! no reconnection.

use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use coderun_protocol::{ClientMessage, Envelope, Resequencer, ServerMessage};

use crate::session::Outbound;

/// The channel could not be opened, or it broke.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("connection lost: {0}")]
    Dropped(String),

    #[error("channel is closed")]
    Closed,
}

/// What the channel delivers to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Message(ServerMessage),
    Closed(ConnectionError),
}

enum Outgoing {
    Message(ClientMessage),
    Close,
}

/// Cloneable handle for queuing outbound messages.
#[derive(Debug, Clone)]
pub struct ChannelSender {
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl std::fmt::Debug for Outgoing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outgoing::Message(m) => write!(f, "Message({})", m.kind()),
            Outgoing::Close => write!(f, "Close"),
        }
    }
}

impl Outbound for ChannelSender {
    fn send(&mut self, message: ClientMessage) -> Result<(), ConnectionError> {
        self.tx
            .send(Outgoing::Message(message))
            .map_err(|_| ConnectionError::Closed)
    }
}

/// An open connection to one execution backend.
pub struct Channel {
    endpoint: String,
    sender: ChannelSender,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Channel {
    /// Connect to `endpoint` (e.g. `ws://127.0.0.1:5000/ws`).
    pub async fn open(endpoint: &str) -> Result<Self, ConnectionError> {
        let (socket, _response) =
            connect_async(endpoint)
                .await
                .map_err(|e| ConnectionError::Connect {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                })?;
        info!("Connected to execution backend at {}", endpoint);

        let (mut sink, mut stream) = socket.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outgoing>();
        let (event_tx, events) = mpsc::unbounded_channel::<ChannelEvent>();

        let writer_events = event_tx.clone();
        let writer = tokio::spawn(async move {
            while let Some(outgoing) = out_rx.recv().await {
                let frame = match outgoing {
                    Outgoing::Message(message) => match serde_json::to_string(&message) {
                        Ok(json) => Message::Text(json.into()),
                        Err(e) => {
                            warn!("Failed to serialize {}: {}", message.kind(), e);
                            continue;
                        }
                    },
                    Outgoing::Close => {
                        let _ = sink.send(Message::Close(None)).await;
                        let _ = sink.close().await;
                        break;
                    }
                };
                if let Err(e) = sink.send(frame).await {
                    warn!("Channel write failed: {}", e);
                    let _ = writer_events.send(ChannelEvent::Closed(ConnectionError::Dropped(
                        e.to_string(),
                    )));
                    break;
                }
            }
        });

        let reader = tokio::spawn(async move {
            let mut resequencer = Resequencer::new();
            let reason = loop {
                match stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        let envelope = match serde_json::from_str::<Envelope>(&text) {
                            Ok(envelope) => envelope,
                            Err(e) => {
                                warn!("Ignoring unparseable frame: {} - {}", e, text.as_str());
                                continue;
                            }
                        };
                        for message in resequencer.accept(envelope) {
                            if event_tx.send(ChannelEvent::Message(message)).is_err() {
                                return;
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame
                            .map(|f| format!("closed by server: {}", f.reason.as_str()))
                            .unwrap_or_else(|| "closed by server".to_string());
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!("Ignoring binary frame");
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break e.to_string(),
                    None => break "stream ended".to_string(),
                }
            };
            let _ = event_tx.send(ChannelEvent::Closed(ConnectionError::Dropped(reason)));
        });

        Ok(Self {
            endpoint: endpoint.to_string(),
            sender: ChannelSender { tx: out_tx },
            events,
            reader,
            writer,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Handle for a [`crate::session::Session`] to send through.
    pub fn sender(&self) -> ChannelSender {
        self.sender.clone()
    }

    /// Queue one message. Never blocks.
    pub fn send(&self, message: ClientMessage) -> Result<(), ConnectionError> {
        self.sender.clone().send(message)
    }

    /// Next inbound event, or `None` once the channel is fully shut down.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// Close the connection. Pending events are discarded.
    pub async fn close(self) {
        let _ = self.sender.tx.send(Outgoing::Close);
        let _ = self.writer.await;
        self.reader.abort();
        debug!("Channel to {} closed", self.endpoint);
    }
}
