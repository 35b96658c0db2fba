//! Thin typed envelope over the relay WebSocket.
//!
//! One task writes, one task reads. Outbound messages are best-effort: once
//! the socket is gone they are dropped with a debug line, never an error.
//! Malformed inbound JSON is logged and dropped; the message stream ending
//! means the relay connection is gone.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use tracing::{debug, warn};

use sofa_common::{Error, Result, SignalMessage};

const OUTBOUND_DEPTH: usize = 32;
const INBOUND_DEPTH: usize = 32;

/// Command consumed by the writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalCommand {
    Message(SignalMessage),
    Close,
}

/// Cloneable handle for sending on the relay channel.
#[derive(Clone)]
pub struct SignalingSender {
    tx: mpsc::Sender<SignalCommand>,
}

impl SignalingSender {
    /// Wrap a raw command channel. The session tests drive this directly.
    pub fn from_channel(tx: mpsc::Sender<SignalCommand>) -> Self {
        Self { tx }
    }

    /// Best-effort send; dropped silently once the channel is gone.
    pub async fn send(&self, message: SignalMessage) {
        if self.tx.send(SignalCommand::Message(message)).await.is_err() {
            debug!("relay channel not open; dropping signaling message");
        }
    }

    /// Ask the writer to close the socket after everything queued so far.
    pub async fn close(&self) {
        let _ = self.tx.send(SignalCommand::Close).await;
    }
}

/// An open relay connection.
pub struct SignalingChannel {
    pub sender: SignalingSender,
    /// Inbound messages in receipt order; `None` from `recv` means the
    /// relay connection closed or failed.
    pub incoming: mpsc::Receiver<SignalMessage>,
}

impl SignalingChannel {
    /// Open the WebSocket to the relay and spawn the I/O tasks.
    pub async fn connect(url: &str) -> Result<Self> {
        let (stream, _response) = connect_async(url).await.map_err(Error::signaling)?;
        let (mut write, mut read) = stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<SignalCommand>(OUTBOUND_DEPTH);
        tokio::spawn(async move {
            while let Some(command) = out_rx.recv().await {
                match command {
                    SignalCommand::Message(message) => {
                        let text = match serde_json::to_string(&message) {
                            Ok(text) => text,
                            Err(err) => {
                                warn!("failed to serialize signaling message: {err}");
                                continue;
                            }
                        };
                        if let Err(err) = write.send(WsMessage::Text(text)).await {
                            debug!("signaling send failed: {err}");
                            break;
                        }
                    }
                    SignalCommand::Close => {
                        let _ = write.send(WsMessage::Close(None)).await;
                        break;
                    }
                }
            }
        });

        let (in_tx, in_rx) = mpsc::channel::<SignalMessage>(INBOUND_DEPTH);
        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => {
                        match serde_json::from_str::<SignalMessage>(&text) {
                            Ok(message) => {
                                if in_tx.send(message).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => warn!("failed to parse signaling message: {err}"),
                        }
                    }
                    Ok(WsMessage::Close(_)) => {
                        debug!("relay sent close frame");
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!("relay channel error: {err}");
                        break;
                    }
                }
            }
            // Dropping in_tx ends the session's inbound stream.
        });

        Ok(Self {
            sender: SignalingSender::from_channel(out_tx),
            incoming: in_rx,
        })
    }
}
