//! Connection to the live service
//!
//! A [`Transport`] opens one bidirectional session and hands back a
//! [`Connection`]: a bounded outbound queue drained by a background sender
//! task, and an ordered inbound event queue.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

use super::event::{InboundEvent, MediaChunk};
use super::protocol::{ClientMessage, ServerMessage, SessionSetup};
use crate::{Error, Result};

/// How long the server gets to acknowledge the setup message
const SETUP_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a closing sender gets to flush
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Capacity of the inbound event queue
const INBOUND_CAPACITY: usize = 256;

/// Opens live sessions
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a session configured with `setup`
    ///
    /// # Errors
    ///
    /// Returns `Error::Connection` if the session cannot be established
    async fn open(&self, setup: SessionSetup) -> Result<Connection>;
}

/// An open session
pub struct Connection {
    outbound: Option<mpsc::Sender<MediaChunk>>,
    inbound: mpsc::Receiver<InboundEvent>,
    sender_task: Option<JoinHandle<()>>,
    reader_task: Option<JoinHandle<()>>,
}

impl Connection {
    /// Wrap raw queues
    #[must_use]
    pub fn new(
        outbound: mpsc::Sender<MediaChunk>,
        inbound: mpsc::Receiver<InboundEvent>,
    ) -> Self {
        Self {
            outbound: Some(outbound),
            inbound,
            sender_task: None,
            reader_task: None,
        }
    }

    /// Attach the background tasks serving the queues
    #[must_use]
    pub fn with_tasks(mut self, sender: JoinHandle<()>, reader: JoinHandle<()>) -> Self {
        self.sender_task = Some(sender);
        self.reader_task = Some(reader);
        self
    }

    /// Queue a chunk without waiting
    ///
    /// # Errors
    ///
    /// Returns the chunk back if the queue is full or the sender is gone
    pub fn try_send(
        &self,
        chunk: MediaChunk,
    ) -> std::result::Result<(), mpsc::error::TrySendError<MediaChunk>> {
        match &self.outbound {
            Some(outbound) => outbound.try_send(chunk),
            None => Err(mpsc::error::TrySendError::Closed(chunk)),
        }
    }

    /// Wait for the next inbound event
    ///
    /// A queue closed without an explicit close event reads as a close.
    pub async fn recv(&mut self) -> InboundEvent {
        self.inbound
            .recv()
            .await
            .unwrap_or(InboundEvent::TransportClosed { reason: None })
    }

    /// Close the session, letting queued chunks flush briefly
    pub async fn close(mut self) {
        // Dropping the queue tells the sender to send a close frame
        self.outbound.take();
        if let Some(mut task) = self.sender_task.take() {
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut task).await.is_err() {
                tracing::debug!("sender did not finish in time, aborting");
                task.abort();
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
    }
}

/// WebSocket transport for the Gemini Live API
pub struct WebSocketTransport {
    endpoint: String,
    api_key: SecretString,
    outbound_capacity: usize,
}

impl WebSocketTransport {
    /// Create a transport for `endpoint`, authenticated with `api_key`
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the endpoint is not a valid URL
    pub fn new(endpoint: &str, api_key: SecretString, outbound_capacity: usize) -> Result<Self> {
        url::Url::parse(endpoint)
            .map_err(|e| Error::Config(format!("invalid live endpoint {endpoint}: {e}")))?;

        Ok(Self {
            endpoint: endpoint.to_string(),
            api_key,
            outbound_capacity: outbound_capacity.max(1),
        })
    }

    fn url(&self) -> Result<url::Url> {
        url::Url::parse_with_params(&self.endpoint, &[("key", self.api_key.expose_secret())])
            .map_err(|e| Error::Config(format!("invalid live endpoint: {e}")))
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, setup: SessionSetup) -> Result<Connection> {
        let url = self.url()?;
        tracing::debug!(endpoint = %self.endpoint, model = %setup.model, "opening live session");

        let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| Error::Connection(format!("websocket connect failed: {e}")))?;
        let (mut sink, mut stream) = ws.split();

        let hello = serde_json::to_string(&ClientMessage::setup(&setup))?;
        sink.send(Message::Text(hello.into()))
            .await
            .map_err(|e| Error::Connection(format!("failed to send setup: {e}")))?;

        // Wait for the server to accept the configuration
        let handshake = async {
            while let Some(frame) = stream.next().await {
                let frame = frame.map_err(|e| Error::Connection(e.to_string()))?;
                match frame {
                    Message::Close(close) => {
                        return Err(Error::Connection(format!(
                            "server rejected setup: {}",
                            close_reason(close.as_ref()).unwrap_or_else(|| "no reason".to_string())
                        )));
                    }
                    other => {
                        if let Some(text) = frame_text(&other) {
                            if parse_setup_reply(text)? {
                                return Ok(());
                            }
                        }
                    }
                }
            }
            Err(Error::Connection("stream ended during setup".to_string()))
        };
        tokio::time::timeout(SETUP_TIMEOUT, handshake)
            .await
            .map_err(|_| Error::Connection("timed out waiting for setup".to_string()))??;

        tracing::debug!("live session setup complete");

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<MediaChunk>(self.outbound_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel::<InboundEvent>(INBOUND_CAPACITY);

        let error_tx = inbound_tx.clone();
        let sender = tokio::spawn(async move {
            while let Some(chunk) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&ClientMessage::media(chunk)) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to encode media chunk");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    let _ = error_tx
                        .send(InboundEvent::TransportError {
                            message: format!("send failed: {e}"),
                            fatal: true,
                        })
                        .await;
                    return;
                }
            }
            let _ = sink.close().await;
            tracing::trace!("live sender finished");
        });

        let reader = tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(e) => {
                        let _ = inbound_tx
                            .send(InboundEvent::TransportError {
                                message: e.to_string(),
                                fatal: true,
                            })
                            .await;
                        return;
                    }
                };

                if let Message::Close(close) = &frame {
                    let _ = inbound_tx
                        .send(InboundEvent::TransportClosed {
                            reason: close_reason(close.as_ref()),
                        })
                        .await;
                    return;
                }

                let Some(text) = frame_text(&frame) else {
                    continue;
                };
                let events = match ServerMessage::parse(text) {
                    Ok(msg) => msg.into_events(),
                    Err(e) => vec![InboundEvent::TransportError {
                        message: format!("unreadable server message: {e}"),
                        fatal: false,
                    }],
                };
                for event in events {
                    if inbound_tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
            let _ = inbound_tx
                .send(InboundEvent::TransportClosed { reason: None })
                .await;
        });

        Ok(Connection::new(outbound_tx, inbound_rx).with_tasks(sender, reader))
    }
}

/// JSON text carried by a data frame
/// Whether a reply received during setup acknowledges the session
fn parse_setup_reply(text: &str) -> Result<bool> {
    ServerMessage::parse(text)
        .map(|message| message.is_setup_complete())
        .map_err(|e| Error::Connection(format!("unreadable setup reply: {e}")))
}

fn frame_text(frame: &Message) -> Option<&str> {
    match frame {
        Message::Text(text) => Some(text.as_str()),
        Message::Binary(bytes) => std::str::from_utf8(bytes).ok(),
        _ => None,
    }
}

fn close_reason(frame: Option<&CloseFrame>) -> Option<String> {
    frame
        .map(|f| f.reason.to_string())
        .filter(|reason| !reason.is_empty())
}
