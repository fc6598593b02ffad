//! WebSocket transport backed by tokio-tungstenite.
//!
//! Each [`open`](WsTransport::open) call dials the configured URL, splits
//! the stream, and spawns a pump task that translates between the socket
//! and the session's channel pair. The pump exits when either side closes;
//! the session is told why via [`TransportEvent::Closed`].

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{Error, Result};

use super::{Transport, TransportEvent, TransportHandle};

// ============================================================================
// WsTransport
// ============================================================================

/// WebSocket client transport.
///
/// # Example
///
/// ```ignore
/// use roomlink::transport::WsTransport;
///
/// let transport = WsTransport::new("ws://localhost:7512")?;
/// let session = Session::spawn(transport, SessionConfig::default());
/// ```
#[derive(Debug)]
pub struct WsTransport {
    /// Backend endpoint.
    url: Url,
}

impl WsTransport {
    /// Creates a transport dialing the given WebSocket URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the URL does not parse or is not a
    /// `ws`/`wss` scheme.
    pub fn new(url: impl AsRef<str>) -> Result<Self> {
        let url = Url::parse(url.as_ref())
            .map_err(|e| Error::config(format!("invalid transport URL: {e}")))?;

        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "unsupported transport scheme: {}",
                url.scheme()
            )));
        }

        Ok(Self { url })
    }

    /// Returns the configured endpoint.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self) -> Result<TransportHandle> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::connection_lost(format!("dial failed: {e}")))?;

        debug!(url = %self.url, "WebSocket connection established");

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<TransportEvent>();

        tokio::spawn(async move {
            let (mut ws_write, mut ws_read) = ws_stream.split();

            let reason = loop {
                tokio::select! {
                    message = ws_read.next() => {
                        match message {
                            Some(Ok(Message::Text(text))) => {
                                trace!(len = text.len(), "Frame received");
                                if inbound_tx.send(TransportEvent::Frame(text.to_string())).is_err() {
                                    break "session dropped".to_string();
                                }
                            }

                            Some(Ok(Message::Close(frame))) => {
                                break match frame {
                                    Some(f) => format!("closed by remote: {}", f.reason),
                                    None => "closed by remote".to_string(),
                                };
                            }

                            Some(Err(e)) => {
                                warn!(error = %e, "WebSocket error");
                                break format!("socket error: {e}");
                            }

                            None => break "stream ended".to_string(),

                            // Ignore Binary, Ping, Pong
                            _ => {}
                        }
                    }

                    frame = outbound_rx.recv() => {
                        match frame {
                            Some(text) => {
                                if let Err(e) = ws_write.send(Message::Text(text.into())).await {
                                    warn!(error = %e, "Frame write failed");
                                    break format!("write failed: {e}");
                                }
                            }
                            None => {
                                // Session discarded the handle
                                let _ = ws_write.close().await;
                                break "handle discarded".to_string();
                            }
                        }
                    }
                }
            };

            debug!(reason = %reason, "Transport pump terminated");
            let _ = inbound_tx.send(TransportEvent::Closed { reason });
        });

        Ok(TransportHandle::new(outbound_tx, inbound_rx))
    }
}

// ============================================================================
// Tests
// ============================================================================
