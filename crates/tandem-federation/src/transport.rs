//! Peer websocket transport behind an injectable connector.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;

use tandem_types::wire::Frame;
use tandem_types::RemoteSite;

const PUMP_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("websocket connect failed: {0}")]
    Handshake(String),
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),
}

/// A live peer connection. Frames go out through `outbound`; `inbound`
/// yields decoded frames and ends when the socket closes. Dropping the
/// handle closes the link.
pub struct PeerLink {
    pub outbound: mpsc::Sender<Frame>,
    pub inbound: mpsc::Receiver<Frame>,
}

/// Opens websocket connections to peers. Injected so the link state
/// machine runs against an in-memory double in tests.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self, site: &RemoteSite, timeout: Duration)
        -> Result<PeerLink, ConnectError>;
}

/// Production connector over `tokio-tungstenite`.
pub struct WsConnector;

#[async_trait]
impl PeerConnector for WsConnector {
    async fn connect(
        &self,
        site: &RemoteSite,
        timeout: Duration,
    ) -> Result<PeerLink, ConnectError> {
        let url = site.ws_url();
        let connect = tokio_tungstenite::connect_async(url.as_str());
        let (stream, _response) = match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(ok)) => ok,
            Ok(Err(e)) => return Err(ConnectError::Handshake(e.to_string())),
            Err(_) => return Err(ConnectError::Timeout(timeout)),
        };
        tracing::debug!(url = %url, "peer websocket connected");

        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<Frame>(PUMP_QUEUE_DEPTH);
        let (in_tx, in_rx) = mpsc::channel::<Frame>(PUMP_QUEUE_DEPTH);

        // Outbound pump: runs until the caller drops the sender or the
        // socket refuses writes.
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                let text = match frame.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!("unserializable outbound frame: {}", e);
                        continue;
                    }
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        // Inbound pump: decodes text frames; anything unparsable is logged
        // and skipped. Dropping `in_tx` signals disconnect to the consumer.
        tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Text(text)) => match Frame::parse(&text) {
                        Ok(frame) => {
                            if in_tx.send(frame).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(frame = %text.as_str(), "discarding malformed peer frame: {}", e)
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("peer socket error: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(PeerLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
