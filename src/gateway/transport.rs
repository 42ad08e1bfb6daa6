//! Transport seam between the connection manager and the socket.
//!
//! A [`Connector`] opens one duplex connection and hands back a [`Transport`]:
//! a sender for outgoing text frames and a receiver of [`TransportEvent`]s.
//! Dropping the sender closes the socket.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tracing::{debug, warn};

use crate::error::Result;

/// Outgoing half of an open transport
pub type FrameSender = mpsc::UnboundedSender<String>;

/// What the socket reports to its owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One text frame from the server
    Frame(String),
    /// The socket failed
    Error(String),
    /// The socket closed, with the peer's reason if it gave one
    Closed(Option<String>),
}

/// One open duplex connection
pub struct Transport {
    pub outgoing: FrameSender,
    pub incoming: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens duplex connections
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a connection to `url`.
    async fn connect(&self, url: &str) -> Result<Transport>;
}

/// WebSocket connector backed by `tokio-tungstenite`
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        WsConnector
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Transport> {
        let (ws_stream, _response) = connect_async(url).await?;
        debug!(url, "websocket open");

        let (mut sink, mut stream) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
                    warn!(error = %e, "websocket write failed");
                    return;
                }
            }
            // Owner dropped the sender: close politely.
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                let event = match message {
                    Ok(WsMessage::Text(text)) => TransportEvent::Frame(text.as_str().to_owned()),
                    Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => TransportEvent::Frame(text),
                        Err(_) => {
                            debug!("non-utf8 binary frame ignored");
                            continue;
                        }
                    },
                    Ok(WsMessage::Close(frame)) => {
                        let _ = in_tx.send(TransportEvent::Closed(
                            frame.map(|f| f.reason.as_str().to_owned()),
                        ));
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = in_tx.send(TransportEvent::Error(e.to_string()));
                        return;
                    }
                };
                if in_tx.send(event).is_err() {
                    // Owner is gone; nobody left to read.
                    return;
                }
            }
            let _ = in_tx.send(TransportEvent::Closed(None));
        });

        Ok(Transport {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}
