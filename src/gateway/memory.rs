//! In-process connector for tests and local tooling.
//!
//! Every successful `connect` hands the server side of the new connection to
//! the paired [`MemoryServer`], which can read client frames and push server
//! frames or transport faults.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use super::protocol::op;
use super::transport::{Connector, Transport, TransportEvent};
use crate::error::{Error, Result};

/// Connector that loops back into a [`MemoryServer`]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    attempts: Arc<AtomicUsize>,
    fail_next: Arc<AtomicUsize>,
}

impl MemoryConnector {
    /// Create a connector and the server that receives its connections.
    pub fn pair() -> (Self, MemoryServer) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let attempts = Arc::new(AtomicUsize::new(0));
        let fail_next = Arc::new(AtomicUsize::new(0));
        (
            MemoryConnector {
                accept_tx,
                attempts: Arc::clone(&attempts),
                fail_next: Arc::clone(&fail_next),
            },
            MemoryServer {
                accept_rx,
                attempts,
                fail_next,
            },
        )
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Transport> {
        let _ = self.attempts.fetch_add(1, Ordering::SeqCst);

        let should_fail = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(Error::Transport(format!("connection to {} refused", url)));
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        self.accept_tx
            .send(MemoryPeer {
                from_client: out_rx,
                to_client: in_tx,
            })
            .map_err(|_| Error::Transport("memory server dropped".to_string()))?;

        Ok(Transport {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}

/// Server side of a [`MemoryConnector`]
pub struct MemoryServer {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
    attempts: Arc<AtomicUsize>,
    fail_next: Arc<AtomicUsize>,
}

impl MemoryServer {
    /// Wait for the next client connection.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }

    /// Connection accepted since the last call, if any.
    pub fn try_accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.try_recv().ok()
    }

    /// Refuse the next `n` connection attempts.
    pub fn refuse_next(&self, n: usize) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    /// Connection attempts seen, refused ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

/// One accepted in-memory connection
pub struct MemoryPeer {
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<TransportEvent>,
}

impl MemoryPeer {
    /// Next frame from the client as JSON; `None` once the client closed.
    pub async fn recv_json(&mut self) -> Option<Value> {
        let text = self.from_client.recv().await?;
        serde_json::from_str(&text).ok()
    }

    /// Next frame whose `op` is `code`, skipping others.
    pub async fn recv_op(&mut self, code: u8) -> Option<Value> {
        loop {
            let frame = self.recv_json().await?;
            if frame.get("op").and_then(Value::as_u64) == Some(u64::from(code)) {
                return Some(frame);
            }
        }
    }

    /// Next correlated call, skipping control frames.
    pub async fn recv_api(&mut self) -> Option<Value> {
        loop {
            let frame = self.recv_json().await?;
            if frame.get("api").is_some() {
                return Some(frame);
            }
        }
    }

    /// Frame already queued by the client, if any.
    pub fn try_recv_json(&mut self) -> Option<Value> {
        let text = self.from_client.try_recv().ok()?;
        serde_json::from_str(&text).ok()
    }

    pub fn send_json(&self, frame: Value) -> bool {
        self.to_client
            .send(TransportEvent::Frame(frame.to_string()))
            .is_ok()
    }

    pub fn send_ready(&self) -> bool {
        self.send_json(json!({ "op": op::READY, "body": { "userId": "u-test" } }))
    }

    /// Answer a correlated call frame with `data`.
    pub fn reply(&self, call: &Value, data: Value) -> bool {
        self.send_json(json!({ "echo": call["echo"], "data": data }))
    }

    pub fn reply_err(&self, call: &Value, err: &str) -> bool {
        self.send_json(json!({ "echo": call["echo"], "data": null, "err": err }))
    }

    pub fn push_event(&self, name: &str, data: Value) -> bool {
        self.send_json(json!({ "op": op::EVENT, "body": { "type": name, "data": data } }))
    }

    pub fn fail(&self, reason: &str) -> bool {
        self.to_client
            .send(TransportEvent::Error(reason.to_string()))
            .is_ok()
    }

    pub fn close(&self) -> bool {
        self.to_client.send(TransportEvent::Closed(None)).is_ok()
    }

    /// `true` once the client stopped reading this connection.
    pub fn client_gone(&self) -> bool {
        self.to_client.is_closed()
    }
}
