//! Correlation table for request/response over the shared socket.
//!
//! Each correlated call registers a one-shot reply slot under a fresh tag.
//! Replies are matched strictly by tag, so the transport may deliver them in
//! any order. There is no timeout here; callers race the reply themselves.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::protocol::ReplyFrame;
use crate::error::{Error, Result};

/// Receiving half of a pending call
pub type ReplyReceiver = oneshot::Receiver<Result<Value>>;

struct PendingCall {
    api: String,
    reply_tx: oneshot::Sender<Result<Value>>,
}

/// Pending correlated calls keyed by tag
#[derive(Default)]
pub struct CorrelationTable {
    pending: Mutex<HashMap<String, PendingCall>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call to `api` and return its tag with the reply receiver.
    pub fn register(&self, api: &str) -> (String, ReplyReceiver) {
        let tag = uuid::Uuid::new_v4().simple().to_string();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.lock().insert(
            tag.clone(),
            PendingCall {
                api: api.to_string(),
                reply_tx,
            },
        );
        (tag, reply_rx)
    }

    /// Settle the call registered under `reply.echo`.
    ///
    /// Returns `false` when no call is waiting on that tag (never registered,
    /// already settled, or cancelled).
    pub fn settle(&self, reply: ReplyFrame) -> bool {
        let Some(call) = self.lock().remove(&reply.echo) else {
            debug!(tag = %reply.echo, "reply for unknown tag dropped");
            return false;
        };

        let outcome = match reply.err {
            Some(message) => Err(Error::Api {
                api: call.api,
                message,
                data: (!reply.data.is_null()).then_some(reply.data),
            }),
            None => Ok(reply.data),
        };

        if call.reply_tx.send(outcome).is_err() {
            debug!(tag = %reply.echo, "caller stopped waiting before the reply arrived");
        }
        true
    }

    /// Forget a call whose frame never made it onto the socket.
    pub fn cancel(&self, tag: &str) {
        self.lock().remove(tag);
    }

    /// Drop every pending call; waiting callers see [`Error::ChannelClosed`].
    pub fn clear(&self) {
        let drained = std::mem::take(&mut *self.lock());
        if !drained.is_empty() {
            warn!(count = drained.len(), "dropping pending calls");
        }
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PendingCall>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reply(tag: &str, data: Value, err: Option<&str>) -> ReplyFrame {
        ReplyFrame {
            echo: tag.to_string(),
            data,
            err: err.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn replies_match_by_tag_in_any_order() {
        let table = CorrelationTable::new();
        let (tag_a, rx_a) = table.register("a");
        let (tag_b, rx_b) = table.register("b");
        assert_ne!(tag_a, tag_b);

        assert!(table.settle(reply(&tag_b, json!("for b"), None)));
        assert!(table.settle(reply(&tag_a, json!("for a"), None)));

        assert_eq!(rx_a.await.unwrap().unwrap(), json!("for a"));
        assert_eq!(rx_b.await.unwrap().unwrap(), json!("for b"));
        assert_eq!(table.pending_count(), 0);
    }

    #[tokio::test]
    async fn error_reply_rejects_with_attached_error() {
        let table = CorrelationTable::new();
        let (tag, rx) = table.register("channel.enter");
        table.settle(reply(&tag, json!({"code": 403}), Some("no access")));

        match rx.await.unwrap() {
            Err(Error::Api { api, message, data }) => {
                assert_eq!(api, "channel.enter");
                assert_eq!(message, "no access");
                assert_eq!(data, Some(json!({"code": 403})));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn unknown_and_duplicate_tags_are_ignored() {
        let table = CorrelationTable::new();
        let (tag, _rx) = table.register("a");
        assert!(!table.settle(reply("nope", Value::Null, None)));
        assert!(table.settle(reply(&tag, Value::Null, None)));
        assert!(!table.settle(reply(&tag, Value::Null, None)));
    }

    #[tokio::test]
    async fn clear_closes_waiting_callers() {
        let table = CorrelationTable::new();
        let (_tag, rx) = table.register("a");
        table.clear();
        assert!(rx.await.is_err());
    }

    #[test]
    fn reply_stays_pending_until_its_own_tag_arrives() {
        let table = CorrelationTable::new();
        let (tag_a, rx_a) = table.register("a");
        let (tag_b, _rx_b) = table.register("b");
        let mut waiting = tokio_test::task::spawn(rx_a);

        tokio_test::assert_pending!(waiting.poll());
        table.settle(reply(&tag_b, json!(2), None));
        assert!(!waiting.is_woken());
        tokio_test::assert_pending!(waiting.poll());

        table.settle(reply(&tag_a, json!(1), None));
        assert!(waiting.is_woken());
        let outcome = tokio_test::assert_ready!(waiting.poll());
        assert_eq!(outcome.unwrap().unwrap(), json!(1));
    }
}
