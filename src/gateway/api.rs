//! Correlated API calls over the gateway socket.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use super::connection::ConnectionManager;
use super::correlation::{CorrelationTable, ReplyReceiver};
use super::protocol::ClientFrame;
use crate::error::{Error, Result};

/// Issues `{api, data, echo}` frames and awaits their tagged replies
#[derive(Clone)]
pub struct ApiClient {
    calls: Arc<CorrelationTable>,
    connection: ConnectionManager,
}

impl ApiClient {
    pub fn new(calls: Arc<CorrelationTable>, connection: ConnectionManager) -> Self {
        Self { calls, connection }
    }

    /// Call `api` with `data` and wait for the matching reply.
    ///
    /// Fails immediately with [`Error::NotConnected`] when no socket is open.
    /// There is no timeout; see [`ApiClient::send_api_timeout`].
    pub async fn send_api(&self, api: &str, data: Value) -> Result<Value> {
        let (_tag, reply) = self.dispatch(api, data)?;
        reply.await.map_err(|_| Error::ChannelClosed)?
    }

    /// [`ApiClient::send_api`] with the reply decoded into `T`.
    pub async fn send_api_as<T: DeserializeOwned>(&self, api: &str, data: Value) -> Result<T> {
        let value = self.send_api(api, data).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// [`ApiClient::send_api`] bounded by `limit`. An expired call forgets its tag.
    pub async fn send_api_timeout(&self, api: &str, data: Value, limit: Duration) -> Result<Value> {
        let (tag, reply) = self.dispatch(api, data)?;
        match tokio::time::timeout(limit, reply).await {
            Ok(outcome) => outcome.map_err(|_| Error::ChannelClosed)?,
            Err(_) => {
                self.calls.cancel(&tag);
                Err(Error::Timeout(format!("{} got no reply within {:?}", api, limit)))
            }
        }
    }

    fn dispatch(&self, api: &str, data: Value) -> Result<(String, ReplyReceiver)> {
        let (tag, reply) = self.calls.register(api);
        let sent = ClientFrame::api(api, data, tag.clone())
            .encode()
            .and_then(|text| self.connection.send_text(text));
        if let Err(e) = sent {
            self.calls.cancel(&tag);
            warn!(api, %tag, error = %e, "api call not sent");
            return Err(e);
        }
        debug!(api, %tag, "api call sent");
        Ok((tag, reply))
    }

    pub fn pending_calls(&self) -> usize {
        self.calls.pending_count()
    }
}
