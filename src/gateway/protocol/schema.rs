//! Gateway protocol schema
//!
//! Defines the wire format for gateway messages. Control traffic is framed
//! as `{ "op": <code>, "body": {...} }`; correlated calls as
//! `{ "api", "data", "echo" }` and their replies as `{ "echo", "data", "err"? }`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{HeartbeatBody, IdentifyBody, LatencyProbeBody, ReadyBody};
use crate::error::{Error, Result};

/// Op codes carried by control frames
pub mod op {
    /// Client → server: identify with token and observer flag
    pub const IDENTIFY: u8 = 1;
    /// Client → server: presence heartbeat
    pub const HEARTBEAT: u8 = 2;
    /// Client → server: latency probe
    pub const LATENCY_PROBE: u8 = 3;
    /// Server → client: session is ready
    pub const READY: u8 = 10;
    /// Server → client: pushed event
    pub const EVENT: u8 = 11;
    /// Server → client: heartbeat accepted
    pub const HEARTBEAT_ACK: u8 = 12;
    /// Server → client: latency probe echoed
    pub const LATENCY_ACK: u8 = 13;
}

/// Control frame envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlFrame<B> {
    /// Op code
    pub op: u8,
    /// Op-specific payload
    pub body: B,
}

/// Correlated call from client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiFrame {
    /// API name
    pub api: String,
    /// Call payload
    #[serde(default)]
    pub data: Value,
    /// Correlation tag echoed back in the reply
    pub echo: String,
}

/// Reply to a correlated call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyFrame {
    /// Tag of the call this answers
    pub echo: String,
    /// Reply payload
    #[serde(default)]
    pub data: Value,
    /// Error text when the call failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<String>,
}

/// Pushed event frame body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    /// Event name, e.g. `message` or `presence`
    #[serde(rename = "type")]
    pub name: String,
    /// Event payload
    #[serde(default)]
    pub data: Value,
}

/// Frames the client writes
#[derive(Debug, Clone)]
pub enum ClientFrame {
    Identify(IdentifyBody),
    Heartbeat(HeartbeatBody),
    LatencyProbe(LatencyProbeBody),
    Api(ApiFrame),
}

impl ClientFrame {
    /// Build a correlated call frame
    pub fn api(name: impl Into<String>, data: Value, echo: impl Into<String>) -> Self {
        ClientFrame::Api(ApiFrame {
            api: name.into(),
            data,
            echo: echo.into(),
        })
    }

    /// Serialize to the JSON text sent over the socket
    pub fn encode(&self) -> Result<String> {
        let text = match self {
            ClientFrame::Identify(body) => serde_json::to_string(&ControlFrame {
                op: op::IDENTIFY,
                body,
            })?,
            ClientFrame::Heartbeat(body) => serde_json::to_string(&ControlFrame {
                op: op::HEARTBEAT,
                body,
            })?,
            ClientFrame::LatencyProbe(body) => serde_json::to_string(&ControlFrame {
                op: op::LATENCY_PROBE,
                body,
            })?,
            ClientFrame::Api(frame) => serde_json::to_string(frame)?,
        };
        Ok(text)
    }
}

/// Frames the server writes
#[derive(Debug, Clone)]
pub enum ServerFrame {
    Ready(ReadyBody),
    Event(EventFrame),
    HeartbeatAck,
    LatencyAck(LatencyProbeBody),
    Reply(ReplyFrame),
    /// Op code this client does not know; ignored by the gateway
    Unknown(u64),
}

impl ServerFrame {
    /// Parse one text frame from the server.
    ///
    /// A frame with a string `echo` is always a reply, whatever else it
    /// carries; everything else is dispatched on `op`.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;

        if value.get("echo").is_some_and(Value::is_string) {
            return Ok(ServerFrame::Reply(serde_json::from_value(value)?));
        }

        let code = value
            .get("op")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::InvalidInput("frame has neither echo nor op".to_string()))?;

        let body = || value.get("body").cloned().unwrap_or(Value::Null);

        let frame = match u8::try_from(code) {
            Ok(op::READY) => {
                let body = body();
                if body.is_null() {
                    ServerFrame::Ready(ReadyBody::default())
                } else {
                    ServerFrame::Ready(serde_json::from_value(body)?)
                }
            }
            Ok(op::EVENT) => ServerFrame::Event(serde_json::from_value(body())?),
            Ok(op::HEARTBEAT_ACK) => ServerFrame::HeartbeatAck,
            Ok(op::LATENCY_ACK) => ServerFrame::LatencyAck(serde_json::from_value(body())?),
            _ => ServerFrame::Unknown(code),
        };
        Ok(frame)
    }
}
