//! Wire Protocol
//!
//! The subscribe/ack/data message schema is a property of the server under
//! test, not of this engine, so every event name and the filter field shape
//! live in a `WireFormat` value fixed at configuration time. The defaults
//! match the pusher-style framing the streaming service speaks.
//!
//! The one hard requirement on any schema: an acknowledgment must be
//! distinguishable from channel data by event name, so latency timers stop
//! on the ack and not on the first unrelated message.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::filter::{CompareMode, SubscriptionFilter};

/// Event names and field shape of the subscribe protocol
#[derive(Debug, Clone)]
pub struct WireFormat {
    /// Field name the filter compares against
    pub filter_key: String,
    /// Client -> server subscribe / filter replacement request
    pub subscribe_event: String,
    /// Server -> client subscribe acknowledgment
    pub ack_event: String,
    /// Server -> client post-handshake greeting
    pub established_event: String,
    /// Server -> client protocol error
    pub error_event: String,
    /// Server -> client keepalive probe
    pub ping_event: String,
    /// Client -> server keepalive answer
    pub pong_event: String,
}

impl Default for WireFormat {
    fn default() -> Self {
        Self {
            filter_key: "token_address".to_string(),
            subscribe_event: "pusher:subscribe".to_string(),
            ack_event: "pusher_internal:subscription_succeeded".to_string(),
            established_event: "pusher:connection_established".to_string(),
            error_event: "pusher:error".to_string(),
            ping_event: "pusher:ping".to_string(),
            pong_event: "pusher:pong".to_string(),
        }
    }
}

/// Broad classification of an inbound frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Established,
    SubscribeAck,
    Error,
    Ping,
    /// Anything else: channel data or events this engine does not model
    Data,
}

/// Parsed inbound frame. Unknown fields are dropped; absent fields default
/// to `None` so data messages of any shape still classify.
#[derive(Debug, Deserialize)]
pub struct InboundFrame {
    pub event: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub tags: Option<Value>,
}

impl InboundFrame {
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

impl WireFormat {
    pub fn classify(&self, frame: &InboundFrame) -> FrameKind {
        if frame.event == self.established_event {
            FrameKind::Established
        } else if frame.event == self.ack_event {
            FrameKind::SubscribeAck
        } else if frame.event == self.error_event {
            FrameKind::Error
        } else if frame.event == self.ping_event {
            FrameKind::Ping
        } else {
            FrameKind::Data
        }
    }

    /// Serialized subscribe (or filter replacement) request.
    pub fn subscribe_frame(&self, channel: &str, filter: &SubscriptionFilter) -> String {
        let filter_json = match filter.mode {
            CompareMode::Equals => json!({
                "key": self.filter_key.as_str(),
                "cmp": filter.mode.as_wire(),
                "val": filter.values.first().map(String::as_str).unwrap_or(""),
            }),
            CompareMode::InSet => json!({
                "key": self.filter_key.as_str(),
                "cmp": filter.mode.as_wire(),
                "vals": filter.values.as_slice(),
            }),
        };
        json!({
            "event": self.subscribe_event.as_str(),
            "data": {
                "channel": channel,
                "filter": filter_json,
            },
        })
        .to_string()
    }

    /// Serialized keepalive answer.
    pub fn pong_frame(&self) -> String {
        json!({
            "event": self.pong_event.as_str(),
            "data": {},
        })
        .to_string()
    }
}

/// Publish timestamp embedded in a data message, in epoch milliseconds.
///
/// Servers place it either in root-level tags or inside the data payload,
/// as an integer or a decimal string; all four spots are checked in order.
pub fn extract_timestamp(frame: &InboundFrame) -> Option<u64> {
    fn as_millis(v: &Value) -> Option<u64> {
        v.as_u64()
            .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
    }

    if let Some(ts) = frame
        .tags
        .as_ref()
        .and_then(|tags| tags.get("timestamp"))
        .and_then(as_millis)
    {
        return Some(ts);
    }

    if let Some(data) = &frame.data {
        if let Some(ts) = data
            .get("tags")
            .and_then(|tags| tags.get("timestamp"))
            .and_then(as_millis)
        {
            return Some(ts);
        }
        if let Some(ts) = data.get("timestamp").and_then(as_millis) {
            return Some(ts);
        }
    }

    None
}
