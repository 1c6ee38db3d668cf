//! Event-plane notifications: reasoning runtime → native host.
//!
//! The host cannot accept unsolicited calls, so everything the runtime needs
//! to tell it is queued as a [`BridgeEvent`] and drained by the host. Each
//! event carries a kind tag and a JSON payload; sequence numbers increase by
//! one per enqueue so the host can verify it saw every event in order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::ProviderRequest;
use crate::tool::CorrelationId;

/// Kind tag carried by every event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The host must run a tool and answer with `deliverToolResult`.
    ToolInvocationRequested,
    /// The host must run on-device inference and answer with `deliverToolResult`.
    ModelInferenceRequested,
    /// Informational: a session changed state.
    ProgressUpdate,
}

/// An event as delivered to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeEvent {
    /// Position in the queue, starting at 1
    pub seq: u64,

    pub kind: EventKind,

    pub payload: serde_json::Value,

    pub timestamp: DateTime<Utc>,
}

/// Payload of a `tool_invocation_requested` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub tool_name: String,
    pub arguments: serde_json::Map<String, serde_json::Value>,
    /// Must be echoed back by the host
    pub correlation_id: CorrelationId,
}

/// Payload of a `model_inference_requested` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceRequest {
    pub correlation_id: CorrelationId,
    pub request: ProviderRequest,
}

/// Payload of a `progress_update` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    pub session_id: String,
    pub state: String,
    pub steps: u32,
    pub tool_calls: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Typed event body, converted into `(kind, payload)` when queued.
#[derive(Debug, Clone)]
pub enum EventPayload {
    ToolInvocation(ToolInvocation),
    ModelInference(InferenceRequest),
    Progress(ProgressUpdate),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ToolInvocation(_) => EventKind::ToolInvocationRequested,
            Self::ModelInference(_) => EventKind::ModelInferenceRequested,
            Self::Progress(_) => EventKind::ProgressUpdate,
        }
    }

    /// Serialize the body. These types contain only JSON-native data, so
    /// serialization cannot fail; a `Null` payload is returned if it ever does.
    pub fn into_value(self) -> serde_json::Value {
        let value = match self {
            Self::ToolInvocation(p) => serde_json::to_value(p),
            Self::ModelInference(p) => serde_json::to_value(p),
            Self::Progress(p) => serde_json::to_value(p),
        };
        value.unwrap_or(serde_json::Value::Null)
    }

    /// Stamp the payload with a sequence number.
    pub fn into_event(self, seq: u64) -> BridgeEvent {
        BridgeEvent {
            seq,
            kind: self.kind(),
            payload: self.into_value(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_invocation_event_wire_shape() {
        let mut args = serde_json::Map::new();
        args.insert("path".into(), "/tmp/a.png".into());
        let event = EventPayload::ToolInvocation(ToolInvocation {
            tool_name: "ocr".into(),
            arguments: args,
            correlation_id: "corr-9".into(),
        })
        .into_event(7);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["seq"], 7);
        assert_eq!(json["kind"], "tool_invocation_requested");
        assert_eq!(json["payload"]["toolName"], "ocr");
        assert_eq!(json["payload"]["correlationId"], "corr-9");
        assert_eq!(json["payload"]["arguments"]["path"], "/tmp/a.png");
    }

    #[test]
    fn progress_event_omits_empty_detail() {
        let event = EventPayload::Progress(ProgressUpdate {
            session_id: "s1".into(),
            state: "reasoning".into(),
            steps: 0,
            tool_calls: 0,
            detail: None,
        })
        .into_event(1);
        assert_eq!(event.kind, EventKind::ProgressUpdate);
        assert!(event.payload.get("detail").is_none());
    }
}
