//! Tool call and tool result types.
//!
//! Tools run on the native host, never in the reasoning runtime. The runtime
//! only knows a tool by name and argument mapping, issues the invocation
//! across the bridge, and receives a [`ToolOutcome`] back which it turns into
//! a [`ToolResult`].

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::Message;

/// Opaque identifier pairing an issued tool call with its eventual result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A request to execute a tool on the native host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Locally generated id, unique for the lifetime of the session
    pub correlation_id: CorrelationId,

    /// Name of the tool to execute
    pub name: String,

    /// Arguments as a JSON object
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

/// Why a tool result is a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailureKind {
    /// The host did not answer before the deadline.
    Timeout,
    /// The host reported a definite failure.
    ExecutionError,
    /// The model's argument payload could not be parsed, even after repair.
    ParseFailure,
    /// The session was cancelled before the call was issued or answered.
    Cancelled,
    /// The tool-call budget ran out before this call could be issued.
    BudgetExceeded,
    /// The bridge shut down while the call was outstanding.
    BridgeClosed,
}

impl ToolFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ExecutionError => "execution_error",
            Self::ParseFailure => "parse_failure",
            Self::Cancelled => "cancelled",
            Self::BudgetExceeded => "budget_exceeded",
            Self::BridgeClosed => "bridge_closed",
        }
    }
}

/// What the native host reports back for one invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// Whether the tool executed successfully
    pub success: bool,

    /// Tool output (any JSON shape)
    #[serde(default)]
    pub payload: serde_json::Value,

    /// Error detail when `success` is false
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutcome {
    pub fn ok(payload: serde_json::Value) -> Self {
        Self {
            success: true,
            payload,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }
}

/// The result of one tool call, real or synthesized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The call this result answers
    pub correlation_id: CorrelationId,

    /// Whether the tool executed successfully
    pub success: bool,

    /// The output payload on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,

    /// Error detail on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Failure classification (None on success)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ToolFailureKind>,

    /// Wall time between issuing the call and receiving the result
    pub elapsed_ms: u64,
}

impl ToolResult {
    /// Build a result from what the host reported.
    pub fn from_outcome(correlation_id: CorrelationId, outcome: ToolOutcome, elapsed_ms: u64) -> Self {
        if outcome.success {
            Self {
                correlation_id,
                success: true,
                payload: Some(outcome.payload),
                error: None,
                kind: None,
                elapsed_ms,
            }
        } else {
            let detail = outcome
                .error
                .unwrap_or_else(|| "tool reported failure without detail".into());
            Self::failure(correlation_id, ToolFailureKind::ExecutionError, detail, elapsed_ms)
        }
    }

    /// Synthesize a failed result.
    pub fn failure(
        correlation_id: CorrelationId,
        kind: ToolFailureKind,
        detail: impl Into<String>,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            correlation_id,
            success: false,
            payload: None,
            error: Some(detail.into()),
            kind: Some(kind),
            elapsed_ms,
        }
    }

    /// Text shown to the model for this observation.
    pub fn observation_text(&self) -> String {
        if self.success {
            match &self.payload {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(serde_json::Value::Null) | None => String::new(),
                Some(other) => other.to_string(),
            }
        } else {
            let kind = self.kind.map(|k| k.as_str()).unwrap_or("error");
            format!("Error ({kind}): {}", self.error.as_deref().unwrap_or(""))
        }
    }

    /// Render this result as a tool message for the history.
    pub fn to_message(&self) -> Message {
        let mut msg = Message::tool_result(self.correlation_id.as_str(), self.observation_text());
        msg.metadata
            .insert("success".into(), serde_json::Value::Bool(self.success));
        msg.metadata
            .insert("elapsed_ms".into(), serde_json::json!(self.elapsed_ms));
        if let Some(kind) = self.kind {
            msg.metadata
                .insert("kind".into(), serde_json::Value::String(kind.as_str().into()));
        }
        msg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    #[test]
    fn successful_outcome_keeps_payload() {
        let result = ToolResult::from_outcome(
            "c1".into(),
            ToolOutcome::ok(serde_json::json!({"pages": 3})),
            12,
        );
        assert!(result.success);
        assert!(result.kind.is_none());
        assert_eq!(result.observation_text(), r#"{"pages":3}"#);
    }

    #[test]
    fn failed_outcome_is_execution_error() {
        let result = ToolResult::from_outcome("c2".into(), ToolOutcome::failed("disk full"), 5);
        assert!(!result.success);
        assert_eq!(result.kind, Some(ToolFailureKind::ExecutionError));
        assert_eq!(result.observation_text(), "Error (execution_error): disk full");
    }

    #[test]
    fn tool_message_carries_kind_metadata() {
        let result = ToolResult::failure("c3".into(), ToolFailureKind::Timeout, "no reply", 5000);
        let msg = result.to_message();
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("c3"));
        assert_eq!(msg.metadata["kind"], "timeout");
        assert_eq!(msg.metadata["success"], false);
    }

    #[test]
    fn string_payload_is_not_requoted() {
        let result = ToolResult::from_outcome("c4".into(), ToolOutcome::ok("hello".into()), 1);
        assert_eq!(result.observation_text(), "hello");
    }

    #[test]
    fn outcome_deserializes_with_defaults() {
        let outcome: ToolOutcome = serde_json::from_str(r#"{"success": false}"#).unwrap();
        assert!(!outcome.success);
        assert!(outcome.payload.is_null());
        assert!(outcome.error.is_none());
    }
}
