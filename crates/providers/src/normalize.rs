//! Model Response Normalizer.
//!
//! Every backend, cloud or on-device, produces a raw [`ProviderResponse`].
//! This module turns it into one canonical [`NormalizedReply`]: a tagged
//! stop reason, tool calls with parsed argument objects and fresh
//! correlation ids, and a synthetic `parse_failure` result for each call
//! whose arguments could not be recovered.

use std::sync::Arc;

use hostbridge_core::error::ProviderError;
use hostbridge_core::message::{Message, MessageToolCall};
use hostbridge_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use hostbridge_core::tool::{CorrelationId, ToolCall, ToolFailureKind, ToolResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::repair;

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Refused,
}

impl StopReason {
    /// Map a backend's stop/finish reason string.
    ///
    /// Missing or unrecognized reasons fall back to `ToolUse` when the reply
    /// carries tool calls, `EndTurn` otherwise.
    pub fn from_backend(raw: Option<&str>, has_tool_calls: bool) -> Self {
        match raw {
            Some("stop" | "end_turn" | "stop_sequence") => Self::EndTurn,
            Some("tool_calls" | "function_call" | "tool_use") => Self::ToolUse,
            Some("length" | "max_tokens") => Self::MaxTokens,
            Some("content_filter" | "refusal") => Self::Refused,
            other => {
                if let Some(unknown) = other {
                    debug!(reason = unknown, "Unrecognized stop reason");
                }
                if has_tool_calls {
                    Self::ToolUse
                } else {
                    Self::EndTurn
                }
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EndTurn => "end_turn",
            Self::ToolUse => "tool_use",
            Self::MaxTokens => "max_tokens",
            Self::Refused => "refused",
        }
    }
}

/// A backend reply in canonical form.
#[derive(Debug, Clone)]
pub struct NormalizedReply {
    /// Assistant message for the history. Its tool call ids are the
    /// correlation ids below, in emission order.
    pub message: Message,

    pub text: String,

    /// Calls whose arguments parsed (possibly after repair)
    pub tool_calls: Vec<ToolCall>,

    /// Synthetic `parse_failure` results for calls that could not be parsed
    pub rejected: Vec<ToolResult>,

    pub stop_reason: StopReason,

    pub usage: Option<Usage>,

    pub model: String,
}

impl NormalizedReply {
    /// Whether the model emitted any call at all, accepted or not.
    pub fn has_calls(&self) -> bool {
        !self.tool_calls.is_empty() || !self.rejected.is_empty()
    }
}

/// Normalize a raw provider response.
pub fn normalize(response: ProviderResponse) -> NormalizedReply {
    let ProviderResponse {
        mut message,
        usage,
        model,
        stop_reason,
    } = response;

    let stop_reason =
        StopReason::from_backend(stop_reason.as_deref(), !message.tool_calls.is_empty());
    let mut tool_calls = Vec::new();
    let mut rejected = Vec::new();

    for call in &mut message.tool_calls {
        let correlation_id = CorrelationId::new();
        let backend_id = std::mem::replace(&mut call.id, correlation_id.to_string());
        debug!(backend_id = %backend_id, correlation_id = %correlation_id, tool = %call.name, "Assigned correlation id");

        if call.name.trim().is_empty() {
            warn!(correlation_id = %correlation_id, "Rejecting tool call without a name");
            rejected.push(ToolResult::failure(
                correlation_id,
                ToolFailureKind::ParseFailure,
                "tool call has no name",
                0,
            ));
            continue;
        }

        match repair::parse_arguments(&call.arguments) {
            Ok((arguments, repaired)) => {
                if repaired {
                    info!(tool = %call.name, correlation_id = %correlation_id, "Repaired truncated tool arguments");
                }
                call.arguments = Value::Object(arguments.clone()).to_string();
                tool_calls.push(ToolCall {
                    correlation_id,
                    name: call.name.clone(),
                    arguments,
                });
            }
            Err(e) => {
                warn!(tool = %call.name, correlation_id = %correlation_id, error = %e, "Rejecting unparseable tool arguments");
                rejected.push(ToolResult::failure(
                    correlation_id,
                    ToolFailureKind::ParseFailure,
                    format!("could not parse arguments for {}: {e}", call.name),
                    0,
                ));
            }
        }
    }

    message
        .metadata
        .insert("stop_reason".into(), stop_reason.as_str().into());
    message.metadata.insert("model".into(), model.clone().into());

    NormalizedReply {
        text: message.content.clone(),
        message,
        tool_calls,
        rejected,
        stop_reason,
        usage,
        model,
    }
}

/// Lift a reply that is not already a chat envelope into a [`ProviderResponse`].
///
/// Accepted shapes:
/// - plain text, or text whose whole body is one of the objects below
/// - `{"function_call": {"name", "arguments"}}`
/// - `{"tool_calls": [{"name", "arguments"} | {"id", "function": {...}}]}`
/// - a bare `{"name", "arguments"}` (or `parameters`)
/// - `{"content" | "text": "..."}`, optionally with `stop_reason` and `usage`
pub fn synthesize_envelope(
    raw: Value,
    model: impl Into<String>,
) -> Result<ProviderResponse, ProviderError> {
    let model = model.into();
    match raw {
        Value::String(text) => Ok(from_text(text, model)),
        Value::Object(obj) => from_object(obj, model).ok_or_else(|| {
            ProviderError::MalformedReply("reply object has neither text nor tool calls".into())
        }),
        other => Err(ProviderError::MalformedReply(format!(
            "expected text or an object, got {other}"
        ))),
    }
}

fn from_text(text: String, model: String) -> ProviderResponse {
    let trimmed = text.trim();
    if trimmed.starts_with('{') {
        let parsed = serde_json::from_str::<Value>(trimmed).ok().or_else(|| {
            repair::close_json(trimmed)
                .ok()
                .and_then(|closed| serde_json::from_str(&closed).ok())
        });
        if let Some(Value::Object(obj)) = parsed {
            let calls = extract_calls(&obj);
            if !calls.is_empty() {
                return envelope(text_field(&obj), calls, &obj, model);
            }
        }
    }

    ProviderResponse {
        message: Message::assistant(text),
        usage: None,
        model,
        stop_reason: None,
    }
}

fn from_object(obj: Map<String, Value>, model: String) -> Option<ProviderResponse> {
    let calls = extract_calls(&obj);
    let text = text_field(&obj);
    if calls.is_empty() && text.is_none() {
        return None;
    }
    Some(envelope(text, calls, &obj, model))
}

fn envelope(
    text: Option<String>,
    calls: Vec<MessageToolCall>,
    obj: &Map<String, Value>,
    model: String,
) -> ProviderResponse {
    let mut message = Message::assistant(text.unwrap_or_default());
    message.tool_calls = calls;

    let stop_reason = ["stop_reason", "finish_reason"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(String::from);
    let usage = obj
        .get("usage")
        .and_then(|u| serde_json::from_value::<Usage>(u.clone()).ok());

    ProviderResponse {
        message,
        usage,
        model,
        stop_reason,
    }
}

fn text_field(obj: &Map<String, Value>) -> Option<String> {
    ["content", "text"]
        .iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(String::from)
}

fn extract_calls(obj: &Map<String, Value>) -> Vec<MessageToolCall> {
    if let Some(Value::Array(items)) = obj.get("tool_calls") {
        return items
            .iter()
            .filter_map(Value::as_object)
            .map(call_from_object)
            .collect();
    }
    if let Some(Value::Object(call)) = obj.get("function_call") {
        return vec![call_from_object(call)];
    }
    let bare = obj.get("name").is_some_and(Value::is_string)
        && (obj.contains_key("arguments") || obj.contains_key("parameters"));
    if bare {
        return vec![call_from_object(obj)];
    }
    Vec::new()
}

fn call_from_object(item: &Map<String, Value>) -> MessageToolCall {
    let function = item.get("function").and_then(Value::as_object).unwrap_or(item);
    let name = function
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let arguments = match function
        .get("arguments")
        .or_else(|| function.get("parameters"))
    {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "{}".into(),
    };
    let id = item
        .get("id")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| CorrelationId::new().to_string());

    MessageToolCall {
        id,
        name,
        arguments,
    }
}

/// Wraps a backend so every reply comes back normalized.
#[derive(Clone)]
pub struct Normalizer {
    backend: Arc<dyn Provider>,
}

impl Normalizer {
    pub fn new(backend: Arc<dyn Provider>) -> Self {
        Self { backend }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Send a request to the backend and normalize its reply.
    pub async fn complete(&self, request: ProviderRequest) -> Result<NormalizedReply, ProviderError> {
        let raw = self.backend.complete(request).await?;
        Ok(normalize(raw))
    }
}
