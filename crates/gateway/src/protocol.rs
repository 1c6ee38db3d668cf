//! Control-plane wire types.
//!
//! Every call from the native host is `{"method": ..., "params": ...}` and
//! every reply is `{"ok": bool, "result"?: ..., "error"?: {code, message}}`.

use std::path::PathBuf;

use hostbridge_core::error::BridgeError;
use hostbridge_core::message::Message;
use hostbridge_core::provider::ToolDefinition;
use hostbridge_core::tool::{CorrelationId, ToolOutcome};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A call from the native host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlCall {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl ControlCall {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// Methods the runtime serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Initialize,
    HandleQuery,
    DeliverToolResult,
    GetStatus,
    CancelSession,
    Shutdown,
}

impl Method {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "initialize" => Self::Initialize,
            "handleQuery" => Self::HandleQuery,
            "deliverToolResult" => Self::DeliverToolResult,
            "getStatus" => Self::GetStatus,
            "cancelSession" => Self::CancelSession,
            "shutdown" => Self::Shutdown,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialize => "initialize",
            Self::HandleQuery => "handleQuery",
            Self::DeliverToolResult => "deliverToolResult",
            Self::GetStatus => "getStatus",
            Self::CancelSession => "cancelSession",
            Self::Shutdown => "shutdown",
        }
    }

    /// Decode this method's params. A missing params object reads as `{}`.
    pub fn params<T: DeserializeOwned>(&self, params: &Value) -> Result<T, BridgeError> {
        let params = if params.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            params.clone()
        };
        serde_json::from_value(params).map_err(|e| BridgeError::InvalidParams {
            method: self.as_str().into(),
            reason: e.to_string(),
        })
    }
}

/// Error body of a failed reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyError {
    pub code: String,
    pub message: String,
}

/// A reply to the native host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ReplyError>,
}

impl ControlReply {
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(ReplyError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }

    /// The error code, if this reply is a failure.
    pub fn code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}

impl From<Result<Value, BridgeError>> for ControlReply {
    fn from(result: Result<Value, BridgeError>) -> Self {
        match result {
            Ok(value) => Self::success(value),
            Err(e) => Self::failure(e.code(), e.to_string()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub log_directory: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParams {
    pub text: String,
    #[serde(default)]
    pub history: Vec<Message>,
    pub session_id: Option<String>,
    pub max_steps: Option<u32>,
    pub max_tool_calls: Option<u32>,
    /// Tools the model may call
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliverParams {
    pub correlation_id: CorrelationId,
    pub outcome: ToolOutcome,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelParams {
    pub session_id: String,
}

/// Body of a `getStatus` reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// `ready` or `error`
    pub status: String,
    pub outstanding_calls: usize,
    pub pending_events: usize,
    pub active_sessions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_without_params() {
        let call: ControlCall = serde_json::from_str(r#"{"method":"getStatus"}"#).unwrap();
        assert_eq!(Method::parse(&call.method), Some(Method::GetStatus));
        let params: InitializeParams = Method::Initialize.params(&call.params).unwrap();
        assert!(params.log_directory.is_none());
    }

    #[test]
    fn query_params_are_camel_case() {
        let params: QueryParams = Method::HandleQuery
            .params(&serde_json::json!({"text": "hi", "sessionId": "s1", "maxToolCalls": 2}))
            .unwrap();
        assert_eq!(params.session_id.as_deref(), Some("s1"));
        assert_eq!(params.max_tool_calls, Some(2));
        assert!(params.history.is_empty());
    }

    #[test]
    fn bad_params_are_invalid_params() {
        let err = Method::HandleQuery
            .params::<QueryParams>(&serde_json::json!({"txt": "hi"}))
            .unwrap_err();
        assert_eq!(err.code(), "invalid_params");
    }

    #[test]
    fn error_reply_shape() {
        let reply = ControlReply::from(Err(BridgeError::Uninitialized));
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["error"]["code"], "uninitialized");
        assert!(json.get("result").is_none());
    }

    #[test]
    fn unknown_method() {
        assert_eq!(Method::parse("reboot"), None);
        assert_eq!(Method::parse("deliverToolResult").unwrap().as_str(), "deliverToolResult");
    }
}
