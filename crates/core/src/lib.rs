//! # HostBridge Core
//!
//! Domain types, traits, and error definitions shared by both sides of the
//! bridge: the reasoning runtime (agent loop, model-facing logic) and the
//! native host (UI, native tools, on-device inference).
//!
//! ## Design Philosophy
//!
//! Every seam is defined here as a plain type or a trait. Implementations live
//! in their respective crates:
//! - `hostbridge-bridge` owns correlation and tool dispatch
//! - `hostbridge-providers` owns model backends and response normalization
//! - `hostbridge-agent` owns the orchestration state machine
//! - `hostbridge-gateway` owns the two-lane transport

pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{BridgeError, Error, ProviderError, Result};
pub use event::{BridgeEvent, EventKind, EventPayload, InferenceRequest, ProgressUpdate, ToolInvocation};
pub use message::{History, Message, MessageToolCall, Role, SessionId};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use tool::{CorrelationId, ToolCall, ToolFailureKind, ToolOutcome, ToolResult};
