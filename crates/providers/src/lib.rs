//! Model backends for HostBridge.
//!
//! All backends implement the `hostbridge_core::Provider` trait and return
//! raw replies. The [`Normalizer`] wraps any of them and produces the
//! canonical [`NormalizedReply`] the orchestrator consumes. The router
//! selects the backend based on configuration.

pub mod anthropic;
pub mod host;
pub mod normalize;
pub mod openai_compat;
pub mod repair;
pub mod router;

pub use anthropic::AnthropicProvider;
pub use host::HostModelProvider;
pub use normalize::{NormalizedReply, Normalizer, StopReason, normalize, synthesize_envelope};
pub use openai_compat::OpenAiCompatProvider;
pub use repair::{RepairError, close_json, parse_arguments};
pub use router::{ProviderRouter, build_from_config};
