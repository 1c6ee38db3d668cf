//! Native host boundary for HostBridge.
//!
//! The host drives the runtime with JSON control calls and receives work
//! back as events it drains. Calls and tool results travel on separate
//! lanes (see [`transport`]).

pub mod control;
pub mod logging;
pub mod protocol;
pub mod transport;

pub use control::BridgeRuntime;
pub use protocol::{ControlCall, ControlReply, Method, ReplyError, StatusReport};
pub use transport::{CallHandle, Transport};
