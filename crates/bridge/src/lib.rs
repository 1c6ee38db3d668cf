//! # HostBridge Bridge
//!
//! The runtime side of the boundary with the native host.
//!
//! The host cannot receive calls, so the runtime talks to it through two
//! structures owned by the [`Correlator`]: a FIFO event queue the host drains,
//! and a table of outstanding calls the host completes by correlation id.
//! The [`ToolDispatchGateway`] builds tool execution on top of both.

pub mod correlator;
pub mod dispatch;

pub use correlator::{CallError, Correlator, CorrelatorError, PendingCall};
pub use dispatch::{BudgetExhausted, DEFAULT_TOOL_TIMEOUT, ToolBudget, ToolDispatchGateway};
