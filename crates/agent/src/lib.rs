//! The agent loop of HostBridge.
//!
//! A session follows a **Reason → Dispatch → Observe** cycle:
//!
//! 1. **Receive** a query from the host
//! 2. **Reason**: send the history to the model through the normalizer
//! 3. **If tool calls**: dispatch them to the host one by one, append every
//!    result, loop back to step 2
//! 4. **If text**: return the answer to the host
//!
//! The loop also stops when the step or tool-call ceiling is reached, when
//! the backend fails, or when the host cancels the session.

pub mod orchestrator;
pub mod session;

#[cfg(test)]
mod test_helpers;

pub use orchestrator::Orchestrator;
pub use session::{Outcome, Query, Session, SessionLimits, SessionReport, SessionState};
