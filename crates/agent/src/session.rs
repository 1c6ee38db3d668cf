//! Session state: one agent run from user query to terminal outcome.

use hostbridge_bridge::ToolBudget;
use hostbridge_config::AgentConfig;
use hostbridge_core::message::{History, Message, SessionId};
use hostbridge_providers::StopReason;
use serde::{Deserialize, Serialize};

/// Where a session is in the reasoning loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Init,
    Reasoning,
    ToolDispatch,
    Observing,
    Done,
    Failed,
    BudgetExceeded,
    Cancelled,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Reasoning => "reasoning",
            Self::ToolDispatch => "tool_dispatch",
            Self::Observing => "observing",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::BudgetExceeded => "budget_exceeded",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done | Self::Failed | Self::BudgetExceeded | Self::Cancelled
        )
    }
}

/// Terminal outcome reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Done,
    Failed,
    BudgetExceeded,
    Cancelled,
}

impl From<Outcome> for SessionState {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Done => Self::Done,
            Outcome::Failed => Self::Failed,
            Outcome::BudgetExceeded => Self::BudgetExceeded,
            Outcome::Cancelled => Self::Cancelled,
        }
    }
}

/// Step and tool-call ceilings for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    pub max_steps: u32,
    pub max_tool_calls: u32,
}

impl From<&AgentConfig> for SessionLimits {
    fn from(config: &AgentConfig) -> Self {
        Self {
            max_steps: config.max_steps,
            max_tool_calls: config.max_tool_calls,
        }
    }
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

/// A user query as received from the host.
#[derive(Debug, Clone, Default)]
pub struct Query {
    pub text: String,
    /// Prior conversation to continue from
    pub history: Vec<Message>,
    /// Reuse a host-chosen id (a fresh one is generated otherwise)
    pub session_id: Option<SessionId>,
    pub max_steps: Option<u32>,
    pub max_tool_calls: Option<u32>,
    pub tools: Vec<hostbridge_core::provider::ToolDefinition>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Mutable state of a running session. Owned by the orchestrator task.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    history: History,
    state: SessionState,
    steps: u32,
    max_steps: u32,
    budget: ToolBudget,
    stop_reason: Option<StopReason>,
}

impl Session {
    pub fn new(id: SessionId, history: History, limits: SessionLimits) -> Self {
        Self {
            id,
            history,
            state: SessionState::Init,
            steps: 0,
            max_steps: limits.max_steps,
            budget: ToolBudget::new(limits.max_tool_calls),
            stop_reason: None,
        }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn push(&mut self, message: Message) {
        self.history.push(message);
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Count one completed observe cycle. Returns `false` (and leaves the
    /// counter alone) when the step ceiling is already reached.
    pub fn try_step(&mut self) -> bool {
        if self.steps >= self.max_steps {
            return false;
        }
        self.steps += 1;
        true
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }

    pub fn tool_calls(&self) -> u32 {
        self.budget.used()
    }

    pub fn budget_mut(&mut self) -> &mut ToolBudget {
        &mut self.budget
    }

    pub fn budget(&self) -> &ToolBudget {
        &self.budget
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    pub fn set_stop_reason(&mut self, reason: StopReason) {
        self.stop_reason = Some(reason);
    }

    /// Close the session and produce the report sent to the host.
    pub fn finish(
        self,
        outcome: Outcome,
        answer: Option<String>,
        notice: Option<String>,
        error: Option<String>,
    ) -> SessionReport {
        SessionReport {
            session_id: self.id,
            outcome,
            answer,
            stop_reason: self.stop_reason,
            notice,
            error,
            steps: self.steps,
            tool_calls: self.budget.used(),
            history: self.history,
        }
    }
}

/// Terminal result of one query (the `handleQuery` response body).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub session_id: SessionId,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<StopReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub steps: u32,
    pub tool_calls: u32,
    pub history: History,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_counter_stops_at_ceiling() {
        let mut session = Session::new(
            SessionId::from("s"),
            History::new(),
            SessionLimits {
                max_steps: 2,
                max_tool_calls: 1,
            },
        );
        assert!(session.try_step());
        assert!(session.try_step());
        assert!(!session.try_step());
        assert_eq!(session.steps(), 2);
    }

    #[test]
    fn report_serializes_camel_case() {
        let mut session = Session::new(SessionId::from("s1"), History::new(), SessionLimits::default());
        session.push(Message::user("hi"));
        session.set_stop_reason(StopReason::EndTurn);
        let report = session.finish(Outcome::Done, Some("hello".into()), None, None);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["sessionId"], "s1");
        assert_eq!(json["outcome"], "done");
        assert_eq!(json["stopReason"], "end_turn");
        assert_eq!(json["toolCalls"], 0);
        assert!(json.get("notice").is_none());
        assert_eq!(json["history"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn terminal_states() {
        assert!(SessionState::BudgetExceeded.is_terminal());
        assert!(!SessionState::Observing.is_terminal());
        assert_eq!(SessionState::from(Outcome::Cancelled), SessionState::Cancelled);
    }
}
