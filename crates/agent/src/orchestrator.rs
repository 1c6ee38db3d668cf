//! The agent orchestrator: a ReAct-style state machine.
//!
//! ```text
//! Init → Reasoning → (ToolDispatch → Observing → Reasoning)* → Done | Failed | BudgetExceeded
//!                                                             ↘ Cancelled
//! ```
//!
//! Each reasoning step sends the full history to the model through the
//! [`Normalizer`]. Tool calls are dispatched to the native host one at a
//! time, in the order the model emitted them, and every call gets exactly
//! one result in history before the next reasoning step.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use hostbridge_bridge::ToolDispatchGateway;
use hostbridge_config::AppConfig;
use hostbridge_core::error::BridgeError;
use hostbridge_core::event::{EventPayload, ProgressUpdate};
use hostbridge_core::message::{History, Message, SessionId};
use hostbridge_core::provider::ProviderRequest;
use hostbridge_core::tool::{CorrelationId, ToolFailureKind, ToolResult};
use hostbridge_providers::{NormalizedReply, Normalizer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::session::{Outcome, Query, Session, SessionLimits, SessionReport, SessionState};

/// Drives sessions to completion. Shared across concurrent queries.
pub struct Orchestrator {
    normalizer: Normalizer,
    gateway: ToolDispatchGateway,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    system_prompt: Option<String>,
    limits: SessionLimits,
    active: Mutex<HashMap<SessionId, CancellationToken>>,
}

/// Removes a session from the active table when its run ends.
struct ActiveGuard<'a> {
    orchestrator: &'a Orchestrator,
    id: SessionId,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.orchestrator.active().remove(&self.id);
    }
}

impl Orchestrator {
    /// Create an orchestrator with default limits.
    pub fn new(normalizer: Normalizer, gateway: ToolDispatchGateway, model: impl Into<String>) -> Self {
        Self {
            normalizer,
            gateway,
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            system_prompt: None,
            limits: SessionLimits::default(),
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Apply model settings, budgets and the system prompt from configuration.
    pub fn with_config(mut self, config: &AppConfig) -> Self {
        self.temperature = config.default_temperature;
        self.max_tokens = Some(config.default_max_tokens);
        self.system_prompt = config.system_prompt.clone();
        self.limits = SessionLimits::from(&config.agent);
        self
    }

    pub fn with_limits(mut self, limits: SessionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    fn active(&self) -> MutexGuard<'_, HashMap<SessionId, CancellationToken>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of sessions currently running.
    pub fn active_sessions(&self) -> usize {
        self.active().len()
    }

    /// Request cancellation of a running session. Returns `false` if no
    /// session with that id is running.
    pub fn cancel(&self, id: &SessionId) -> bool {
        match self.active().get(id) {
            Some(token) => {
                info!(session_id = %id, "Cancelling session");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every running session.
    pub fn cancel_all(&self) {
        for token in self.active().values() {
            token.cancel();
        }
    }

    /// Run one query to a terminal outcome.
    ///
    /// Fails only if the host reuses the id of a session that is still running.
    pub async fn run(&self, query: Query) -> Result<SessionReport, BridgeError> {
        let id = query.session_id.clone().unwrap_or_default();
        let token = CancellationToken::new();
        {
            let mut active = self.active();
            if active.contains_key(&id) {
                return Err(BridgeError::InvalidParams {
                    method: "handleQuery".into(),
                    reason: format!("session {id} is already running"),
                });
            }
            active.insert(id.clone(), token.clone());
        }
        let _guard = ActiveGuard {
            orchestrator: self,
            id: id.clone(),
        };

        Ok(self.drive(id, query, token).await)
    }

    async fn drive(&self, id: SessionId, query: Query, cancel: CancellationToken) -> SessionReport {
        let limits = SessionLimits {
            max_steps: query.max_steps.unwrap_or(self.limits.max_steps),
            max_tool_calls: query.max_tool_calls.unwrap_or(self.limits.max_tool_calls),
        };
        let mut session = Session::new(id, History::from_messages(query.history), limits);

        info!(
            session_id = %session.id,
            max_steps = limits.max_steps,
            max_tool_calls = limits.max_tool_calls,
            "Starting session"
        );

        // ── Init ──
        self.transition(&mut session, SessionState::Init, None);
        if session.history().is_empty() {
            if let Some(prompt) = &self.system_prompt {
                session.push(Message::system(prompt));
            }
        }
        session.push(Message::user(query.text));

        loop {
            // ── Reasoning ──
            self.transition(&mut session, SessionState::Reasoning, None);
            if cancel.is_cancelled() {
                return self.finish_cancelled(session);
            }

            let request = ProviderRequest {
                model: self.model.clone(),
                messages: session.history().messages().to_vec(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                tools: query.tools.clone(),
            };

            let reply = match self.normalizer.complete(request).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(session_id = %session.id, backend = %self.normalizer.backend_name(), error = %e, "Model backend failed");
                    let detail = e.to_string();
                    self.transition(&mut session, SessionState::Failed, Some(detail.clone()));
                    return session.finish(Outcome::Failed, None, None, Some(detail));
                }
            };
            session.set_stop_reason(reply.stop_reason);

            if !reply.has_calls() {
                let answer = reply.text.clone();
                session.push(reply.message);
                self.transition(&mut session, SessionState::Done, None);
                info!(
                    session_id = %session.id,
                    steps = session.steps(),
                    tool_calls = session.tool_calls(),
                    "Session finished"
                );
                return session.finish(Outcome::Done, Some(answer), None, None);
            }

            // ── ToolDispatch ──
            let order: Vec<CorrelationId> = reply
                .message
                .tool_calls
                .iter()
                .map(|c| CorrelationId(c.id.clone()))
                .collect();
            session.push(reply.message.clone());
            self.transition(&mut session, SessionState::ToolDispatch, None);

            let (mut results, exhausted) = self.dispatch_all(&mut session, reply, &cancel).await;

            // ── Observing ──
            self.transition(&mut session, SessionState::Observing, None);
            for id in &order {
                if let Some(result) = results.remove(id) {
                    session.push(result.to_message());
                }
            }

            if cancel.is_cancelled() {
                return self.finish_cancelled(session);
            }

            if exhausted {
                let notice = format!(
                    "Tool-call budget of {} exhausted; remaining calls were not issued",
                    session.budget().max()
                );
                return self.finish_budget(session, notice);
            }

            if !session.try_step() {
                let notice = format!("Step budget of {} exhausted", session.max_steps());
                return self.finish_budget(session, notice);
            }
        }
    }

    /// Issue every accepted call in emission order. Returns one result per
    /// call (rejected, dispatched, skipped or cancelled) and whether the
    /// tool-call budget ran out. A result that lands after cancellation is
    /// replaced by a `cancelled` one.
    async fn dispatch_all(
        &self,
        session: &mut Session,
        reply: NormalizedReply,
        cancel: &CancellationToken,
    ) -> (HashMap<CorrelationId, ToolResult>, bool) {
        let mut results: HashMap<CorrelationId, ToolResult> = reply
            .rejected
            .into_iter()
            .map(|r| (r.correlation_id.clone(), r))
            .collect();
        let mut exhausted = false;

        for call in reply.tool_calls {
            let id = call.correlation_id.clone();

            if cancel.is_cancelled() {
                results.insert(id.clone(), cancelled(id, "not issued: session cancelled", 0));
                continue;
            }

            if exhausted || session.budget().is_exhausted() {
                exhausted = true;
                results.insert(id.clone(), skipped(id, session.budget().max()));
                continue;
            }

            match self.gateway.dispatch(call, session.budget_mut()).await {
                Ok(result) if cancel.is_cancelled() => {
                    debug!(session_id = %session.id, correlation_id = %id, "Discarding result that arrived after cancellation");
                    let elapsed_ms = result.elapsed_ms;
                    results.insert(
                        id.clone(),
                        cancelled(id, "result discarded: session cancelled", elapsed_ms),
                    );
                }
                Ok(result) => {
                    results.insert(id, result);
                }
                Err(e) => {
                    exhausted = true;
                    results.insert(id.clone(), skipped(id, e.max));
                }
            }
        }

        (results, exhausted)
    }

    fn finish_budget(&self, mut session: Session, notice: String) -> SessionReport {
        warn!(session_id = %session.id, %notice, "Session stopped on budget");
        self.transition(&mut session, SessionState::BudgetExceeded, Some(notice.clone()));
        session.finish(Outcome::BudgetExceeded, None, Some(notice), None)
    }

    fn finish_cancelled(&self, mut session: Session) -> SessionReport {
        info!(session_id = %session.id, "Session cancelled");
        self.transition(&mut session, SessionState::Cancelled, None);
        session.finish(
            Outcome::Cancelled,
            None,
            Some("Session cancelled by the host".into()),
            None,
        )
    }

    /// Record a state change and tell the host about it.
    fn transition(&self, session: &mut Session, state: SessionState, detail: Option<String>) {
        session.set_state(state);
        let update = EventPayload::Progress(ProgressUpdate {
            session_id: session.id.to_string(),
            state: state.as_str().into(),
            steps: session.steps(),
            tool_calls: session.tool_calls(),
            detail,
        });
        if self.gateway.correlator().enqueue_event(update).is_err() {
            debug!(session_id = %session.id, state = state.as_str(), "Progress event dropped; bridge closed");
        }
    }
}

fn cancelled(id: CorrelationId, detail: &str, elapsed_ms: u64) -> ToolResult {
    ToolResult::failure(id, ToolFailureKind::Cancelled, detail, elapsed_ms)
}

fn skipped(id: CorrelationId, max: u32) -> ToolResult {
    ToolResult::failure(
        id,
        ToolFailureKind::BudgetExceeded,
        format!("not issued: tool-call budget of {max} exhausted"),
        0,
    )
}
