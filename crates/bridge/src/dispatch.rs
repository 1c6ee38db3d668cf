//! Tool Dispatch Gateway: issue one tool call to the native host and wait
//! for its result under a deadline.

use std::sync::Arc;
use std::time::Duration;

use hostbridge_core::event::{EventPayload, ToolInvocation};
use hostbridge_core::tool::{ToolCall, ToolFailureKind, ToolResult};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::correlator::{CallError, Correlator, CorrelatorError};

/// How long a tool may run before a timeout result is synthesized.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// The per-session tool-call budget was already spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("tool-call budget of {max} exhausted")]
pub struct BudgetExhausted {
    pub max: u32,
}

/// Counts tool calls against a session maximum. Never exceeds `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolBudget {
    used: u32,
    max: u32,
}

impl ToolBudget {
    pub fn new(max: u32) -> Self {
        Self { used: 0, max }
    }

    /// Take one unit, or fail without changing anything.
    pub fn try_consume(&mut self) -> Result<(), BudgetExhausted> {
        if self.used >= self.max {
            return Err(BudgetExhausted { max: self.max });
        }
        self.used += 1;
        Ok(())
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn remaining(&self) -> u32 {
        self.max - self.used
    }

    pub fn is_exhausted(&self) -> bool {
        self.used >= self.max
    }
}

/// Issues tool invocations through the [`Correlator`].
#[derive(Clone)]
pub struct ToolDispatchGateway {
    correlator: Arc<Correlator>,
    timeout: Duration,
}

impl ToolDispatchGateway {
    pub fn new(correlator: Arc<Correlator>) -> Self {
        Self {
            correlator,
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Override the per-call deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn correlator(&self) -> &Arc<Correlator> {
        &self.correlator
    }

    /// Execute one tool call on the host.
    ///
    /// The budget unit is consumed before anything is issued and is not
    /// refunded on failure. Every issued call yields a [`ToolResult`]:
    /// the host's answer, or a synthesized `timeout` / `bridge_closed`.
    pub async fn dispatch(
        &self,
        call: ToolCall,
        budget: &mut ToolBudget,
    ) -> Result<ToolResult, BudgetExhausted> {
        budget.try_consume()?;

        let ToolCall {
            correlation_id,
            name,
            arguments,
        } = call;
        let started = Instant::now();
        let elapsed_ms = || started.elapsed().as_millis() as u64;

        let pending = match self
            .correlator
            .register_call(correlation_id.clone(), started + self.timeout)
        {
            Ok(pending) => pending,
            Err(CorrelatorError::DuplicateId(id)) => {
                warn!(correlation_id = %id, tool = %name, "Refusing to issue duplicate correlation id");
                return Ok(ToolResult::failure(
                    id,
                    ToolFailureKind::ExecutionError,
                    "duplicate correlation id",
                    0,
                ));
            }
            Err(CorrelatorError::Closed) => {
                return Ok(closed_result(correlation_id, 0));
            }
        };

        let invocation = EventPayload::ToolInvocation(ToolInvocation {
            tool_name: name.clone(),
            arguments,
            correlation_id: correlation_id.clone(),
        });
        if self.correlator.enqueue_event(invocation).is_err() {
            self.correlator.forget_call(&correlation_id);
            return Ok(closed_result(correlation_id, elapsed_ms()));
        }

        info!(tool = %name, correlation_id = %correlation_id, "Dispatched tool invocation");

        let result = match self.correlator.await_call(pending).await {
            Ok(outcome) => ToolResult::from_outcome(correlation_id, outcome, elapsed_ms()),
            Err(CallError::Timeout) => {
                warn!(tool = %name, timeout_secs = self.timeout.as_secs(), "Tool call timed out");
                ToolResult::failure(
                    correlation_id,
                    ToolFailureKind::Timeout,
                    format!("no result within {}s", self.timeout.as_secs_f64()),
                    elapsed_ms(),
                )
            }
            Err(CallError::Closed) => closed_result(correlation_id, elapsed_ms()),
        };

        info!(
            tool = %name,
            correlation_id = %result.correlation_id,
            success = result.success,
            elapsed_ms = result.elapsed_ms,
            "Tool call finished"
        );
        Ok(result)
    }
}

fn closed_result(id: hostbridge_core::tool::CorrelationId, elapsed_ms: u64) -> ToolResult {
    ToolResult::failure(
        id,
        ToolFailureKind::BridgeClosed,
        "bridge shut down before the tool answered",
        elapsed_ms,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostbridge_core::event::EventKind;
    use hostbridge_core::tool::{CorrelationId, ToolOutcome};

    fn call(name: &str) -> ToolCall {
        let mut arguments = serde_json::Map::new();
        arguments.insert("path".into(), "/tmp/in.txt".into());
        ToolCall {
            correlation_id: CorrelationId::new(),
            name: name.into(),
            arguments,
        }
    }

    /// Answer every tool invocation after `latency` with `payload`.
    fn spawn_host(correlator: Arc<Correlator>, latency: Duration, payload: serde_json::Value) {
        tokio::spawn(async move {
            loop {
                let batch = correlator.next_events().await;
                if batch.is_empty() {
                    return;
                }
                for event in batch {
                    if event.kind != EventKind::ToolInvocationRequested {
                        continue;
                    }
                    let inv: ToolInvocation = serde_json::from_value(event.payload).unwrap();
                    let c = Arc::clone(&correlator);
                    let payload = payload.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(latency).await;
                        c.complete_call(&inv.correlation_id, ToolOutcome::ok(payload));
                    });
                }
            }
        });
    }

    #[test]
    fn budget_never_exceeds_max() {
        let mut budget = ToolBudget::new(2);
        assert!(budget.try_consume().is_ok());
        assert!(budget.try_consume().is_ok());
        assert_eq!(budget.try_consume(), Err(BudgetExhausted { max: 2 }));
        assert_eq!(budget.used(), 2);
        assert_eq!(budget.remaining(), 0);
        assert!(budget.is_exhausted());
    }

    #[tokio::test(start_paused = true)]
    async fn successful_dispatch_returns_host_payload() {
        let correlator = Arc::new(Correlator::new());
        spawn_host(Arc::clone(&correlator), Duration::from_secs(1), "done".into());
        let gateway = ToolDispatchGateway::new(Arc::clone(&correlator));
        let mut budget = ToolBudget::new(5);

        let c = call("transcode");
        let id = c.correlation_id.clone();
        let result = gateway.dispatch(c, &mut budget).await.unwrap();

        assert!(result.success);
        assert_eq!(result.correlation_id, id);
        assert_eq!(result.payload, Some("done".into()));
        assert_eq!(result.elapsed_ms, 1000);
        assert_eq!(budget.used(), 1);
        assert_eq!(correlator.outstanding_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_tool_yields_timeout_result() {
        let correlator = Arc::new(Correlator::new());
        spawn_host(Arc::clone(&correlator), Duration::from_secs(10), "late".into());
        let gateway =
            ToolDispatchGateway::new(Arc::clone(&correlator)).with_timeout(Duration::from_secs(5));
        let mut budget = ToolBudget::new(5);

        let result = gateway.dispatch(call("ocr"), &mut budget).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.kind, Some(ToolFailureKind::Timeout));
        assert_eq!(result.elapsed_ms, 5000);
        // The unit stays consumed
        assert_eq!(budget.used(), 1);
        assert_eq!(correlator.outstanding_count(), 0);
    }

    #[tokio::test]
    async fn exhausted_budget_issues_nothing() {
        let correlator = Arc::new(Correlator::new());
        let gateway = ToolDispatchGateway::new(Arc::clone(&correlator));
        let mut budget = ToolBudget::new(0);

        let err = gateway.dispatch(call("fetch"), &mut budget).await.unwrap_err();
        assert_eq!(err.max, 0);
        assert_eq!(correlator.pending_event_count(), 0);
        assert_eq!(correlator.outstanding_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn host_failure_maps_to_execution_error() {
        let correlator = Arc::new(Correlator::new());
        let host = Arc::clone(&correlator);
        tokio::spawn(async move {
            let batch = host.next_events().await;
            let id: CorrelationId =
                serde_json::from_value(batch[0].payload["correlationId"].clone()).unwrap();
            host.complete_call(&id, ToolOutcome::failed("codec missing"));
        });

        let gateway = ToolDispatchGateway::new(Arc::clone(&correlator));
        let mut budget = ToolBudget::new(1);
        let result = gateway.dispatch(call("transcode"), &mut budget).await.unwrap();

        assert_eq!(result.kind, Some(ToolFailureKind::ExecutionError));
        assert_eq!(result.error.as_deref(), Some("codec missing"));
    }

    #[tokio::test]
    async fn closed_correlator_yields_bridge_closed() {
        let correlator = Arc::new(Correlator::new());
        correlator.shutdown();
        let gateway = ToolDispatchGateway::new(Arc::clone(&correlator));
        let mut budget = ToolBudget::new(1);

        let result = gateway.dispatch(call("ocr"), &mut budget).await.unwrap();
        assert_eq!(result.kind, Some(ToolFailureKind::BridgeClosed));
    }
}
