//! Message Correlator: the pending-event queue and the outstanding-call table.
//!
//! Both structures sit behind one `std::sync::Mutex` that is held only for
//! the duration of a single enqueue, drain, register, or complete. Waiting
//! happens on the call's own oneshot receiver, never under the lock, so a
//! host thread completing calls can always make progress.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use hostbridge_core::event::{BridgeEvent, EventPayload};
use hostbridge_core::tool::{CorrelationId, ToolOutcome};
use tokio::sync::{Notify, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Registration and enqueue failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorrelatorError {
    #[error("correlation id {0} is already outstanding")]
    DuplicateId(CorrelationId),

    #[error("correlator has been shut down")]
    Closed,
}

/// Why an awaited call produced no outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    #[error("call deadline elapsed")]
    Timeout,

    #[error("correlator shut down while the call was outstanding")]
    Closed,
}

struct OutstandingCall {
    tx: oneshot::Sender<ToolOutcome>,
    deadline: Instant,
}

#[derive(Default)]
struct State {
    events: VecDeque<BridgeEvent>,
    last_seq: u64,
    outstanding: HashMap<CorrelationId, OutstandingCall>,
    closed: bool,
}

/// A registered call. Hand it back to [`Correlator::await_call`].
#[derive(Debug)]
pub struct PendingCall {
    id: CorrelationId,
    deadline: Instant,
    rx: oneshot::Receiver<ToolOutcome>,
}

impl PendingCall {
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

/// Event queue plus outstanding-call table, shared as `Arc<Correlator>`.
#[derive(Default)]
pub struct Correlator {
    state: Mutex<State>,
    wake: Notify,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an event and wake a waiting consumer. Returns its sequence number.
    pub fn enqueue_event(&self, payload: EventPayload) -> Result<u64, CorrelatorError> {
        let seq = {
            let mut state = self.lock();
            if state.closed {
                return Err(CorrelatorError::Closed);
            }
            state.last_seq += 1;
            let seq = state.last_seq;
            state.events.push_back(payload.into_event(seq));
            seq
        };
        self.wake.notify_one();
        Ok(seq)
    }

    /// Remove and return every queued event, oldest first. Never blocks.
    pub fn drain_events(&self) -> Vec<BridgeEvent> {
        self.lock().events.drain(..).collect()
    }

    /// Wait until at least one event is queued, then drain.
    ///
    /// Returns an empty batch once the correlator is shut down.
    pub async fn next_events(&self) -> Vec<BridgeEvent> {
        loop {
            {
                let mut state = self.lock();
                if !state.events.is_empty() {
                    return state.events.drain(..).collect();
                }
                if state.closed {
                    return Vec::new();
                }
            }
            self.wake.notified().await;
        }
    }

    /// Create an outstanding call that must be completed before `deadline`.
    pub fn register_call(
        &self,
        id: CorrelationId,
        deadline: Instant,
    ) -> Result<PendingCall, CorrelatorError> {
        let mut state = self.lock();
        if state.closed {
            return Err(CorrelatorError::Closed);
        }
        if state.outstanding.contains_key(&id) {
            return Err(CorrelatorError::DuplicateId(id));
        }
        let (tx, rx) = oneshot::channel();
        state
            .outstanding
            .insert(id.clone(), OutstandingCall { tx, deadline });
        debug!(correlation_id = %id, "Registered outstanding call");
        Ok(PendingCall { id, deadline, rx })
    }

    /// Resolve an outstanding call. Returns `true` if the outcome was delivered.
    ///
    /// Unknown, expired, and already-completed ids are ignored.
    pub fn complete_call(&self, id: &CorrelationId, outcome: ToolOutcome) -> bool {
        let Some(call) = self.lock().outstanding.remove(id) else {
            warn!(correlation_id = %id, "Completion for unknown or already-resolved call ignored");
            return false;
        };

        if Instant::now() > call.deadline {
            debug!(correlation_id = %id, "Completion arrived after deadline");
        }

        if call.tx.send(outcome).is_err() {
            warn!(correlation_id = %id, "Caller stopped waiting; completion discarded");
            return false;
        }
        true
    }

    /// Wait for a call's outcome or its deadline, whichever comes first.
    pub async fn await_call(&self, pending: PendingCall) -> Result<ToolOutcome, CallError> {
        let PendingCall { id, deadline, rx } = pending;
        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(CallError::Closed),
            Err(_) => {
                self.lock().outstanding.remove(&id);
                debug!(correlation_id = %id, "Outstanding call expired");
                Err(CallError::Timeout)
            }
        }
    }

    /// Drop a registration without waiting for it.
    pub fn forget_call(&self, id: &CorrelationId) {
        self.lock().outstanding.remove(id);
    }

    pub fn outstanding_count(&self) -> usize {
        self.lock().outstanding.len()
    }

    pub fn pending_event_count(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Clear the queue and fail every outstanding call with [`CallError::Closed`].
    pub fn shutdown(&self) {
        let (dropped_events, dropped_calls) = {
            let mut state = self.lock();
            state.closed = true;
            let events = state.events.len();
            state.events.clear();
            let calls = state.outstanding.len();
            state.outstanding.clear();
            (events, calls)
        };
        self.wake.notify_one();
        if dropped_events > 0 || dropped_calls > 0 {
            warn!(dropped_events, dropped_calls, "Correlator shut down with work in flight");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostbridge_core::event::{EventKind, ProgressUpdate};
    use std::sync::Arc;
    use std::time::Duration;

    fn progress(state: &str) -> EventPayload {
        EventPayload::Progress(ProgressUpdate {
            session_id: "s".into(),
            state: state.into(),
            steps: 0,
            tool_calls: 0,
            detail: None,
        })
    }

    fn in_secs(secs: u64) -> Instant {
        Instant::now() + Duration::from_secs(secs)
    }

    #[test]
    fn drain_is_fifo_and_never_repeats() {
        let c = Correlator::new();
        c.enqueue_event(progress("e1")).unwrap();
        c.enqueue_event(progress("e2")).unwrap();

        let first = c.drain_events();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].payload["state"], "e1");
        assert_eq!(first[1].payload["state"], "e2");

        c.enqueue_event(progress("e3")).unwrap();
        let second = c.drain_events();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].payload["state"], "e3");
        assert!(c.drain_events().is_empty());
    }

    #[test]
    fn sequence_numbers_increase_by_one() {
        let c = Correlator::new();
        let seqs: Vec<u64> = (0..4)
            .map(|_| c.enqueue_event(progress("x")).unwrap())
            .collect();
        assert_eq!(seqs, vec![1, 2, 3, 4]);
        let drained: Vec<u64> = c.drain_events().iter().map(|e| e.seq).collect();
        assert_eq!(drained, seqs);
        assert_eq!(c.drain_events().len(), 0);
    }

    #[tokio::test]
    async fn duplicate_registration_rejected() {
        let c = Correlator::new();
        let _first = c.register_call("dup".into(), in_secs(5)).unwrap();
        let err = c.register_call("dup".into(), in_secs(5)).unwrap_err();
        assert_eq!(err, CorrelatorError::DuplicateId("dup".into()));
        assert_eq!(c.outstanding_count(), 1);
    }

    #[tokio::test]
    async fn completion_resolves_exactly_once() {
        let c = Correlator::new();
        let pending = c.register_call("c1".into(), in_secs(5)).unwrap();

        assert!(c.complete_call(&"c1".into(), ToolOutcome::ok("first".into())));
        assert!(!c.complete_call(&"c1".into(), ToolOutcome::ok("second".into())));

        let outcome = c.await_call(pending).await.unwrap();
        assert_eq!(outcome.payload, "first");
        assert_eq!(c.outstanding_count(), 0);
    }

    #[test]
    fn unknown_completion_is_noop() {
        let c = Correlator::new();
        assert!(!c.complete_call(&"nobody".into(), ToolOutcome::failed("x")));
    }

    #[tokio::test(start_paused = true)]
    async fn expired_call_times_out_and_is_removed() {
        let c = Correlator::new();
        let pending = c.register_call("slow".into(), in_secs(5)).unwrap();

        let err = c.await_call(pending).await.unwrap_err();
        assert_eq!(err, CallError::Timeout);
        assert_eq!(c.outstanding_count(), 0);

        // A late completion is ignored
        assert!(!c.complete_call(&"slow".into(), ToolOutcome::ok(serde_json::Value::Null)));
    }

    #[tokio::test(start_paused = true)]
    async fn completion_from_another_task_wakes_waiter() {
        let c = Arc::new(Correlator::new());
        let pending = c.register_call("c2".into(), in_secs(30)).unwrap();

        let host = Arc::clone(&c);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            host.complete_call(&"c2".into(), ToolOutcome::ok(serde_json::json!({"n": 1})));
        });

        let outcome = c.await_call(pending).await.unwrap();
        assert_eq!(outcome.payload["n"], 1);
    }

    #[tokio::test]
    async fn shutdown_fails_outstanding_calls() {
        let c = Correlator::new();
        let pending = c.register_call("c3".into(), in_secs(30)).unwrap();
        c.enqueue_event(progress("queued")).unwrap();

        c.shutdown();

        assert_eq!(c.await_call(pending).await.unwrap_err(), CallError::Closed);
        assert_eq!(c.pending_event_count(), 0);
        assert!(c.is_closed());
        assert_eq!(
            c.enqueue_event(progress("late")).unwrap_err(),
            CorrelatorError::Closed
        );
        assert!(matches!(
            c.register_call("c4".into(), in_secs(1)),
            Err(CorrelatorError::Closed)
        ));
    }

    #[tokio::test]
    async fn next_events_waits_for_enqueue() {
        let c = Arc::new(Correlator::new());
        let producer = Arc::clone(&c);
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            producer.enqueue_event(progress("pushed")).unwrap();
        });

        let batch = c.next_events().await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].kind, EventKind::ProgressUpdate);
    }

    #[tokio::test]
    async fn next_events_returns_empty_after_shutdown() {
        let c = Correlator::new();
        c.shutdown();
        assert!(c.next_events().await.is_empty());
    }
}
