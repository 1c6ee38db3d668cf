//! The two-lane transport between the native host and the reasoning runtime.
//!
//! - **Call lane**: a dedicated multi-thread tokio runtime serving control
//!   calls. A call returns a [`CallHandle`] at once; the host blocks on it
//!   with [`CallHandle::wait`] or awaits it.
//! - **Delivery lane**: a dedicated OS thread that feeds host outcomes into
//!   the correlator. Tool results never queue behind control calls, so a
//!   `handleQuery` waiting on a tool cannot starve the delivery of that
//!   tool's result, even with a single call worker.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread::JoinHandle;

use hostbridge_config::AppConfig;
use hostbridge_core::error::BridgeError;
use hostbridge_core::event::BridgeEvent;
use hostbridge_core::tool::{CorrelationId, ToolOutcome};
use serde_json::json;
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::control::BridgeRuntime;
use crate::protocol::{ControlCall, ControlReply, DeliverParams, Method};

/// One host outcome on its way to the correlator.
struct Delivery {
    correlation_id: CorrelationId,
    outcome: ToolOutcome,
}

/// Pending reply to a control call.
///
/// Resolves to a failure reply if the call lane goes away first.
pub struct CallHandle {
    rx: oneshot::Receiver<ControlReply>,
}

impl CallHandle {
    fn resolved(reply: ControlReply) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(reply);
        Self { rx }
    }

    /// Block the current thread until the reply arrives.
    ///
    /// Must not be called from inside an async runtime; `.await` the handle
    /// there instead.
    pub fn wait(self) -> ControlReply {
        self.rx.blocking_recv().unwrap_or_else(|_| lane_gone())
    }
}

impl Future for CallHandle {
    type Output = ControlReply;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|reply| reply.unwrap_or_else(|_| lane_gone()))
    }
}

fn lane_gone() -> ControlReply {
    ControlReply::from(Err(BridgeError::Closed(
        "call lane stopped before replying".into(),
    )))
}

/// Entry point for the native host.
pub struct Transport {
    runtime: Arc<BridgeRuntime>,
    calls: Option<Runtime>,
    deliveries: Option<mpsc::UnboundedSender<Delivery>>,
    delivery_thread: Option<JoinHandle<()>>,
}

impl Transport {
    /// Start both lanes. The runtime behind them starts uninitialized.
    pub fn start(config: AppConfig) -> Result<Self, BridgeError> {
        let workers = config.bridge.call_workers.max(1);
        let runtime = Arc::new(BridgeRuntime::new(config));

        let calls = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(workers)
            .thread_name("hostbridge-call")
            .enable_all()
            .build()
            .map_err(|e| BridgeError::Internal(format!("cannot start call lane: {e}")))?;

        let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
        let delivering = Arc::clone(&runtime);
        let delivery_thread = std::thread::Builder::new()
            .name("hostbridge-delivery".into())
            .spawn(move || {
                while let Some(delivery) = rx.blocking_recv() {
                    match delivering.deliver(&delivery.correlation_id, delivery.outcome) {
                        Ok(true) => {}
                        Ok(false) => {
                            debug!(correlation_id = %delivery.correlation_id, "Delivery had no waiting call")
                        }
                        Err(e) => {
                            warn!(correlation_id = %delivery.correlation_id, error = %e, "Delivery dropped")
                        }
                    }
                }
                debug!("Delivery lane stopped");
            })
            .map_err(|e| BridgeError::Internal(format!("cannot start delivery lane: {e}")))?;

        info!(call_workers = workers, "Transport started");
        Ok(Self {
            runtime,
            calls: Some(calls),
            deliveries: Some(tx),
            delivery_thread: Some(delivery_thread),
        })
    }

    pub fn runtime(&self) -> &Arc<BridgeRuntime> {
        &self.runtime
    }

    /// Issue a control call. Never blocks the calling thread.
    ///
    /// `deliverToolResult` is routed to the delivery lane; everything else
    /// runs on the call lane.
    pub fn send_call(&self, call: ControlCall) -> CallHandle {
        if Method::parse(&call.method) == Some(Method::DeliverToolResult) {
            return CallHandle::resolved(self.route_delivery(&call).into());
        }

        let Some(calls) = &self.calls else {
            return CallHandle::resolved(lane_gone());
        };
        let (tx, rx) = oneshot::channel();
        let runtime = Arc::clone(&self.runtime);
        calls.spawn(async move {
            let reply = runtime.handle(call).await;
            if tx.send(reply).is_err() {
                debug!("Caller dropped its call handle");
            }
        });
        CallHandle { rx }
    }

    fn route_delivery(&self, call: &ControlCall) -> Result<serde_json::Value, BridgeError> {
        if !self.runtime.is_initialized() {
            return Err(BridgeError::Uninitialized);
        }
        let params: DeliverParams = Method::DeliverToolResult.params(&call.params)?;
        self.push_response(params.correlation_id, params.outcome)?;
        Ok(json!({ "queued": true }))
    }

    /// Drain queued events without blocking.
    pub fn poll_events(&self) -> Result<Vec<BridgeEvent>, BridgeError> {
        self.runtime.poll_events()
    }

    /// Supply the outcome of a tool invocation or on-device inference.
    pub fn push_response(&self, id: CorrelationId, outcome: ToolOutcome) -> Result<(), BridgeError> {
        if !self.runtime.is_initialized() {
            return Err(BridgeError::Uninitialized);
        }
        let deliveries = self
            .deliveries
            .as_ref()
            .ok_or_else(|| BridgeError::Closed("delivery lane stopped".into()))?;
        deliveries
            .send(Delivery {
                correlation_id: id,
                outcome,
            })
            .map_err(|_| BridgeError::Closed("delivery lane stopped".into()))
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if self.runtime.is_initialized() {
            let _ = self.runtime.shutdown();
        }
        if let Some(calls) = self.calls.take() {
            calls.shutdown_background();
        }
        // Closing the channel ends the delivery loop
        self.deliveries.take();
        if let Some(thread) = self.delivery_thread.take() {
            if thread.join().is_err() {
                warn!("Delivery lane panicked");
            }
        }
    }
}
