//! The control surface: what each host call does.
//!
//! [`BridgeRuntime`] owns the initialized state (correlator and
//! orchestrator). It is created uninitialized; `initialize` builds the state,
//! `shutdown` tears it down, and every other call fails with
//! [`BridgeError::Uninitialized`] in between.

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use hostbridge_agent::{Orchestrator, Query};
use hostbridge_bridge::{Correlator, ToolDispatchGateway};
use hostbridge_config::AppConfig;
use hostbridge_core::error::BridgeError;
use hostbridge_core::event::BridgeEvent;
use hostbridge_core::message::SessionId;
use hostbridge_core::tool::{CorrelationId, ToolOutcome};
use hostbridge_providers::{Normalizer, build_from_config};
use serde_json::{Value, json};
use tracing::{info, warn};

use crate::logging::install_file_logging;
use crate::protocol::{
    CancelParams, ControlCall, ControlReply, DeliverParams, InitializeParams, Method, QueryParams,
    StatusReport,
};

/// State that exists between `initialize` and `shutdown`.
struct Ready {
    correlator: Arc<Correlator>,
    orchestrator: Arc<Orchestrator>,
    provider: String,
    model: String,
    log_file: PathBuf,
}

/// The reasoning runtime as seen by the native host.
pub struct BridgeRuntime {
    config: AppConfig,
    state: RwLock<Option<Arc<Ready>>>,
}

impl BridgeRuntime {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            state: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.current().is_some()
    }

    fn current(&self) -> Option<Arc<Ready>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn ready(&self) -> Result<Arc<Ready>, BridgeError> {
        self.current().ok_or(BridgeError::Uninitialized)
    }

    /// The correlator of the initialized runtime.
    pub fn correlator(&self) -> Result<Arc<Correlator>, BridgeError> {
        Ok(Arc::clone(&self.ready()?.correlator))
    }

    /// Serve one control call.
    pub async fn handle(&self, call: ControlCall) -> ControlReply {
        let Some(method) = Method::parse(&call.method) else {
            warn!(method = %call.method, "Unknown control method");
            return ControlReply::failure(
                "invalid_params",
                format!("unknown method: {}", call.method),
            );
        };

        if method != Method::Initialize && !self.is_initialized() {
            return ControlReply::from(Err(BridgeError::Uninitialized));
        }

        let result = match method {
            Method::Initialize => method
                .params(&call.params)
                .and_then(|p| self.initialize(p)),
            Method::HandleQuery => match method.params(&call.params) {
                Ok(params) => self.handle_query(params).await,
                Err(e) => Err(e),
            },
            Method::DeliverToolResult => method
                .params(&call.params)
                .and_then(|p: DeliverParams| self.deliver(&p.correlation_id, p.outcome))
                .map(|accepted| json!({ "accepted": accepted })),
            Method::GetStatus => self.status(),
            Method::CancelSession => method
                .params(&call.params)
                .and_then(|p| self.cancel_session(p)),
            Method::Shutdown => self.shutdown(),
        };

        if let Err(e) = &result {
            warn!(method = method.as_str(), code = e.code(), error = %e, "Control call failed");
        }
        ControlReply::from(result)
    }

    /// Build the runtime state. Calling it again while initialized returns
    /// the existing state.
    pub fn initialize(&self, params: InitializeParams) -> Result<Value, BridgeError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(ready) = state.as_ref() {
            return Ok(ready_info(ready));
        }

        let log_dir = params
            .log_directory
            .unwrap_or_else(|| self.config.log_dir());
        let log_file = install_file_logging(&log_dir)?;

        let correlator = Arc::new(Correlator::new());
        let router = build_from_config(&self.config, &correlator);
        let provider_name = router.default_name().to_string();
        let backend = router.default().ok_or_else(|| {
            BridgeError::Internal(format!("provider {provider_name} is not available"))
        })?;
        let model = router.model_for(&provider_name).to_string();

        let gateway = ToolDispatchGateway::new(Arc::clone(&correlator))
            .with_timeout(self.config.bridge.tool_timeout());
        let orchestrator = Orchestrator::new(Normalizer::new(backend), gateway, model.clone())
            .with_config(&self.config);

        let ready = Arc::new(Ready {
            correlator,
            orchestrator: Arc::new(orchestrator),
            provider: provider_name,
            model,
            log_file,
        });
        info!(
            provider = %ready.provider,
            model = %ready.model,
            log_file = %ready.log_file.display(),
            "Runtime initialized"
        );
        let info = ready_info(&ready);
        *state = Some(ready);
        Ok(info)
    }

    /// Run a query to its terminal outcome and return the `QueryResponse`.
    pub async fn handle_query(&self, params: QueryParams) -> Result<Value, BridgeError> {
        let ready = self.ready()?;
        if params.text.trim().is_empty() {
            return Err(BridgeError::InvalidParams {
                method: Method::HandleQuery.as_str().into(),
                reason: "text must not be empty".into(),
            });
        }

        let query = Query {
            text: params.text,
            history: params.history,
            session_id: params.session_id.as_deref().map(SessionId::from),
            max_steps: params.max_steps,
            max_tool_calls: params.max_tool_calls,
            tools: params.tools,
        };

        let report = ready.orchestrator.run(query).await?;
        serde_json::to_value(&report).map_err(|e| BridgeError::Internal(e.to_string()))
    }

    /// Hand a host outcome to the waiting call. Returns whether a call was
    /// waiting for it.
    pub fn deliver(&self, id: &CorrelationId, outcome: ToolOutcome) -> Result<bool, BridgeError> {
        Ok(self.ready()?.correlator.complete_call(id, outcome))
    }

    pub fn status(&self) -> Result<Value, BridgeError> {
        let ready = self.ready()?;
        let report = StatusReport {
            status: if ready.correlator.is_closed() {
                "error".into()
            } else {
                "ready".into()
            },
            outstanding_calls: ready.correlator.outstanding_count(),
            pending_events: ready.correlator.pending_event_count(),
            active_sessions: ready.orchestrator.active_sessions(),
        };
        serde_json::to_value(report).map_err(|e| BridgeError::Internal(e.to_string()))
    }

    pub fn cancel_session(&self, params: CancelParams) -> Result<Value, BridgeError> {
        let cancelled = self
            .ready()?
            .orchestrator
            .cancel(&SessionId::from(params.session_id.as_str()));
        Ok(json!({ "cancelled": cancelled }))
    }

    /// Drain queued events in FIFO order.
    pub fn poll_events(&self) -> Result<Vec<BridgeEvent>, BridgeError> {
        Ok(self.ready()?.correlator.drain_events())
    }

    /// Tear down the runtime. Running sessions are cancelled and every
    /// outstanding call resolves as `bridge_closed`.
    pub fn shutdown(&self) -> Result<Value, BridgeError> {
        let ready = self
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(BridgeError::Uninitialized)?;

        let active = ready.orchestrator.active_sessions();
        ready.orchestrator.cancel_all();
        ready.correlator.shutdown();
        info!(active_sessions = active, "Runtime shut down");
        Ok(json!({ "shutdown": true }))
    }
}

fn ready_info(ready: &Ready) -> Value {
    json!({
        "status": "ready",
        "provider": ready.provider,
        "model": ready.model,
        "logFile": ready.log_file,
    })
}
