//! On-device model backend.
//!
//! Inference runs on the native host (which owns the weights and the
//! accelerator). A completion is requested with a
//! `model_inference_requested` event and answered through the same
//! correlation path as a tool result. Small local models rarely produce a
//! clean chat envelope, so the host's payload goes through
//! [`synthesize_envelope`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hostbridge_bridge::{CallError, Correlator, CorrelatorError};
use hostbridge_core::error::ProviderError;
use hostbridge_core::event::{EventPayload, InferenceRequest};
use hostbridge_core::provider::{Provider, ProviderRequest, ProviderResponse};
use hostbridge_core::tool::CorrelationId;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::normalize::synthesize_envelope;

/// Runs inference on the native host through the [`Correlator`].
pub struct HostModelProvider {
    name: String,
    correlator: Arc<Correlator>,
    deadline: Duration,
}

impl HostModelProvider {
    pub fn new(name: impl Into<String>, correlator: Arc<Correlator>, deadline: Duration) -> Self {
        Self {
            name: name.into(),
            correlator,
            deadline,
        }
    }
}

fn closed() -> ProviderError {
    ProviderError::Network("bridge to the native host is closed".into())
}

#[async_trait]
impl Provider for HostModelProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let correlation_id = CorrelationId::new();
        let model = request.model.clone();

        let pending = self
            .correlator
            .register_call(correlation_id.clone(), Instant::now() + self.deadline)
            .map_err(|e| match e {
                CorrelatorError::Closed => closed(),
                other => ProviderError::InferenceFailed(other.to_string()),
            })?;

        let event = EventPayload::ModelInference(InferenceRequest {
            correlation_id: correlation_id.clone(),
            request,
        });
        if self.correlator.enqueue_event(event).is_err() {
            self.correlator.forget_call(&correlation_id);
            return Err(closed());
        }

        debug!(provider = %self.name, model = %model, correlation_id = %correlation_id, "Requested on-device inference");

        let outcome = match self.correlator.await_call(pending).await {
            Ok(outcome) => outcome,
            Err(CallError::Timeout) => {
                warn!(provider = %self.name, correlation_id = %correlation_id, "On-device inference timed out");
                return Err(ProviderError::Timeout(format!(
                    "no inference result within {}s",
                    self.deadline.as_secs_f64()
                )));
            }
            Err(CallError::Closed) => return Err(closed()),
        };

        if !outcome.success {
            return Err(ProviderError::InferenceFailed(
                outcome
                    .error
                    .unwrap_or_else(|| "host reported failure without detail".into()),
            ));
        }

        synthesize_envelope(outcome.payload, model)
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(!self.correlator.is_closed())
    }
}
