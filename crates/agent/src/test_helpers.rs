//! Shared test helpers: a scripted model and a simulated native host.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use hostbridge_bridge::Correlator;
use hostbridge_core::error::ProviderError;
use hostbridge_core::event::EventKind;
use hostbridge_core::message::{Message, MessageToolCall};
use hostbridge_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use hostbridge_core::tool::{CorrelationId, ToolOutcome};

/// A mock provider that returns a sequence of scripted responses.
///
/// Panics if more calls are made than responses provided.
pub struct SequentialMockProvider {
    responses: Mutex<Vec<ProviderResponse>>,
    call_count: Mutex<usize>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            call_count: Mutex::new(0),
        }
    }

    pub fn single_text(text: &str) -> Self {
        Self::new(vec![make_text_response(text)])
    }

    /// First returns tool calls, then a final answer.
    pub fn tool_then_answer(tool_calls: Vec<MessageToolCall>, thought: &str, answer: &str) -> Self {
        Self::new(vec![
            make_tool_call_response(tool_calls, thought),
            make_text_response(answer),
        ])
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut count = self.call_count.lock().unwrap();
        let responses = self.responses.lock().unwrap();

        if *count >= responses.len() {
            panic!(
                "SequentialMockProvider: no more responses (call #{}, have {})",
                *count,
                responses.len()
            );
        }

        let response = responses[*count].clone();
        *count += 1;
        Ok(response)
    }
}

fn usage() -> Option<Usage> {
    Some(Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    })
}

pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: usage(),
        model: "mock-model".into(),
        stop_reason: Some("stop".into()),
    }
}

pub fn make_tool_call_response(tool_calls: Vec<MessageToolCall>, thought: &str) -> ProviderResponse {
    let mut msg = Message::assistant(thought);
    msg.tool_calls = tool_calls;
    ProviderResponse {
        message: msg,
        usage: usage(),
        model: "mock-model".into(),
        stop_reason: Some("tool_calls".into()),
    }
}

pub fn make_tool_call(name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: serde_json::to_string(&args).unwrap(),
    }
}

/// A native host that answers every tool invocation after `latency`.
pub struct SimulatedHost {
    invoked: Arc<Mutex<Vec<String>>>,
}

impl SimulatedHost {
    /// Tool names in the order the host received them.
    pub fn invoked(&self) -> Vec<String> {
        self.invoked.lock().unwrap().clone()
    }
}

pub fn spawn_host(correlator: Arc<Correlator>, latency: Duration) -> SimulatedHost {
    let invoked = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&invoked);

    tokio::spawn(async move {
        loop {
            let batch = correlator.next_events().await;
            if batch.is_empty() {
                break;
            }
            for event in batch {
                if event.kind != EventKind::ToolInvocationRequested {
                    continue;
                }
                let tool = event.payload["toolName"].as_str().unwrap().to_string();
                let id: CorrelationId =
                    serde_json::from_value(event.payload["correlationId"].clone()).unwrap();
                seen.lock().unwrap().push(tool.clone());

                let correlator = Arc::clone(&correlator);
                tokio::spawn(async move {
                    tokio::time::sleep(latency).await;
                    correlator.complete_call(&id, ToolOutcome::ok(serde_json::json!({ "tool": tool })));
                });
            }
        }
    });

    SimulatedHost { invoked }
}
