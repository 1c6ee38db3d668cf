//! Provider router — selects the model backend based on config.

use std::collections::HashMap;
use std::sync::Arc;

use hostbridge_bridge::Correlator;
use hostbridge_config::{AppConfig, ProviderKind};
use hostbridge_core::provider::Provider;

use crate::anthropic::AnthropicProvider;
use crate::host::HostModelProvider;
use crate::openai_compat::OpenAiCompatProvider;

/// Routes requests to the correct provider.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    models: HashMap<String, String>,
    default_provider: String,
    default_model: String,
}

impl ProviderRouter {
    /// Create a new router with a default provider.
    pub fn new(default_provider: impl Into<String>, default_model: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            models: HashMap::new(),
            default_provider: default_provider.into(),
            default_model: default_model.into(),
        }
    }

    /// Register a provider.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Get the default provider.
    pub fn default(&self) -> Option<Arc<dyn Provider>> {
        self.providers.get(&self.default_provider).cloned()
    }

    pub fn default_name(&self) -> &str {
        &self.default_provider
    }

    /// Get a specific provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// The model to request from a provider: its own default, else the global one.
    pub fn model_for(&self, name: &str) -> &str {
        self.models
            .get(name)
            .map(String::as_str)
            .unwrap_or(&self.default_model)
    }

    /// List all registered provider names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Build providers from configuration.
///
/// Host-kind providers issue inference through `correlator`.
pub fn build_from_config(config: &AppConfig, correlator: &Arc<Correlator>) -> ProviderRouter {
    let mut router = ProviderRouter::new(&config.default_provider, &config.default_model);

    for (name, provider_config) in &config.providers {
        let api_key = provider_config
            .api_key
            .clone()
            .or_else(|| config.api_key.clone())
            .unwrap_or_default();

        let provider: Arc<dyn Provider> = match provider_config.resolved_kind(name) {
            ProviderKind::Anthropic => {
                let mut p = AnthropicProvider::new(&api_key);
                if let Some(url) = &provider_config.api_url {
                    p = p.with_base_url(url);
                }
                Arc::new(p)
            }
            ProviderKind::Host => Arc::new(HostModelProvider::new(
                name.clone(),
                Arc::clone(correlator),
                config.bridge.default_call_deadline(),
            )),
            ProviderKind::Openai => {
                let base_url = provider_config
                    .api_url
                    .clone()
                    .unwrap_or_else(|| default_base_url(name));
                Arc::new(OpenAiCompatProvider::new(name, &base_url, &api_key))
            }
        };

        if let Some(model) = &provider_config.default_model {
            router.models.insert(name.clone(), model.clone());
        }
        router.register(name.clone(), provider);
    }

    // Ensure the default provider exists (even if not explicitly configured)
    if router.get(&config.default_provider).is_none() {
        let api_key = config.api_key.clone().unwrap_or_default();
        let name = config.default_provider.as_str();

        let provider: Arc<dyn Provider> = match name {
            "anthropic" => Arc::new(AnthropicProvider::new(&api_key)),
            "host" => Arc::new(HostModelProvider::new(
                name,
                Arc::clone(correlator),
                config.bridge.default_call_deadline(),
            )),
            _ => Arc::new(OpenAiCompatProvider::new(name, default_base_url(name), &api_key)),
        };

        router.register(name, provider);
    }

    router
}

/// Get the default base URL for well-known OpenAI-compatible providers.
fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1".into(),
        _ => "http://localhost:8080/v1".into(),
    }
}
