//! LLM integration.
//!
//! The rewrite engine talks to models through the [`LlmProvider`] trait.
//! Providers are built with rig-core against an OpenAI-compatible chat
//! completions endpoint, and `RigAdapter` bridges rig's `CompletionModel`
//! to our trait.

pub mod provider;
mod rig_adapter;

pub use provider::*;
pub use rig_adapter::RigAdapter;

use std::sync::Arc;

use rig::client::CompletionClient;
use secrecy::{ExposeSecret, SecretString};

use crate::error::LlmError;

/// Default endpoint for the hosted rewrite model.
pub const DEFAULT_API_BASE: &str = "https://api.intelligence.io.solutions/api/v1";

/// Default rewrite model.
pub const DEFAULT_MODEL: &str = "meta-llama/Llama-3.3-70B-Instruct";

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: SecretString,
    pub api_base: String,
    pub model: String,
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    use rig::providers::openai;

    let client: openai::Client = openai::Client::builder()
        .api_key(config.api_key.expose_secret())
        .base_url(&config.api_base)
        .build()
        .map_err(|e| LlmError::RequestFailed {
            provider: "openai".to_string(),
            reason: format!("Failed to create OpenAI-compatible client: {}", e),
        })?;

    // Llama gateways only speak chat completions, not the responses API.
    let model = client.completions_api().completion_model(&config.model);
    tracing::info!(
        "Using OpenAI-compatible endpoint {} (model: {})",
        config.api_base,
        config.model
    );
    Ok(Arc::new(RigAdapter::new(model, &config.model)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base: &str) -> LlmConfig {
        LlmConfig {
            api_key: SecretString::from("sk-test"),
            api_base: base.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }

    #[test]
    fn test_create_provider_with_custom_base() {
        // rig-core clients accept any key at construction; auth fails on request.
        let provider = create_provider(&config("https://api.example.com/v1"));
        assert!(provider.is_ok());
        assert_eq!(provider.unwrap().model_name(), DEFAULT_MODEL);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_request_failure() {
        let provider = create_provider(&config("http://127.0.0.1:1")).unwrap();
        let err = provider
            .complete(CompletionRequest::new(vec![ChatMessage::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::RequestFailed { .. }));
    }
}
