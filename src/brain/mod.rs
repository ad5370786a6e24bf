//! Streaming completion providers behind one interface.

mod anthropic;
mod openai;
pub mod sse;

use std::sync::Arc;

use async_trait::async_trait;
use clap::ValueEnum;

use crate::error::{BrainError, ConfigError};
use crate::types::ChatMessage;

pub use anthropic::AnthropicBackend;
pub use openai::OpenAiBackend;

/// Produces one assistant turn for a conversation.
///
/// Text increments are forwarded to `on_delta` as they arrive; the complete
/// text is returned once the provider finishes the turn.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn complete(
        &self,
        system: &str,
        conversation: &[ChatMessage],
        on_delta: &mut (dyn for<'d> FnMut(&'d str) + Send),
    ) -> Result<String, BrainError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Provider {
    #[default]
    Openai,
    Anthropic,
}

/// Provider settings resolved from configuration.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub provider: Provider,
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub anthropic_api_key: Option<String>,
    pub anthropic_model: String,
}

/// Build the configured provider. Called once; the choice never changes mid-run.
pub fn from_config(config: &LlmConfig) -> Result<Arc<dyn CompletionBackend>, ConfigError> {
    match config.provider {
        Provider::Openai => {
            let key = config
                .openai_api_key
                .clone()
                .ok_or(ConfigError::MissingEnvVar("OPENAI_API_KEY"))?;
            Ok(Arc::new(OpenAiBackend::new(key, &config.openai_model)))
        }
        Provider::Anthropic => {
            let key = config
                .anthropic_api_key
                .clone()
                .ok_or(ConfigError::MissingEnvVar("ANTHROPIC_API_KEY"))?;
            Ok(Arc::new(AnthropicBackend::new(key, &config.anthropic_model)))
        }
    }
}

/// Pull a readable message out of a provider error body.
fn api_error(provider: &'static str, status: reqwest::StatusCode, body: &str) -> BrainError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.trim().to_string());
    BrainError::Api {
        provider,
        status: status.as_u16(),
        message,
    }
}
