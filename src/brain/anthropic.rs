use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::sse::for_each_event;
use super::{CompletionBackend, api_error};
use crate::error::BrainError;
use crate::types::ChatMessage;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const PROVIDER: &str = "anthropic";

pub struct AnthropicBackend {
    client: Client,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    base_url: String,
}

impl AnthropicBackend {
    pub fn new(api_key: impl Into<String>, model: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: model.to_string(),
            temperature: 0.3,
            max_tokens: 4096,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    MessageStart {},
    ContentBlockStart {},
    ContentBlockDelta { delta: BlockDelta },
    ContentBlockStop {},
    MessageDelta {},
    MessageStop {},
    Ping {},
    Error { error: ErrorBody },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Where a single-block text message is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    AwaitingMessage,
    AwaitingBlock,
    InBlock,
    BlockClosed,
    MessageDelta,
    Finished,
}

/// Checks events arrive as
/// `message_start, content_block_start, content_block_delta*, content_block_stop, message_delta, message_stop`.
#[derive(Debug)]
struct EventOrder {
    stage: Stage,
}

impl EventOrder {
    fn new() -> Self {
        Self {
            stage: Stage::AwaitingMessage,
        }
    }

    /// Advance on `event`, returning any text it carries.
    fn advance(&mut self, name: &str, event: StreamEvent) -> Result<Option<String>, BrainError> {
        let unexpected = |stage: Stage| BrainError::Protocol {
            provider: PROVIDER,
            detail: format!("{name} while {stage:?}"),
        };

        let (next, text) = match (self.stage, event) {
            (_, StreamEvent::Ping {}) => (self.stage, None),
            (_, StreamEvent::Error { error }) => {
                return Err(BrainError::Api {
                    provider: PROVIDER,
                    status: 200,
                    message: error.message,
                });
            }
            (Stage::AwaitingMessage, StreamEvent::MessageStart {}) => (Stage::AwaitingBlock, None),
            (Stage::AwaitingBlock, StreamEvent::ContentBlockStart {}) => (Stage::InBlock, None),
            (Stage::InBlock, StreamEvent::ContentBlockDelta { delta }) => match delta {
                BlockDelta::TextDelta { text } => (Stage::InBlock, Some(text)),
                BlockDelta::Other => return Err(unexpected(self.stage)),
            },
            (Stage::InBlock, StreamEvent::ContentBlockStop {}) => (Stage::BlockClosed, None),
            (Stage::BlockClosed, StreamEvent::MessageDelta {}) => (Stage::MessageDelta, None),
            (Stage::MessageDelta, StreamEvent::MessageStop {}) => (Stage::Finished, None),
            (stage, _) => return Err(unexpected(stage)),
        };
        self.stage = next;
        Ok(text)
    }

    fn finished(&self) -> bool {
        self.stage == Stage::Finished
    }
}

#[async_trait]
impl CompletionBackend for AnthropicBackend {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn complete(
        &self,
        system: &str,
        conversation: &[ChatMessage],
        on_delta: &mut (dyn for<'d> FnMut(&'d str) + Send),
    ) -> Result<String, BrainError> {
        let messages: Vec<_> = conversation
            .iter()
            .map(|m| json!({"role": m.role, "content": m.content}))
            .collect();

        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&json!({
                "model": self.model,
                "temperature": self.temperature,
                "max_tokens": self.max_tokens,
                "system": system,
                "messages": messages,
                "stream": true,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(PROVIDER, status, &body));
        }

        let mut order = EventOrder::new();
        let mut text = String::new();
        for_each_event(PROVIDER, response, |sse| {
            let name = sse.event;
            let event: StreamEvent = serde_json::from_str(&sse.data)?;
            if let StreamEvent::Unknown = event {
                return Err(BrainError::Protocol {
                    provider: PROVIDER,
                    detail: format!("unknown event {name}"),
                });
            }
            if let Some(delta) = order.advance(&name, event)? {
                on_delta(&delta);
                text.push_str(&delta);
            }
            Ok(order.finished())
        })
        .await?;

        if !order.finished() {
            return Err(BrainError::Protocol {
                provider: PROVIDER,
                detail: "stream ended before message_stop".into(),
            });
        }

        debug!(chars = text.len(), "anthropic turn complete");
        Ok(text)
    }
}
