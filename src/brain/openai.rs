use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::sse::for_each_event;
use super::{CompletionBackend, api_error};
use crate::error::BrainError;
use crate::types::ChatMessage;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const PROVIDER: &str = "openai";

pub struct OpenAiBackend {
    client: Client,
    api_key: String,
    model: String,
    temperature: f32,
    base_url: String,
}

impl OpenAiBackend {
    pub fn new(api_key: impl Into<String>, model: &str) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: model.to_string(),
            temperature: 1.0,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    content: Option<String>,
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn complete(
        &self,
        system: &str,
        conversation: &[ChatMessage],
        on_delta: &mut (dyn for<'d> FnMut(&'d str) + Send),
    ) -> Result<String, BrainError> {
        let mut messages = vec![json!({"role": "system", "content": system})];
        messages.extend(
            conversation
                .iter()
                .map(|m| json!({"role": m.role, "content": m.content})),
        );

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "temperature": self.temperature,
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

        let mut text = String::new();
        let done = for_each_event(PROVIDER, response, |event| {
            if event.data == "[DONE]" {
                return Ok(true);
            }
            let chunk: ChatChunk = serde_json::from_str(&event.data)?;
            if let Some(delta) = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
                .filter(|d| !d.is_empty())
            {
                on_delta(&delta);
                text.push_str(&delta);
            }
            Ok(false)
        })
        .await?;
        if !done {
            return Err(BrainError::Protocol {
                provider: PROVIDER,
                detail: "stream ended before [DONE]".into(),
            });
        }

        debug!(chars = text.len(), "openai turn complete");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChatMessage;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse_body(deltas: &[&str]) -> String {
        let mut body = String::from("data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n");
        for d in deltas {
            body.push_str(&format!(
                "data: {}\n\n",
                json!({"choices": [{"delta": {"content": d}}]})
            ));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    #[tokio::test]
    async fn streams_and_accumulates_deltas() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_body(&["I see a page.\n", "<answer>", "42</answer>"])),
            )
            .mount(&server)
            .await;

        let backend = OpenAiBackend::new("sk-test", "gpt-4-turbo-preview").with_base_url(server.uri());
        let mut seen = Vec::new();
        let text = backend
            .complete(
                "system prompt",
                &[ChatMessage::user("task")],
                &mut |d: &str| seen.push(d.to_string()),
            )
            .await
            .unwrap();

        assert_eq!(text, "I see a page.\n<answer>42</answer>");
        assert_eq!(seen.len(), 3);

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "system prompt");
        assert_eq!(body["messages"][1]["role"], "user");
    }

    #[tokio::test]
    async fn error_status_becomes_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .set_body_string(r#"{"error":{"message":"Rate limit reached"}}"#),
            )
            .mount(&server)
            .await;

        let backend = OpenAiBackend::new("sk-test", "m").with_base_url(server.uri());
        let err = backend
            .complete("s", &[ChatMessage::user("t")], &mut |_: &str| {})
            .await
            .unwrap_err();
        assert!(matches!(err, BrainError::Api { status: 429, .. }));
    }

    #[tokio::test]
    async fn body_cut_before_done_is_a_protocol_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(
                        "data: {\"choices\":[{\"delta\":{\"content\":\"<answer>12\"}}]}\n\n",
                    ),
            )
            .mount(&server)
            .await;

        let backend = OpenAiBackend::new("sk-test", "m").with_base_url(server.uri());
        let err = backend
            .complete("s", &[ChatMessage::user("t")], &mut |_: &str| {})
            .await
            .unwrap_err();
        assert!(
            matches!(err, BrainError::Protocol { provider: "openai", .. }),
            "{err}"
        );
    }
}
