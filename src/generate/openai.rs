use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{
    check_status, spawn_line_reader, GenerationRequest, Generator, LineEvent, TextStream,
    SYSTEM_PROMPT,
};
use crate::config::GenerationConfig;
use crate::error::RagError;

const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com/v1";

/// Streaming chat completions against OpenAI or any compatible server.
///
/// `generation.url` overrides the API base (default `https://api.openai.com/v1`).
/// Requires `OPENAI_API_KEY`.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
    timeout: Duration,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let base = config.url.as_deref().unwrap_or(DEFAULT_OPENAI_BASE);
        // No client-wide timeout: it would cut off long streams. The overall
        // deadline is enforced while collecting.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("failed to build OpenAI HTTP client")?;

        Ok(Self {
            client,
            api_key,
            model: config.model.clone(),
            endpoint: format!("{}/chat/completions", base.trim_end_matches('/')),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn stream(
        &self,
        request: &GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<TextStream, RagError> {
        let user = request.user_message();
        let body = ChatRequest {
            model: &self.model,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: true,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &user,
                },
            ],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.trim())
            .json(&body)
            .send()
            .await
            .map_err(|e| RagError::GenerationUnavailable(format!("OpenAI request failed: {e}")))?;
        let response = check_status(response, "OpenAI").await?;

        Ok(spawn_line_reader(response, parse_sse_line, cancel))
    }
}

/// Interpret one server-sent-events line from a streaming completion.
pub fn parse_sse_line(line: &str) -> Result<LineEvent> {
    let line = line.trim();
    let Some(payload) = line.strip_prefix("data:") else {
        // Blank separators, comments, `event:` and `id:` fields.
        return Ok(LineEvent::Skip);
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        return Ok(LineEvent::Done);
    }

    let chunk: ChatChunk =
        serde_json::from_str(payload).context("failed to parse OpenAI stream chunk")?;
    let content = chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .unwrap_or_default();

    if content.is_empty() {
        Ok(LineEvent::Skip)
    } else {
        Ok(LineEvent::Fragment(content))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_fragment() {
        let line = r#"data: {"choices":[{"index":0,"delta":{"content":"Hel"}}]}"#;
        assert_eq!(
            parse_sse_line(line).unwrap(),
            LineEvent::Fragment("Hel".into())
        );
    }

    #[test]
    fn sse_done_and_noise() {
        assert_eq!(parse_sse_line("data: [DONE]").unwrap(), LineEvent::Done);
        assert_eq!(parse_sse_line("").unwrap(), LineEvent::Skip);
        assert_eq!(parse_sse_line(": keep-alive").unwrap(), LineEvent::Skip);
        assert_eq!(parse_sse_line("event: message").unwrap(), LineEvent::Skip);
    }

    #[test]
    fn sse_role_only_delta_is_skipped() {
        let line = r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert_eq!(parse_sse_line(line).unwrap(), LineEvent::Skip);
        let line = r#"data: {"choices":[]}"#;
        assert_eq!(parse_sse_line(line).unwrap(), LineEvent::Skip);
    }

    #[test]
    fn sse_garbage_is_an_error() {
        assert!(parse_sse_line("data: {not json").is_err());
    }
}
