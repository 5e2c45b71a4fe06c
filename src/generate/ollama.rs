use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{
    check_status, spawn_line_reader, GenerationRequest, Generator, LineEvent, TextStream,
    SYSTEM_PROMPT,
};
use crate::config::GenerationConfig;
use crate::embedding::DEFAULT_OLLAMA_URL;
use crate::error::RagError;

/// Streaming chat against a local Ollama instance (`POST /api/chat`).
pub struct OllamaGenerator {
    client: reqwest::Client,
    model: String,
    url: String,
    timeout: Duration,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        if config.model.trim().is_empty() {
            bail!("generation.model required for Ollama provider");
        }
        let url = config.url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL);
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| anyhow!("failed to build Ollama HTTP client: {}", e))?;

        Ok(Self {
            client,
            model: config.model.clone(),
            url: url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
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
            options: ChatOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                RagError::GenerationUnavailable(format!(
                    "Ollama connection error (is Ollama running at {}?): {}",
                    self.url, e
                ))
            })?;
        let response = check_status(response, "Ollama").await?;

        Ok(spawn_line_reader(response, parse_ndjson_line, cancel))
    }
}

/// Interpret one NDJSON line from a streaming `/api/chat` response.
pub fn parse_ndjson_line(line: &str) -> Result<LineEvent> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(LineEvent::Skip);
    }

    let chunk: ChatChunk = serde_json::from_str(line).context("failed to parse Ollama stream line")?;
    if let Some(error) = chunk.error {
        bail!("Ollama error: {}", error);
    }

    let content = chunk.message.map(|m| m.content).unwrap_or_default();
    match (content.is_empty(), chunk.done) {
        (false, _) => Ok(LineEvent::Fragment(content)),
        (true, true) => Ok(LineEvent::Done),
        (true, false) => Ok(LineEvent::Skip),
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    stream: bool,
    messages: Vec<ChatMessage<'a>>,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ndjson_fragment_then_done() {
        let line = r#"{"model":"llama3","message":{"role":"assistant","content":"Hi"},"done":false}"#;
        assert_eq!(
            parse_ndjson_line(line).unwrap(),
            LineEvent::Fragment("Hi".into())
        );
        let last = r#"{"model":"llama3","message":{"role":"assistant","content":""},"done":true}"#;
        assert_eq!(parse_ndjson_line(last).unwrap(), LineEvent::Done);
    }

    #[test]
    fn ndjson_error_line() {
        let err = parse_ndjson_line(r#"{"error":"model not found"}"#).unwrap_err();
        assert!(err.to_string().contains("model not found"));
    }

    #[test]
    fn ndjson_blank_line_is_skipped() {
        assert_eq!(parse_ndjson_line("  ").unwrap(), LineEvent::Skip);
    }
}
