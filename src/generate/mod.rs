//! Generative answering over retrieved chunks.
//!
//! A [`Generator`] turns a [`GenerationRequest`] (question plus rendered
//! context) into a [`TextStream`] of text fragments. Adapters:
//! - **[`OpenAiGenerator`]**: OpenAI-compatible `/chat/completions` with SSE streaming.
//! - **[`OllamaGenerator`]**: Ollama `/api/chat` with NDJSON streaming.
//!
//! Every failure surfaces as [`RagError::GenerationUnavailable`]; the
//! session catches it and answers extractively instead.
//!
//! # Streaming model
//!
//! ```text
//! HTTP body ──bytes──▶ reader task ──LineBuffer──▶ parse line ──mpsc──▶ TextStream
//!                          ▲                                              │
//!                          └──────────── CancellationToken ◀──────────────┘
//! ```
//!
//! Dropping or cancelling the [`TextStream`] fires the shared token and the
//! reader task exits at its next await point.

mod ollama;
mod openai;

pub use ollama::OllamaGenerator;
pub use openai::OpenAiGenerator;

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::GenerationConfig;
use crate::error::RagError;
use crate::models::Chunk;

pub const SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer the user's question using ONLY the provided context.\nIf the answer is not in the context, say you don't know. Be concise.";

const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";
const STREAM_CAPACITY: usize = 64;

/// Everything a generator needs for one answer.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub question: String,
    /// Retrieved chunks already rendered by [`render_context`].
    pub context: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationRequest {
    pub fn new(question: &str, chunks: &[Chunk], config: &GenerationConfig) -> Self {
        Self {
            question: question.to_string(),
            context: render_context(chunks),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    /// The user turn of the conversation.
    pub fn user_message(&self) -> String {
        format!("Question: {}\n\nContext:\n{}", self.question, self.context)
    }
}

/// Render chunks as numbered, heading-tagged context blocks.
pub fn render_context(chunks: &[Chunk]) -> String {
    chunks
        .iter()
        .enumerate()
        .map(|(i, c)| format!("Chunk {} [heading: {}]:\n{}", i + 1, c.heading_path, c.text))
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

/// A text generation backend.
#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    /// Overall deadline for [`Generator::complete`].
    fn timeout(&self) -> Duration {
        Duration::from_secs(120)
    }

    /// Start generating. Fragments arrive on the returned stream until the
    /// model finishes, an error is yielded, or `cancel` fires.
    async fn stream(
        &self,
        request: &GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<TextStream, RagError>;

    /// Generate the whole answer, waiting at most [`Generator::timeout`].
    async fn complete(&self, request: &GenerationRequest) -> Result<String, RagError> {
        let stream = self.stream(request, CancellationToken::new()).await?;
        stream.collect_text(self.timeout(), |_| {}).await
    }
}

// ============ TextStream ============

/// A cancellable stream of generated text fragments.
pub struct TextStream {
    rx: mpsc::Receiver<Result<String, RagError>>,
    cancel: CancellationToken,
}

/// Producer half of a [`TextStream`], owned by the reader task.
pub struct FragmentSender {
    tx: mpsc::Sender<Result<String, RagError>>,
    cancel: CancellationToken,
}

impl TextStream {
    /// Create a connected sender/stream pair sharing `cancel`.
    pub fn channel(cancel: CancellationToken) -> (FragmentSender, TextStream) {
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        (
            FragmentSender {
                tx,
                cancel: cancel.clone(),
            },
            TextStream { rx, cancel },
        )
    }

    /// Stop generation. Buffered fragments are discarded.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drain the stream into one string, calling `on_fragment` for each
    /// piece as it arrives.
    ///
    /// Fails with [`RagError::GenerationUnavailable`] on a stream error, on
    /// cancellation, or when `limit` elapses (which also cancels the stream).
    pub async fn collect_text<F>(mut self, limit: Duration, mut on_fragment: F) -> Result<String, RagError>
    where
        F: FnMut(&str),
    {
        let mut text = String::new();
        let outcome = tokio::time::timeout(limit, async {
            while let Some(fragment) = self.next().await {
                let fragment = fragment?;
                on_fragment(&fragment);
                text.push_str(&fragment);
            }
            Ok::<(), RagError>(())
        })
        .await;

        match outcome {
            Err(_) => {
                self.cancel();
                Err(RagError::GenerationUnavailable(format!(
                    "timed out after {}s",
                    limit.as_secs_f32()
                )))
            }
            Ok(Err(e)) => Err(e),
            Ok(Ok(())) if self.cancel.is_cancelled() => {
                Err(RagError::GenerationUnavailable("generation cancelled".into()))
            }
            Ok(Ok(())) => Ok(text),
        }
    }
}

impl Stream for TextStream {
    type Item = Result<String, RagError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.cancel.is_cancelled() {
            return Poll::Ready(None);
        }
        self.rx.poll_recv(cx)
    }
}

impl Drop for TextStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl FragmentSender {
    /// Forward one fragment. Returns `false` once the consumer is gone or
    /// the stream was cancelled; the caller should stop producing.
    pub async fn send(&self, fragment: String) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.tx.send(Ok(fragment)).await.is_ok()
    }

    /// Report a terminal error to the consumer.
    pub async fn fail(&self, err: RagError) {
        let _ = self.tx.send(Err(err)).await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the stream is cancelled or dropped.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

// ============ Line-oriented response bodies ============

/// Reassembles newline-delimited lines from arbitrary byte chunks.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append bytes and return every line completed by them, without the
    /// trailing `\n` or `\r\n`.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    /// The unterminated tail, if any.
    pub fn finish(self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        Some(String::from_utf8_lossy(&self.pending).trim_end_matches('\r').to_string())
    }
}

/// What one line of a streaming response means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    Fragment(String),
    Done,
    Skip,
}

type LineParser = fn(&str) -> Result<LineEvent>;

/// Spawn a task that reads `response` line by line into a new [`TextStream`].
pub(crate) fn spawn_line_reader(
    response: reqwest::Response,
    parse: LineParser,
    cancel: CancellationToken,
) -> TextStream {
    let (sender, stream) = TextStream::channel(cancel);

    tokio::spawn(async move {
        let mut body = response.bytes_stream();
        let mut lines = LineBuffer::default();

        loop {
            let chunk = tokio::select! {
                _ = sender.cancelled() => {
                    tracing::debug!("generation stream cancelled");
                    return;
                }
                chunk = body.next() => chunk,
            };

            match chunk {
                Some(Ok(bytes)) => {
                    for line in lines.push(&bytes) {
                        if !forward_line(&line, parse, &sender).await {
                            return;
                        }
                    }
                }
                Some(Err(e)) => {
                    sender
                        .fail(RagError::GenerationUnavailable(format!("stream read failed: {e}")))
                        .await;
                    return;
                }
                None => {
                    if let Some(line) = lines.finish() {
                        forward_line(&line, parse, &sender).await;
                    }
                    return;
                }
            }
        }
    });

    stream
}

/// Returns `false` when reading should stop.
async fn forward_line(line: &str, parse: LineParser, sender: &FragmentSender) -> bool {
    match parse(line) {
        Ok(LineEvent::Fragment(text)) => sender.send(text).await,
        Ok(LineEvent::Skip) => !sender.is_cancelled(),
        Ok(LineEvent::Done) => false,
        Err(e) => {
            sender
                .fail(RagError::GenerationUnavailable(format!("{e:#}")))
                .await;
            false
        }
    }
}

/// Turn a non-success HTTP response into [`RagError::GenerationUnavailable`].
pub(crate) async fn check_status(
    response: reqwest::Response,
    service: &str,
) -> Result<reqwest::Response, RagError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body_text = response.text().await.unwrap_or_default();
    Err(RagError::GenerationUnavailable(format!(
        "{} error {}: {}",
        service, status, body_text
    )))
}

/// Create the configured [`Generator`], or `None` when generation is disabled.
pub fn create_generator(config: &GenerationConfig) -> Result<Option<Box<dyn Generator>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "openai" => Ok(Some(Box::new(OpenAiGenerator::new(config)?))),
        "ollama" => Ok(Some(Box::new(OllamaGenerator::new(config)?))),
        other => bail!("Unknown generation provider: {}", other),
    }
}
