//! Question answering over one loaded document.
//!
//! [`QaSession`] owns the embedding provider, the optional generator, and
//! the slot holding the current [`VectorIndex`]. Loading a document
//! replaces the index wholesale; queries only see a fully built one.
//!
//! ```text
//! load:  text ─▶ chunk ─▶ embed (batch by batch) ─▶ VectorIndex ─▶ Ready
//! ask:   question ─▶ embed ─▶ top_k ─▶ generate | synthesize ─▶ Answer
//! ```

use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::chunk::{chunk_markdown, ChunkOptions};
use crate::config::Config;
use crate::embedding::{create_provider, embed_query, EmbeddingProvider};
use crate::error::{RagError, Result};
use crate::generate::{create_generator, render_context, GenerationRequest, Generator};
use crate::index::VectorIndex;
use crate::models::{Answer, AnswerMode, Chunk, ScoredChunk};
use crate::progress::{IndexProgressEvent, IndexProgressReporter, NoProgress};
use crate::synthesize::{synthesize, NO_ANSWER};

/// Tuning for a [`QaSession`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub chunking: ChunkOptions,
    /// Chunks per embedding request.
    pub batch_size: usize,
    /// Chunks retrieved per question.
    pub top_k: usize,
    /// Character cap on extractive answers.
    pub answer_limit: usize,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SessionOptions {
    fn from(config: &Config) -> Self {
        Self {
            chunking: config.chunking.options(),
            batch_size: config.embedding.batch_size.max(1),
            top_k: config.retrieval.top_k,
            answer_limit: config.retrieval.answer_limit,
            temperature: config.generation.temperature,
            max_tokens: config.generation.max_tokens,
        }
    }
}

/// Readiness of the session's index.
#[derive(Debug, Clone, Default)]
pub enum IndexState {
    #[default]
    Empty,
    Building,
    Ready(Arc<VectorIndex>),
}

/// Summary of a successful [`QaSession::load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexReport {
    pub chunks: usize,
    pub dims: usize,
    pub model: String,
}

/// Per-question switches for [`QaSession::ask`].
#[derive(Default)]
pub struct AskOptions<'a> {
    /// Try the generator first, falling back to extractive synthesis.
    pub generate: bool,
    /// Receives generated fragments as they stream in.
    pub on_fragment: Option<&'a mut (dyn FnMut(&str) + Send)>,
    /// Stops generation early when fired.
    pub cancel: Option<CancellationToken>,
}

pub struct QaSession {
    embedder: Box<dyn EmbeddingProvider>,
    generator: Option<Box<dyn Generator>>,
    reporter: Box<dyn IndexProgressReporter>,
    options: SessionOptions,
    state: RwLock<IndexState>,
    load_lock: Mutex<()>,
}

impl QaSession {
    pub fn new(embedder: Box<dyn EmbeddingProvider>, mut options: SessionOptions) -> Self {
        options.batch_size = options.batch_size.max(1);
        Self {
            embedder,
            generator: None,
            reporter: Box::new(NoProgress),
            options,
            state: RwLock::new(IndexState::Empty),
            load_lock: Mutex::new(()),
        }
    }

    /// Build a session with the providers named in `config`.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedder = create_provider(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        let mut session = Self::new(embedder, SessionOptions::from(config));
        session.generator = generator;
        Ok(session)
    }

    pub fn with_generator(mut self, generator: Box<dyn Generator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_reporter(mut self, reporter: Box<dyn IndexProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn embedder(&self) -> &dyn EmbeddingProvider {
        self.embedder.as_ref()
    }

    pub fn has_generator(&self) -> bool {
        self.generator.is_some()
    }

    pub fn state(&self) -> IndexState {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state(), IndexState::Ready(_))
    }

    fn set_state(&self, next: IndexState) {
        *self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = next;
    }

    /// Chunk and embed `text`, replacing any previously loaded document.
    ///
    /// The old index is dropped before work starts; queries fail with
    /// [`RagError::QueryBeforeReady`] until the new one is published. Loads
    /// are serialized. On failure the session is left empty.
    ///
    /// A document that yields no chunks publishes an empty index and
    /// returns [`RagError::ChunkingProducedEmpty`].
    pub async fn load(&self, text: &str, cancel: &CancellationToken) -> Result<IndexReport> {
        let _guard = self.load_lock.lock().await;
        self.set_state(IndexState::Building);

        let index = match self.build_index(text, cancel).await {
            Ok(index) => index,
            Err(e) => {
                self.set_state(IndexState::Empty);
                return Err(e);
            }
        };

        let report = IndexReport {
            chunks: index.len(),
            dims: index.dims(),
            model: self.embedder.model_name().to_string(),
        };
        self.set_state(IndexState::Ready(Arc::new(index)));
        self.reporter.report(IndexProgressEvent::Ready {
            chunks: report.chunks,
        });

        if report.chunks == 0 {
            tracing::warn!("document produced no chunks");
            return Err(RagError::ChunkingProducedEmpty);
        }
        tracing::info!(
            chunks = report.chunks,
            dims = report.dims,
            model = %report.model,
            "index ready"
        );
        Ok(report)
    }

    async fn build_index(&self, text: &str, cancel: &CancellationToken) -> Result<VectorIndex> {
        let chunks = chunk_markdown(text, &self.options.chunking);
        tracing::debug!(chunks = chunks.len(), "chunked document");
        self.reporter.report(IndexProgressEvent::Chunked {
            chunks: chunks.len(),
        });
        if chunks.is_empty() {
            return Ok(VectorIndex::empty());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let total = texts.len();
        let mut vectors = Vec::with_capacity(total);

        for (batch_no, batch) in texts.chunks(self.options.batch_size).enumerate() {
            if cancel.is_cancelled() {
                tracing::debug!(batch = batch_no, "indexing cancelled");
                return Err(RagError::Cancelled);
            }

            let mut embedded = self.embedder.embed(batch).await?;
            if embedded.len() != batch.len() {
                return Err(RagError::EmbeddingUnavailable(format!(
                    "expected {} vectors, got {}",
                    batch.len(),
                    embedded.len()
                )));
            }
            vectors.append(&mut embedded);
            tracing::debug!(batch = batch_no, done = vectors.len(), total, "embedded batch");

            self.reporter.report(IndexProgressEvent::Embedding {
                n: vectors.len(),
                total,
            });
            tokio::task::yield_now().await;
        }

        VectorIndex::new(chunks, vectors)
    }

    fn ready_index(&self) -> Result<Arc<VectorIndex>> {
        match self.state() {
            IndexState::Ready(index) if index.is_empty() => Err(RagError::ChunkingProducedEmpty),
            IndexState::Ready(index) => Ok(index),
            IndexState::Empty | IndexState::Building => Err(RagError::QueryBeforeReady),
        }
    }

    /// The `k` chunks most similar to `query`, best first.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        let index = self.ready_index()?;
        Self::retrieve(self.embedder.as_ref(), &index, query, k).await
    }

    async fn retrieve(
        embedder: &dyn EmbeddingProvider,
        index: &VectorIndex,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        let vector = embed_query(embedder, query).await?;
        let hits = index.top_k(&vector, k);
        tracing::debug!(
            hits = hits.len(),
            best = hits.first().map(|h| h.similarity),
            "ranked chunks"
        );
        Ok(hits)
    }

    /// Answer `question` from the loaded document.
    ///
    /// With `generate` set and a generator configured, the model answers
    /// from the retrieved chunks. Any generation failure, or an empty
    /// reply, falls back to extractive synthesis and records why in
    /// [`Answer::fallback_reason`].
    pub async fn ask(&self, question: &str, options: AskOptions<'_>) -> Result<Answer> {
        let index = self.ready_index()?;

        if question.trim().is_empty() {
            return Ok(Answer {
                text: NO_ANSWER.to_string(),
                mode: AnswerMode::Extractive,
                sources: Vec::new(),
                fallback_reason: None,
            });
        }

        let sources =
            Self::retrieve(self.embedder.as_ref(), &index, question, self.options.top_k).await?;
        let chunks: Vec<Chunk> = sources.iter().map(|s| s.chunk.clone()).collect();

        let mut fallback_reason = None;
        if options.generate {
            let reason = match &self.generator {
                None => "generation is not configured".to_string(),
                Some(generator) => {
                    match self
                        .generate(generator.as_ref(), question, &chunks, options)
                        .await
                    {
                        Ok(text) if !text.trim().is_empty() => {
                            return Ok(Answer {
                                text: text.trim().to_string(),
                                mode: AnswerMode::Generative,
                                sources,
                                fallback_reason: None,
                            });
                        }
                        Ok(_) => "model returned an empty answer".to_string(),
                        Err(e) => e.to_string(),
                    }
                }
            };
            tracing::warn!(%reason, "falling back to extractive answer");
            fallback_reason = Some(reason);
        }

        Ok(Answer {
            text: synthesize(question, &chunks, self.options.answer_limit),
            mode: AnswerMode::Extractive,
            sources,
            fallback_reason,
        })
    }

    async fn generate(
        &self,
        generator: &dyn Generator,
        question: &str,
        chunks: &[Chunk],
        options: AskOptions<'_>,
    ) -> Result<String> {
        let request = GenerationRequest {
            question: question.to_string(),
            context: render_context(chunks),
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
        };
        let stream = generator
            .stream(&request, options.cancel.unwrap_or_default())
            .await?;

        let mut on_fragment = options.on_fragment;
        stream
            .collect_text(generator.timeout(), |fragment| {
                if let Some(callback) = on_fragment.as_deref_mut() {
                    callback(fragment);
                }
            })
            .await
    }
}
