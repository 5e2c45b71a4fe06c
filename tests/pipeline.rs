use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use markdown_qa::chunk::ChunkOptions;
use markdown_qa::embedding::{EmbeddingProvider, HashingProvider};
use markdown_qa::error::RagError;
use markdown_qa::generate::{GenerationRequest, Generator, TextStream};
use markdown_qa::models::AnswerMode;
use markdown_qa::progress::{IndexProgressEvent, IndexProgressReporter};
use markdown_qa::session::{AskOptions, IndexState, QaSession, SessionOptions};

const GUIDE: &str = "\
# Install

Download the installer from the releases page and run it with admin rights.

# Configure

Edit the config file to set your preferred language and colour theme.

# Deploy

Push the container image to the registry and roll out the new release.

# Troubleshoot

Check the log files when the service refuses to start after an upgrade.
";

/// One section per chunk.
fn small_chunks() -> SessionOptions {
    SessionOptions {
        chunking: ChunkOptions {
            max_words: 20,
            overlap_words: 0,
            min_chars: 0,
            max_chars: 1200,
            max_chunks: 400,
        },
        batch_size: 3,
        ..SessionOptions::default()
    }
}

fn hashing_session() -> QaSession {
    QaSession::new(Box::new(HashingProvider::default()), small_chunks())
}

// ============ Fake collaborators ============

struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }
    fn dims(&self) -> usize {
        8
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        Err(RagError::EmbeddingUnavailable("connection refused".into()))
    }
}

/// Returns one vector too few.
struct ShortEmbedder;

#[async_trait]
impl EmbeddingProvider for ShortEmbedder {
    fn model_name(&self) -> &str {
        "short"
    }
    fn dims(&self) -> usize {
        2
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        Ok(vec![vec![1.0, 0.0]; texts.len().saturating_sub(1)])
    }
}

/// Hashing embedder that records each batch size.
struct RecordingEmbedder {
    inner: HashingProvider,
    batches: Arc<Mutex<Vec<usize>>>,
}

#[async_trait]
impl EmbeddingProvider for RecordingEmbedder {
    fn model_name(&self) -> &str {
        "recording"
    }
    fn dims(&self) -> usize {
        self.inner.dims()
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        self.batches.lock().unwrap().push(texts.len());
        self.inner.embed(texts).await
    }
}

/// Blocks the first batch until released.
struct GatedEmbedder {
    inner: HashingProvider,
    started: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl EmbeddingProvider for GatedEmbedder {
    fn model_name(&self) -> &str {
        "gated"
    }
    fn dims(&self) -> usize {
        self.inner.dims()
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        self.started.notify_one();
        self.release.notified().await;
        self.inner.embed(texts).await
    }
}

/// Cancels the load token from inside the first batch.
struct CancellingEmbedder {
    inner: HashingProvider,
    cancel: CancellationToken,
}

#[async_trait]
impl EmbeddingProvider for CancellingEmbedder {
    fn model_name(&self) -> &str {
        "cancelling"
    }
    fn dims(&self) -> usize {
        self.inner.dims()
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        self.cancel.cancel();
        self.inner.embed(texts).await
    }
}

#[derive(Default)]
struct RecordingReporter {
    events: Arc<Mutex<Vec<IndexProgressEvent>>>,
}

impl IndexProgressReporter for RecordingReporter {
    fn report(&self, event: IndexProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

enum Script {
    Fragments(Vec<&'static str>),
    Fail,
    Silent,
    Hang,
}

struct ScriptedGenerator {
    script: Script,
    seen: Arc<Mutex<Option<GenerationRequest>>>,
}

impl ScriptedGenerator {
    fn new(script: Script) -> Self {
        Self {
            script,
            seen: Arc::new(Mutex::new(None)),
        }
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted"
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(200)
    }

    async fn stream(
        &self,
        request: &GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<TextStream, RagError> {
        *self.seen.lock().unwrap() = Some(request.clone());
        let (tx, stream) = TextStream::channel(cancel);
        match &self.script {
            Script::Fail => {
                return Err(RagError::GenerationUnavailable("model offline".into()));
            }
            Script::Fragments(pieces) => {
                let pieces: Vec<String> = pieces.iter().map(|p| p.to_string()).collect();
                tokio::spawn(async move {
                    for piece in pieces {
                        if !tx.send(piece).await {
                            break;
                        }
                    }
                });
            }
            Script::Silent => drop(tx),
            Script::Hang => {
                tokio::spawn(async move {
                    tx.cancelled().await;
                });
            }
        }
        Ok(stream)
    }
}

fn generating<'a>() -> AskOptions<'a> {
    AskOptions {
        generate: true,
        ..AskOptions::default()
    }
}

// ============ Loading ============

#[tokio::test]
async fn load_keeps_chunks_and_vectors_aligned() {
    let session = hashing_session();
    let report = session
        .load(GUIDE, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.chunks, 4);
    assert_eq!(report.dims, 256);

    let IndexState::Ready(index) = session.state() else {
        panic!("index should be ready");
    };
    assert_eq!(index.chunks().len(), index.vectors().len());
    let headings: Vec<&str> = index
        .chunks()
        .iter()
        .map(|c| c.heading_path.as_str())
        .collect();
    assert_eq!(headings, vec!["Install", "Configure", "Deploy", "Troubleshoot"]);
    for (i, chunk) in index.chunks().iter().enumerate() {
        assert_eq!(chunk.id, i);
    }
}

#[tokio::test]
async fn embeds_in_sequential_batches_with_progress() {
    let batches = Arc::new(Mutex::new(Vec::new()));
    let events = Arc::new(Mutex::new(Vec::new()));
    let session = QaSession::new(
        Box::new(RecordingEmbedder {
            inner: HashingProvider::default(),
            batches: Arc::clone(&batches),
        }),
        small_chunks(),
    )
    .with_reporter(Box::new(RecordingReporter {
        events: Arc::clone(&events),
    }));

    session
        .load(GUIDE, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(*batches.lock().unwrap(), vec![3, 1]);
    assert_eq!(
        *events.lock().unwrap(),
        vec![
            IndexProgressEvent::Chunked { chunks: 4 },
            IndexProgressEvent::Embedding { n: 3, total: 4 },
            IndexProgressEvent::Embedding { n: 4, total: 4 },
            IndexProgressEvent::Ready { chunks: 4 },
        ]
    );
}

#[tokio::test]
async fn embedding_failure_aborts_load() {
    let session = QaSession::new(Box::new(FailingEmbedder), small_chunks());
    let err = session
        .load(GUIDE, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::EmbeddingUnavailable(_)));
    assert!(matches!(session.state(), IndexState::Empty));
}

#[tokio::test]
async fn wrong_vector_count_is_rejected() {
    let session = QaSession::new(Box::new(ShortEmbedder), small_chunks());
    let err = session
        .load(GUIDE, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::EmbeddingUnavailable(_)));
    assert!(!session.is_ready());
}

#[tokio::test]
async fn cancellation_is_checked_between_batches() {
    let cancel = CancellationToken::new();
    let options = SessionOptions {
        batch_size: 1,
        ..small_chunks()
    };
    let session = QaSession::new(
        Box::new(CancellingEmbedder {
            inner: HashingProvider::default(),
            cancel: cancel.clone(),
        }),
        options,
    );
    let err = session.load(GUIDE, &cancel).await.unwrap_err();
    assert!(matches!(err, RagError::Cancelled));
    assert!(matches!(session.state(), IndexState::Empty));
}

#[tokio::test]
async fn queries_during_load_are_rejected() {
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let session = Arc::new(QaSession::new(
        Box::new(GatedEmbedder {
            inner: HashingProvider::default(),
            started: Arc::clone(&started),
            release: Arc::clone(&release),
        }),
        SessionOptions::default(),
    ));

    let loader = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.load(GUIDE, &CancellationToken::new()).await })
    };

    started.notified().await;
    assert!(matches!(session.state(), IndexState::Building));
    assert!(matches!(
        session.search("deploy", 2).await,
        Err(RagError::QueryBeforeReady)
    ));

    release.notify_one();
    loader.await.unwrap().unwrap();
    assert!(session.is_ready());
}

#[tokio::test]
async fn reload_replaces_the_index() {
    let session = hashing_session();
    session
        .load(GUIDE, &CancellationToken::new())
        .await
        .unwrap();
    let report = session
        .load("# Other\n\nA completely different document.", &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.chunks, 1);

    let hits = session.search("installer", 4).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk.heading_path, "Other");
}

// ============ Answering ============

#[tokio::test]
async fn extractive_answer_cites_the_matching_section() {
    let session = hashing_session();
    session
        .load(GUIDE, &CancellationToken::new())
        .await
        .unwrap();

    let answer = session
        .ask("How do I push the container image?", AskOptions::default())
        .await
        .unwrap();
    assert_eq!(answer.mode, AnswerMode::Extractive);
    assert!(answer.fallback_reason.is_none());
    assert_eq!(answer.sources.len(), 4);
    assert_eq!(answer.sources[0].chunk.heading_path, "Deploy");
    assert!(answer
        .text
        .starts_with("Push the container image to the registry"));
    for pair in answer.sources.windows(2) {
        assert!(pair[0].similarity >= pair[1].similarity);
    }
}

#[tokio::test]
async fn top_k_limits_sources() {
    let options = SessionOptions {
        top_k: 2,
        ..small_chunks()
    };
    let session = QaSession::new(Box::new(HashingProvider::default()), options);
    session
        .load(GUIDE, &CancellationToken::new())
        .await
        .unwrap();
    let answer = session
        .ask("log files", AskOptions::default())
        .await
        .unwrap();
    assert_eq!(answer.sources.len(), 2);
    assert_eq!(answer.sources[0].chunk.heading_path, "Troubleshoot");
}

#[tokio::test]
async fn generated_fragments_concatenate_to_the_answer() {
    let generator = ScriptedGenerator::new(Script::Fragments(vec!["Push ", "the image", "."]));
    let seen = Arc::clone(&generator.seen);
    let session = hashing_session().with_generator(Box::new(generator));
    session
        .load(GUIDE, &CancellationToken::new())
        .await
        .unwrap();

    let mut fragments = Vec::new();
    let mut collect = |f: &str| fragments.push(f.to_string());
    let answer = session
        .ask(
            "How do I deploy?",
            AskOptions {
                generate: true,
                on_fragment: Some(&mut collect),
                cancel: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(answer.mode, AnswerMode::Generative);
    assert_eq!(answer.text, "Push the image.");
    assert_eq!(fragments.concat(), answer.text);

    let request = seen.lock().unwrap().clone().unwrap();
    assert_eq!(request.question, "How do I deploy?");
    assert!(request.context.starts_with("Chunk 1 [heading: "));
    assert!((request.temperature - 0.2).abs() < f32::EPSILON);
    assert_eq!(request.max_tokens, 512);
}

#[tokio::test]
async fn failing_generator_falls_back_to_extractive() {
    let session =
        hashing_session().with_generator(Box::new(ScriptedGenerator::new(Script::Fail)));
    session
        .load(GUIDE, &CancellationToken::new())
        .await
        .unwrap();

    let answer = session
        .ask("How do I push the container image?", generating())
        .await
        .unwrap();
    assert_eq!(answer.mode, AnswerMode::Extractive);
    let reason = answer.fallback_reason.unwrap();
    assert!(reason.contains("model offline"));
    assert!(answer.text.contains("container image"));
}

#[tokio::test]
async fn empty_generation_falls_back() {
    let session =
        hashing_session().with_generator(Box::new(ScriptedGenerator::new(Script::Silent)));
    session
        .load(GUIDE, &CancellationToken::new())
        .await
        .unwrap();
    let answer = session.ask("log files", generating()).await.unwrap();
    assert_eq!(answer.mode, AnswerMode::Extractive);
    assert!(answer.fallback_reason.is_some());
}

#[tokio::test]
async fn hung_generation_times_out_and_falls_back() {
    let session =
        hashing_session().with_generator(Box::new(ScriptedGenerator::new(Script::Hang)));
    session
        .load(GUIDE, &CancellationToken::new())
        .await
        .unwrap();
    let answer = session.ask("log files", generating()).await.unwrap();
    assert_eq!(answer.mode, AnswerMode::Extractive);
    assert!(answer.fallback_reason.unwrap().contains("timed out"));
}

#[tokio::test]
async fn cancelled_generation_falls_back() {
    let session = hashing_session().with_generator(Box::new(ScriptedGenerator::new(Script::Hang)));
    session
        .load(GUIDE, &CancellationToken::new())
        .await
        .unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let answer = session
        .ask(
            "log files",
            AskOptions {
                generate: true,
                on_fragment: None,
                cancel: Some(cancel),
            },
        )
        .await
        .unwrap();
    assert_eq!(answer.mode, AnswerMode::Extractive);
    assert!(answer.fallback_reason.unwrap().contains("cancelled"));
}

#[tokio::test]
async fn stream_ends_when_cancelled() {
    let generator = ScriptedGenerator::new(Script::Hang);
    let request = GenerationRequest {
        question: "q".into(),
        context: String::new(),
        temperature: 0.2,
        max_tokens: 16,
    };
    let cancel = CancellationToken::new();
    let mut stream = generator.stream(&request, cancel.clone()).await.unwrap();
    cancel.cancel();
    assert!(stream.next().await.is_none());
}

fn plain_request() -> GenerationRequest {
    GenerationRequest {
        question: "How do I deploy?".into(),
        context: "Chunk 1 [heading: Deploy]:\nPush the container image.".into(),
        temperature: 0.2,
        max_tokens: 64,
    }
}

#[tokio::test]
async fn complete_joins_all_fragments() {
    let generator = ScriptedGenerator::new(Script::Fragments(vec!["Push ", "the ", "image."]));
    let text = generator.complete(&plain_request()).await.unwrap();
    assert_eq!(text, "Push the image.");
}

#[tokio::test]
async fn complete_gives_up_after_timeout() {
    let generator = ScriptedGenerator::new(Script::Hang);
    let err = generator.complete(&plain_request()).await.unwrap_err();
    assert!(
        matches!(&err, RagError::GenerationUnavailable(m) if m.contains("timed out")),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn complete_surfaces_generator_failure() {
    let generator = ScriptedGenerator::new(Script::Fail);
    assert!(matches!(
        generator.complete(&plain_request()).await,
        Err(RagError::GenerationUnavailable(_))
    ));
}

#[test]
fn session_reports_whether_a_generator_is_attached() {
    assert!(!hashing_session().has_generator());
    let session = hashing_session().with_generator(Box::new(ScriptedGenerator::new(Script::Silent)));
    assert!(session.has_generator());
}
