//! CLI command implementations: `chunks`, `search`, `ask`, and `chat`.
//!
//! Command output goes to stdout. Progress, fallback notices, and logs go
//! to stderr.

use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::chunk::chunk_markdown;
use crate::config::Config;
use crate::error::RagError;
use crate::models::{Answer, AnswerMode, ScoredChunk};
use crate::progress::ProgressMode;
use crate::session::{AskOptions, QaSession};
use crate::text::truncate_chars;

const EXCERPT_CHARS: usize = 240;

fn read_document(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read document: {}", path.display()))
}

/// Read, chunk, and embed `path`. Returns `None` (after telling the user)
/// when the document has no indexable content.
async fn load_session(config: &Config, path: &Path, progress: ProgressMode) -> Result<Option<QaSession>> {
    let text = read_document(path)?;
    if !config.embedding.is_enabled() {
        return Err(RagError::EmbeddingUnavailable(
            "embedding provider is disabled; set [embedding] provider in the config".into(),
        )
        .into());
    }
    let session = QaSession::from_config(config)?.with_reporter(progress.reporter());
    tracing::debug!(
        model = session.embedder().model_name(),
        dims = session.embedder().dims(),
        "loading document"
    );

    // Ctrl-C between batches stops indexing cleanly.
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let loaded = session.load(&text, &cancel).await;
    watcher.abort();

    match loaded {
        Ok(_) => Ok(Some(session)),
        Err(RagError::ChunkingProducedEmpty) => {
            println!("No content indexed.");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// `mdqa chunks <file>`: show how a document is split.
pub fn run_chunks(config: &Config, path: &Path, json: bool) -> Result<()> {
    let text = read_document(path)?;
    let chunks = chunk_markdown(&text, &config.chunking.options());

    if json {
        println!("{}", serde_json::to_string_pretty(&chunks)?);
        return Ok(());
    }
    if chunks.is_empty() {
        println!("No content indexed.");
        return Ok(());
    }

    println!("--- Chunks ({}) ---", chunks.len());
    for chunk in &chunks {
        println!("[chunk {}] {}", chunk.id, chunk.heading_path);
        println!("{}", chunk.text);
        println!();
    }
    Ok(())
}

/// `mdqa search <file> <query>`: ranked chunks with similarity and excerpt.
pub async fn run_search(
    config: &Config,
    path: &Path,
    query: &str,
    limit: Option<usize>,
    progress: ProgressMode,
) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }
    let Some(session) = load_session(config, path, progress).await? else {
        return Ok(());
    };

    let k = limit.unwrap_or(session.options().top_k);
    let hits = session.search(query, k).await?;
    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{}] {}",
            i + 1,
            percent(hit.similarity),
            hit.chunk.heading_path
        );
        println!(
            "    excerpt: \"{}\"",
            truncate_chars(&hit.chunk.text, EXCERPT_CHARS)
        );
        println!("    chunk: {}", hit.chunk.id);
        println!();
    }
    Ok(())
}

/// `mdqa ask <file> <question>`: answer a single question.
pub async fn run_ask(
    config: &Config,
    path: &Path,
    question: &str,
    generate: bool,
    progress: ProgressMode,
) -> Result<()> {
    let Some(session) = load_session(config, path, progress).await? else {
        return Ok(());
    };
    warn_if_no_generator(&session, generate);
    answer_and_print(&session, question, generate).await
}

fn warn_if_no_generator(session: &QaSession, generate: bool) {
    if generate && !session.has_generator() {
        eprintln!("note: no [generation] provider configured; answers will be extractive");
    }
}

/// `mdqa chat <file>`: load once, then answer one question per stdin line.
pub async fn run_chat(config: &Config, path: &Path, generate: bool, progress: ProgressMode) -> Result<()> {
    let Some(session) = load_session(config, path, progress).await? else {
        return Ok(());
    };

    warn_if_no_generator(&session, generate);
    eprintln!("Ready. One question per line; end with Ctrl-D.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines
        .next_line()
        .await
        .context("Failed to read question from stdin")?
    {
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        answer_and_print(&session, question, generate).await?;
        println!();
    }
    Ok(())
}

async fn answer_and_print(session: &QaSession, question: &str, generate: bool) -> Result<()> {
    println!("--- Answer ---");

    let mut streamed = false;
    let mut print_fragment = |fragment: &str| {
        streamed = true;
        print!("{}", fragment);
        let _ = std::io::stdout().flush();
    };
    let options = AskOptions {
        generate,
        on_fragment: generate.then_some(&mut print_fragment as &mut (dyn FnMut(&str) + Send)),
        cancel: None,
    };
    let answer = session.ask(question, options).await?;

    if let Some(reason) = &answer.fallback_reason {
        eprintln!("note: using extractive answer ({})", reason);
    }
    print!("{}", render_answer(&answer, streamed));
    Ok(())
}

/// Everything printed after the `--- Answer ---` header.
///
/// `streamed` means generated fragments were already written out; when the
/// answer still ended up extractive those fragments are marked as cut off.
fn render_answer(answer: &Answer, streamed: bool) -> String {
    let mut out = String::new();
    match answer.mode {
        AnswerMode::Generative => {
            if !streamed {
                out.push_str(&answer.text);
            }
            out.push('\n');
        }
        AnswerMode::Extractive => {
            if streamed {
                out.push_str("\n(generation interrupted)\n\n");
            }
            out.push_str(&answer.text);
            out.push('\n');
        }
    }

    if !answer.sources.is_empty() {
        out.push_str("\n--- Sources ---\n");
        for source in &answer.sources {
            out.push_str(&format_source(source));
            out.push('\n');
        }
    }
    out
}

fn format_source(source: &ScoredChunk) -> String {
    format!("{} ({})", source.chunk.heading_path, percent(source.similarity))
}

fn percent(similarity: f32) -> String {
    format!("{:.1}%", similarity * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    #[test]
    fn source_line_shows_one_decimal_percent() {
        let source = ScoredChunk {
            chunk: Chunk {
                id: 3,
                heading_path: "Guide > Install".into(),
                text: "Run the installer.".into(),
            },
            similarity: 0.8234,
        };
        assert_eq!(format_source(&source), "Guide > Install (82.3%)");
    }

    fn answer(mode: AnswerMode, text: &str) -> Answer {
        Answer {
            text: text.into(),
            mode,
            sources: vec![ScoredChunk {
                chunk: Chunk {
                    id: 0,
                    heading_path: "Deploy".into(),
                    text: "Push the image.".into(),
                },
                similarity: 0.5,
            }],
            fallback_reason: None,
        }
    }

    #[test]
    fn extractive_answer_lists_sources() {
        let out = render_answer(&answer(AnswerMode::Extractive, "Push the image."), false);
        assert_eq!(out, "Push the image.\n\n--- Sources ---\nDeploy (50.0%)\n");
    }

    #[test]
    fn streamed_answer_is_not_repeated() {
        let out = render_answer(&answer(AnswerMode::Generative, "Push it."), true);
        assert!(!out.contains("Push it."));
        assert!(out.starts_with("\n\n--- Sources ---"));
    }

    #[test]
    fn fallback_after_partial_stream_is_marked() {
        let out = render_answer(&answer(AnswerMode::Extractive, "Push the image."), true);
        assert!(out.starts_with("\n(generation interrupted)\n\nPush the image.\n"));
    }

    #[test]
    fn negative_similarity_formats() {
        assert_eq!(percent(-0.5), "-50.0%");
        assert_eq!(percent(1.0), "100.0%");
    }
}
