//! Heading-aware markdown chunker.
//!
//! Splits a markdown document into [`Chunk`]s sized for embedding. Each
//! chunk carries the breadcrumb of the headings that enclose it, and
//! adjacent chunks share an overlap of whole blocks so that a passage cut
//! at a boundary is still retrievable from either side.
//!
//! # Algorithm
//!
//! 1. Scan lines into **blocks**. A heading line or a blank line ends the
//!    current block. Fenced code is kept intact inside a single block.
//! 2. Track the heading path as a level-indexed stack (truncate, then set).
//! 3. Clean each block; drop blocks that clean to nothing.
//! 4. Greedily pack blocks up to `max_words`. On overflow, emit the pack and
//!    seed the next one with trailing blocks totalling `overlap_words`.
//! 5. A pack above `1.5 × max_words` is force-split at sentence boundaries
//!    with a word-level overlap.
//! 6. Cap each text at `max_chars`.
//! 7. Merge chunks shorter than `min_chars` into their successor (one pass).
//! 8. Keep at most `max_chunks` and number them in order.
//!
//! # Example
//!
//! ```rust
//! use markdown_qa::chunk::{chunk_markdown, ChunkOptions};
//!
//! let chunks = chunk_markdown("# Title\n\nSome paragraph.", &ChunkOptions::default());
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].heading_path, "Title");
//! ```

use crate::models::{Chunk, DEFAULT_HEADING};
use crate::text::{clean_markdown, last_words, split_sentences, truncate_chars, word_count};

/// Separator between heading levels in a breadcrumb.
pub const HEADING_SEPARATOR: &str = " > ";

/// Tuning knobs for [`chunk_markdown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkOptions {
    /// Word budget per chunk.
    pub max_words: usize,
    /// Words repeated at the start of the next chunk.
    pub overlap_words: usize,
    /// Chunks shorter than this (in characters) merge into their successor.
    pub min_chars: usize,
    /// Hard cap on chunk text length, ellipsis included.
    pub max_chars: usize,
    /// Hard cap on the number of chunks per document.
    pub max_chunks: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_words: 350,
            overlap_words: 40,
            min_chars: 200,
            max_chars: 1200,
            max_chunks: 400,
        }
    }
}

/// A cleaned paragraph-level span with the breadcrumb in effect when it was read.
#[derive(Debug, Clone)]
struct Block {
    heading: Option<String>,
    text: String,
    words: usize,
}

/// A chunk before ids are assigned.
#[derive(Debug, Clone)]
struct Piece {
    heading: Option<String>,
    text: String,
}

/// Split markdown into ordered, heading-tagged chunks.
///
/// Deterministic: the same input and options always produce the same
/// sequence. Empty or heading-only documents produce no chunks.
pub fn chunk_markdown(text: &str, opts: &ChunkOptions) -> Vec<Chunk> {
    let blocks = split_blocks(text);
    let pieces = pack_blocks(&blocks, opts)
        .into_iter()
        .map(|p| Piece {
            text: truncate_chars(&p.text, opts.max_chars),
            heading: p.heading,
        })
        .filter(|p| !p.text.trim().is_empty())
        .collect();

    let mut merged = merge_tiny(pieces, opts.min_chars);
    merged.truncate(opts.max_chunks);

    merged
        .into_iter()
        .enumerate()
        .map(|(id, p)| Chunk {
            id,
            heading_path: p.heading.unwrap_or_else(|| DEFAULT_HEADING.to_string()),
            text: p.text,
        })
        .collect()
}

/// Parse an ATX heading: 1-6 `#`, then a space or tab, then the title.
fn parse_heading(line: &str) -> Option<(usize, &str)> {
    let level = line.bytes().take_while(|&b| b == b'#').count();
    if !(1..=6).contains(&level) {
        return None;
    }
    let rest = &line[level..];
    if !rest.starts_with([' ', '\t']) {
        return None;
    }
    let title = rest.trim();
    // Optional closing sequence: "## Title ##"
    let title = match title.trim_end_matches('#') {
        stripped if stripped.len() < title.len() && stripped.ends_with([' ', '\t']) => {
            stripped.trim_end()
        }
        _ => title,
    };
    Some((level, title))
}

/// An open code fence: its marker character and run length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fence {
    marker: char,
    len: usize,
}

impl Fence {
    /// A line opening a fence: three or more backticks or tildes.
    fn open(line: &str) -> Option<Self> {
        let t = line.trim_start();
        let marker = t.chars().next().filter(|c| *c == '`' || *c == '~')?;
        let len = t.chars().take_while(|c| *c == marker).count();
        (len >= 3).then_some(Self { marker, len })
    }

    /// A closing line repeats the opening marker at least as many times and
    /// carries nothing else.
    fn closes(&self, line: &str) -> bool {
        let t = line.trim();
        let run = t.chars().take_while(|c| *c == self.marker).count();
        run >= self.len && run == t.chars().count()
    }
}

fn breadcrumb(path: &[Option<String>]) -> Option<String> {
    let parts: Vec<&str> = path
        .iter()
        .flatten()
        .map(String::as_str)
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(HEADING_SEPARATOR))
    }
}

fn split_blocks(text: &str) -> Vec<Block> {
    let normalized = text.replace("\r\n", "\n");
    let mut blocks = Vec::new();
    let mut path: Vec<Option<String>> = Vec::new();
    let mut buf: Vec<&str> = Vec::new();
    let mut fence: Option<Fence> = None;

    fn flush(buf: &mut Vec<&str>, path: &[Option<String>], blocks: &mut Vec<Block>) {
        if buf.is_empty() {
            return;
        }
        let text = clean_markdown(&buf.join("\n"));
        buf.clear();
        if text.is_empty() {
            return;
        }
        blocks.push(Block {
            heading: breadcrumb(path),
            words: word_count(&text),
            text,
        });
    }

    for line in normalized.split('\n') {
        if let Some(open) = fence {
            buf.push(line);
            if open.closes(line) {
                fence = None;
            }
            continue;
        }
        if let Some(open) = Fence::open(line) {
            fence = Some(open);
            buf.push(line);
            continue;
        }
        if let Some((level, title)) = parse_heading(line) {
            flush(&mut buf, &path, &mut blocks);
            path.truncate(level - 1);
            path.resize(level - 1, None);
            path.push(Some(title.to_string()));
            continue;
        }
        if line.trim().is_empty() {
            flush(&mut buf, &path, &mut blocks);
        } else {
            buf.push(line);
        }
    }
    flush(&mut buf, &path, &mut blocks);

    blocks
}

fn merge_blocks(blocks: &[&Block]) -> Piece {
    let heading = blocks.iter().find_map(|b| b.heading.clone());
    let text = blocks
        .iter()
        .map(|b| b.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    Piece { heading, text }
}

/// Trailing whole blocks totalling at least `target` words.
fn overlap_suffix<'a>(blocks: &[&'a Block], target: usize) -> Vec<&'a Block> {
    if target == 0 {
        return Vec::new();
    }
    let mut count = 0;
    let mut start = blocks.len();
    while start > 0 {
        start -= 1;
        count += blocks[start].words;
        if count >= target {
            break;
        }
    }
    blocks[start..].to_vec()
}

fn pack_blocks(blocks: &[Block], opts: &ChunkOptions) -> Vec<Piece> {
    let mut out = Vec::new();
    let mut acc: Vec<&Block> = Vec::new();
    let mut acc_words = 0usize;

    for block in blocks {
        if acc_words + block.words <= opts.max_words {
            acc.push(block);
            acc_words += block.words;
            continue;
        }

        if !acc.is_empty() {
            out.push(merge_blocks(&acc));
            acc = overlap_suffix(&acc, opts.overlap_words);
            acc_words = acc.iter().map(|b| b.words).sum();
        }
        acc.push(block);
        acc_words += block.words;

        // 1.5 × max_words, in integers.
        if acc_words * 2 > opts.max_words * 3 {
            let merged = merge_blocks(&acc);
            out.extend(split_by_sentences(
                &merged.text,
                opts.max_words,
                opts.overlap_words,
                merged.heading.as_deref(),
            ));
            acc.clear();
            acc_words = 0;
        }
    }

    if !acc.is_empty() {
        out.push(merge_blocks(&acc));
    }
    out
}

fn split_by_sentences(
    text: &str,
    max_words: usize,
    overlap_words: usize,
    heading: Option<&str>,
) -> Vec<Piece> {
    let mut out = Vec::new();
    let mut buf: Vec<String> = Vec::new();
    let mut words = 0usize;

    let emit = |buf: &[String], out: &mut Vec<Piece>| {
        let text = buf.join(" ").trim().to_string();
        if !text.is_empty() {
            out.push(Piece {
                heading: heading.map(str::to_string),
                text,
            });
        }
    };

    for sentence in split_sentences(text) {
        let w = word_count(sentence);
        if words + w <= max_words {
            buf.push(sentence.to_string());
            words += w;
            continue;
        }
        emit(&buf, &mut out);
        let overlap = last_words(&buf.join(" "), overlap_words);
        words = word_count(&overlap);
        buf.clear();
        if !overlap.is_empty() {
            buf.push(overlap);
        }
        buf.push(sentence.to_string());
        words += w;
    }
    emit(&buf, &mut out);

    out
}

/// Fold each piece shorter than `min_chars` into the one after it.
///
/// Single forward pass: a merged result is not re-checked against the
/// threshold, and the absorbed successor is skipped.
fn merge_tiny(pieces: Vec<Piece>, min_chars: usize) -> Vec<Piece> {
    let mut out = Vec::with_capacity(pieces.len());
    let mut iter = pieces.into_iter();

    while let Some(cur) = iter.next() {
        if cur.text.chars().count() < min_chars {
            if let Some(next) = iter.next() {
                out.push(Piece {
                    text: format!("{}\n\n{}", cur.text, next.text).trim().to_string(),
                    heading: next.heading.or(cur.heading),
                });
                continue;
            }
        }
        out.push(cur);
    }
    out
}
