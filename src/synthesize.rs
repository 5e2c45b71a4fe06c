//! Extractive answer synthesis.
//!
//! Picks the sentences from the retrieved chunks that share the most terms
//! with the question and stitches the best three together. No model is
//! involved: the same question and chunks always give the same answer.
//!
//! # Scoring
//!
//! For every question token (lowercased, punctuation stripped, stop-words
//! removed):
//!
//! | Match in sentence | Points |
//! |-------------------|--------|
//! | Exact token | +2 |
//! | Prefix either way (`deploy` / `deployment`) | +1 |
//!
//! Sentences with more than 4 and fewer than 60 tokens get one bonus point.

use crate::models::Chunk;
use crate::text::{split_sentences, tokenize, truncate_chars};

/// Default character cap on a synthesized answer.
pub const DEFAULT_ANSWER_LIMIT: usize = 600;

/// Character cap on the fallback answer.
pub const FALLBACK_LIMIT: usize = 500;

/// Answer given when there is nothing to extract from.
pub const NO_ANSWER: &str = "No relevant information found.";

pub const MAX_SENTENCES: usize = 3;

/// Score one sentence against pre-tokenized question terms.
pub fn score_sentence(sentence: &str, question_tokens: &[String]) -> u32 {
    let tokens = tokenize(sentence);
    let mut score = 0;
    for q in question_tokens {
        if tokens.iter().any(|t| t == q) {
            score += 2;
        } else if tokens
            .iter()
            .any(|t| t.starts_with(q.as_str()) || q.starts_with(t.as_str()))
        {
            score += 1;
        }
    }
    if tokens.len() > 4 && tokens.len() < 60 {
        score += 1;
    }
    score
}

/// A sentence from a retrieved chunk, with the heading it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentenceMatch<'a> {
    pub text: &'a str,
    pub heading: &'a str,
    pub score: u32,
}

/// The highest-scoring sentences of `chunks` for `question`, best first.
///
/// At most [`MAX_SENTENCES`]; equal scores keep document order. Sentences
/// scoring zero are left out.
pub fn best_sentences<'a>(question: &str, chunks: &'a [Chunk]) -> Vec<SentenceMatch<'a>> {
    let question_tokens = tokenize(question);

    let mut matches: Vec<SentenceMatch<'a>> = chunks
        .iter()
        .flat_map(|c| {
            split_sentences(&c.text)
                .into_iter()
                .map(move |text| (text, c.heading_path.as_str()))
        })
        .map(|(text, heading)| SentenceMatch {
            text,
            heading,
            score: score_sentence(text, &question_tokens),
        })
        .filter(|m| m.score > 0)
        .collect();

    // Stable: equal scores keep encounter order.
    matches.sort_by(|a, b| b.score.cmp(&a.score));
    matches.truncate(MAX_SENTENCES);
    matches
}

/// Build a short answer from the sentences of `chunks` most relevant to `question`.
///
/// Falls back to the first chunk's text (capped at [`FALLBACK_LIMIT`]) when
/// no sentence scores above zero, and to [`NO_ANSWER`] when there are no
/// chunks at all.
pub fn synthesize(question: &str, chunks: &[Chunk], limit: usize) -> String {
    let matches = best_sentences(question, chunks);

    if matches.is_empty() {
        let fallback = chunks.first().map_or(NO_ANSWER, |c| c.text.as_str());
        return truncate_chars(fallback, FALLBACK_LIMIT);
    }

    for m in &matches {
        tracing::debug!(heading = m.heading, score = m.score, "picked sentence");
    }
    let answer = matches
        .iter()
        .map(|m| m.text)
        .collect::<Vec<_>>()
        .join(" ");
    truncate_chars(&answer, limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: usize, text: &str) -> Chunk {
        Chunk {
            id,
            heading_path: format!("Section {id}"),
            text: text.to_string(),
        }
    }

    #[test]
    fn exact_match_beats_prefix_match() {
        let q = tokenize("deploy");
        let exact = score_sentence("We deploy", &q);
        let prefix = score_sentence("Deployment", &q);
        assert_eq!(exact, 2);
        assert_eq!(prefix, 1);
    }

    #[test]
    fn length_bonus_window() {
        let q: Vec<String> = Vec::new();
        assert_eq!(score_sentence("one two three four", &q), 0);
        assert_eq!(score_sentence("one two three four five", &q), 1);
        let long = "word ".repeat(60);
        assert_eq!(score_sentence(&long, &q), 0);
    }

    #[test]
    fn finds_the_relevant_sentence() {
        let unrelated = (0..10)
            .map(|i| format!("Unrelated filler sentence number {i} mentions bananas."))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = vec![
            chunk(0, &unrelated),
            chunk(1, "Some intro. X is a protocol for Y. More text follows."),
        ];
        let answer = synthesize("What is X?", &chunks, DEFAULT_ANSWER_LIMIT);
        assert!(answer.contains("X is a protocol for Y."));
        assert!(answer.chars().count() <= DEFAULT_ANSWER_LIMIT);
    }

    #[test]
    fn at_most_three_sentences_in_score_order() {
        let chunks = vec![chunk(
            0,
            "Rust is fast. Rust has cargo and crates for rust. Rust rust. Python is slow. Rust again here today.",
        )];
        let answer = synthesize("rust cargo crates", &chunks, DEFAULT_ANSWER_LIMIT);
        assert!(answer.starts_with("Rust has cargo and crates for rust."));
        assert!(!answer.contains("Python"));
        assert_eq!(answer.matches('.').count(), 3);
    }

    #[test]
    fn ties_keep_encounter_order() {
        let chunks = vec![
            chunk(0, "Alpha mentions widgets."),
            chunk(1, "Beta mentions widgets."),
        ];
        let answer = synthesize("widgets", &chunks, DEFAULT_ANSWER_LIMIT);
        assert_eq!(answer, "Alpha mentions widgets. Beta mentions widgets.");
    }

    #[test]
    fn no_overlap_falls_back_to_first_chunk() {
        let first = "zz ".repeat(400);
        let chunks = vec![chunk(0, &first), chunk(1, "qq")];
        let answer = synthesize("entirely different", &chunks, DEFAULT_ANSWER_LIMIT);
        assert!(!answer.is_empty());
        assert!(answer.starts_with("zz zz"));
        assert_eq!(answer.chars().count(), FALLBACK_LIMIT);
    }

    #[test]
    fn sentences_carry_their_chunk_heading() {
        let chunks = vec![
            chunk(0, "Nothing relevant here at all."),
            chunk(1, "Gears turn slowly. Levers lift loads."),
        ];
        let picked = best_sentences("levers", &chunks);
        assert_eq!(picked[0].text, "Levers lift loads.");
        assert_eq!(picked[0].heading, "Section 1");
        assert!(picked.len() <= MAX_SENTENCES);
    }

    #[test]
    fn no_chunks_gives_no_answer_message() {
        assert_eq!(synthesize("anything", &[], DEFAULT_ANSWER_LIMIT), NO_ANSWER);
    }

    #[test]
    fn answer_is_capped() {
        let sentence = format!("Widgets {}.", "widgets ".repeat(40).trim());
        let text = [sentence.as_str(); 3].join(" ");
        let answer = synthesize("widgets", &[chunk(0, &text)], 100);
        assert_eq!(answer.chars().count(), 100);
        assert!(answer.ends_with('…'));
    }

    #[test]
    fn deterministic() {
        let chunks = vec![chunk(0, "One fact about gears. Another about levers.")];
        assert_eq!(
            synthesize("gears levers", &chunks, 600),
            synthesize("gears levers", &chunks, 600)
        );
    }
}
