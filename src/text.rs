//! Text helpers shared by the chunker and the answer synthesizer.
//!
//! Everything here is pure and deterministic. Character counts are Unicode
//! scalar values, never bytes, so truncation is always UTF-8 safe.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Placeholder substituted for fenced code blocks.
pub const CODE_BLOCK_PLACEHOLDER: &str = "[code block]";

/// Marker appended to truncated text.
pub const ELLIPSIS: char = '…';

// An unterminated fence runs to the end of the block.
static FENCED_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?(?:```|\z)|~~~.*?(?:~~~|\z)").unwrap());
static INLINE_CODE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"`([^`]+)`").unwrap());
static BOLD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*([^*]+)\*\*").unwrap());
static ITALIC: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*([^*]+)\*").unwrap());
static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Strip markdown decoration down to plain prose.
///
/// Order matters: code fences go first so their contents are never
/// mistaken for emphasis or tags.
pub fn clean_markdown(text: &str) -> String {
    let t = FENCED_CODE.replace_all(text, CODE_BLOCK_PLACEHOLDER);
    let t = INLINE_CODE.replace_all(&t, "$1");
    let t = BOLD.replace_all(&t, "$1");
    let t = ITALIC.replace_all(&t, "$1");
    let t = HTML_TAG.replace_all(&t, "");
    let t = WHITESPACE.replace_all(&t, " ");
    t.trim().to_string()
}

/// Split after `.`, `!` or `?` when followed by whitespace.
///
/// Returned sentences are trimmed; empty pieces are dropped.
pub fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if !matches!(c, '.' | '!' | '?') {
            continue;
        }
        let Some(&(_, next)) = chars.peek() else {
            break;
        };
        if !next.is_whitespace() {
            continue;
        }
        let end = i + c.len_utf8();
        push_trimmed(&mut sentences, &text[start..end]);
        while let Some(&(_, ws)) = chars.peek() {
            if !ws.is_whitespace() {
                break;
            }
            chars.next();
        }
        start = chars.peek().map(|&(j, _)| j).unwrap_or(text.len());
    }

    if start < text.len() {
        push_trimmed(&mut sentences, &text[start..]);
    }
    sentences
}

fn push_trimmed<'a>(out: &mut Vec<&'a str>, piece: &'a str) {
    let piece = piece.trim();
    if !piece.is_empty() {
        out.push(piece);
    }
}

static STOPWORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "a", "an", "the", "and", "or", "of", "to", "in", "on", "for", "with", "as", "by", "at",
        "from", "is", "are", "was", "were", "be", "been", "being", "it", "its", "that", "this",
        "these", "those", "which", "what", "who", "whom", "into", "about", "how", "why", "when",
        "where", "can", "could", "should", "would", "may", "might", "than", "then", "also", "not",
        "no", "do", "does", "did", "done", "if", "else", "but", "so", "such", "using", "use",
        "used", "via", "like", "between", "within", "over", "under", "per", "each",
    ]
    .into_iter()
    .collect()
});

/// Lowercase, replace non-alphanumerics with spaces, split, drop stop-words.
///
/// Only ASCII letters and digits survive; everything else separates tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered: String = text
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    lowered
        .split_whitespace()
        .filter(|w| !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// The last `n` whitespace-separated words of `text`, joined by single spaces.
pub fn last_words(text: &str, n: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let skip = words.len().saturating_sub(n);
    words[skip..].join(" ")
}

/// Cap `text` at `max_chars` characters, ellipsis included.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars == 0 {
        return String::new();
    }
    let mut out: String = text.chars().take(max_chars - 1).collect();
    out.truncate(out.trim_end().len());
    out.push(ELLIPSIS);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_replaces_fenced_code() {
        let t = clean_markdown("Before\n```rust\nfn main() {}\n```\nafter");
        assert_eq!(t, "Before [code block] after");
    }

    #[test]
    fn clean_handles_unterminated_fence() {
        let t = clean_markdown("Intro\n```\nlet x = 1;");
        assert_eq!(t, "Intro [code block]");
    }

    #[test]
    fn clean_strips_inline_markers() {
        let t = clean_markdown("Use `cargo` with **care** and *style*.");
        assert_eq!(t, "Use cargo with care and style.");
    }

    #[test]
    fn clean_strips_html_and_collapses_whitespace() {
        let t = clean_markdown("  <b>Hello</b>\t\tworld\r\n\n  again  ");
        assert_eq!(t, "Hello world again");
    }

    #[test]
    fn sentences_split_on_terminal_punctuation() {
        let s = split_sentences("One. Two! Three? Four");
        assert_eq!(s, vec!["One.", "Two!", "Three?", "Four"]);
    }

    #[test]
    fn sentences_keep_inner_punctuation() {
        let s = split_sentences("Version 1.5 is out. See v2.0.");
        assert_eq!(s, vec!["Version 1.5 is out.", "See v2.0."]);
    }

    #[test]
    fn sentences_of_blank_text() {
        assert!(split_sentences("   ").is_empty());
        assert!(split_sentences("").is_empty());
    }

    #[test]
    fn tokenize_drops_stopwords_and_punctuation() {
        assert_eq!(tokenize("What is X?"), vec!["x"]);
        assert_eq!(
            tokenize("How does the Deploy-Pipeline work?"),
            vec!["deploy", "pipeline", "work"]
        );
    }

    #[test]
    fn last_words_takes_suffix() {
        assert_eq!(last_words("a b c d e", 2), "d e");
        assert_eq!(last_words("a b", 5), "a b");
        assert_eq!(last_words("a b", 0), "");
    }

    #[test]
    fn truncate_respects_cap_with_ellipsis() {
        assert_eq!(truncate_chars("short", 10), "short");
        let t = truncate_chars("abcdefghij", 5);
        assert_eq!(t, "abcd…");
        assert_eq!(t.chars().count(), 5);
    }

    #[test]
    fn truncate_is_utf8_safe() {
        let t = truncate_chars("┌──────┐", 4);
        assert_eq!(t, "┌──…");
    }
}
