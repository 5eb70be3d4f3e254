//! Snippet extraction for result items.
//!
//! The snippet is a window of at most `SNIPPET_LENGTH` characters centred
//! on the best query-token match inside the chunk: the longest query token
//! that occurs wins, earliest occurrence on ties. Without any match the
//! window is the head of the chunk.

use ctxc_core::defaults::SNIPPET_LENGTH;

/// Build a snippet for `text` relative to `query`.
pub fn build_snippet(text: &str, query: &str) -> String {
    build_snippet_with_len(text, query, SNIPPET_LENGTH)
}

fn build_snippet_with_len(text: &str, query: &str, max_chars: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_chars {
        return text.to_string();
    }

    let lower: String = text.to_lowercase();
    let lower_chars: Vec<char> = lower.chars().collect();

    // Longest query token first; earliest occurrence wins ties.
    let mut tokens: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect();
    tokens.sort_by_key(|t| std::cmp::Reverse(t.chars().count()));

    let match_at = tokens
        .iter()
        .find_map(|token| find_chars(&lower_chars, token));

    let center = match match_at {
        Some((start, len)) => start + len / 2,
        None => max_chars / 2,
    };

    let half = max_chars / 2;
    let start = center.saturating_sub(half).min(chars.len() - max_chars);
    let end = (start + max_chars).min(chars.len());
    chars[start..end].iter().collect()
}

/// Locate `token` in `haystack` (already lowercased), returning the char
/// offset and token char length.
fn find_chars(haystack: &[char], token: &str) -> Option<(usize, usize)> {
    let needle: Vec<char> = token.chars().collect();
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle.as_slice())
        .map(|at| (at, needle.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_returned_whole() {
        assert_eq!(build_snippet("short text", "anything"), "short text");
    }

    #[test]
    fn test_window_centers_on_match() {
        let text = format!("{} espresso {}", "a".repeat(500), "b".repeat(500));
        let snippet = build_snippet_with_len(&text, "espresso", 100);
        assert_eq!(snippet.chars().count(), 100);
        assert!(snippet.contains("espresso"));
    }

    #[test]
    fn test_match_is_case_insensitive() {
        let text = format!("{} ESPRESSO {}", "a".repeat(500), "b".repeat(500));
        let snippet = build_snippet_with_len(&text, "espresso", 100);
        assert!(snippet.contains("ESPRESSO"));
    }

    #[test]
    fn test_no_match_takes_head() {
        let text = "c".repeat(1000);
        let snippet = build_snippet_with_len(&text, "absent", 100);
        assert_eq!(snippet, "c".repeat(100));
    }

    #[test]
    fn test_longest_token_wins() {
        let text = format!(
            "one {} elephants two",
            "x".repeat(600),
        );
        // "elephants" is longer than "one"; the window must land on it.
        let snippet = build_snippet_with_len(&text, "one elephants", 60);
        assert!(snippet.contains("elephants"));
    }

    #[test]
    fn test_snippet_never_exceeds_limit() {
        let text = "word ".repeat(500);
        let snippet = build_snippet(&text, "word");
        assert!(snippet.chars().count() <= SNIPPET_LENGTH);
    }
}
