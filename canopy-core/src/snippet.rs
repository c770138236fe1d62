//! Source-text snippet extraction for quiz context
//!
//! Finds the first case-insensitive occurrence of a concept label in the
//! document and returns a bounded excerpt around it. Window math is done in
//! characters, not bytes, so multi-byte source text is safe.

/// Characters kept on each side of the matched topic.
const SNIPPET_WINDOW: usize = 200;

/// Extract an excerpt of `content` around the first occurrence of `topic`.
///
/// Returns an empty string when the topic does not occur. The excerpt is
/// prefixed/suffixed with `...` when clamped at the corresponding end, and
/// re-verified to still contain the topic before being returned.
pub fn extract_snippet(content: &str, topic: &str) -> String {
    let content_chars: Vec<char> = content.chars().collect();
    let topic_chars: Vec<char> = topic.chars().collect();

    let index = match find_case_insensitive(&content_chars, &topic_chars) {
        Some(i) => i,
        None => return String::new(),
    };

    let start = index.saturating_sub(SNIPPET_WINDOW);
    let end = (index + topic_chars.len() + SNIPPET_WINDOW).min(content_chars.len());

    // Clamping can in principle cut the match itself; verify before returning.
    if find_case_insensitive(&content_chars[start..end], &topic_chars).is_none() {
        return String::new();
    }

    let mut snippet: String = content_chars[start..end].iter().collect();
    if start > 0 {
        snippet = format!("...{}", snippet);
    }
    if end < content_chars.len() {
        snippet.push_str("...");
    }
    snippet
}

fn find_case_insensitive(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    let fold = |c: char| c.to_lowercase().next().unwrap_or(c);
    (0..=haystack.len() - needle.len()).find(|&i| {
        haystack[i..i + needle.len()]
            .iter()
            .zip(needle)
            .all(|(a, b)| fold(*a) == fold(*b))
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_topic_returns_empty() {
        assert_eq!(extract_snippet("some document text", "missing"), "");
    }

    #[test]
    fn test_empty_topic_returns_empty() {
        assert_eq!(extract_snippet("some document text", ""), "");
    }

    #[test]
    fn test_match_is_case_insensitive() {
        let snippet = extract_snippet("Rust ownership rules", "rust OWNERSHIP");
        assert!(snippet.contains("Rust ownership"));
    }

    #[test]
    fn test_short_content_has_no_ellipses() {
        let snippet = extract_snippet("photosynthesis in plants", "photosynthesis");
        assert_eq!(snippet, "photosynthesis in plants");
    }

    #[test]
    fn test_long_content_clamps_with_ellipses_both_sides() {
        let content = format!("{}TARGETtext{}", "a".repeat(300), "b".repeat(300));
        let snippet = extract_snippet(&content, "TARGETtext");
        assert!(snippet.starts_with("..."));
        assert!(snippet.ends_with("..."));
        assert!(snippet.contains("TARGETtext"));
        // 200 chars each side plus the topic and both ellipses
        assert_eq!(snippet.chars().count(), 3 + 200 + 10 + 200 + 3);
    }

    #[test]
    fn test_match_at_start_only_suffixes_ellipsis() {
        let content = format!("TARGETtext{}", "b".repeat(300));
        let snippet = extract_snippet(&content, "TARGETtext");
        assert!(snippet.starts_with("TARGETtext"));
        assert!(snippet.ends_with("..."));
    }

    #[test]
    fn test_multibyte_content_is_window_safe() {
        let content = format!("{}知识图谱{}", "前".repeat(250), "后".repeat(250));
        let snippet = extract_snippet(&content, "知识图谱");
        assert!(snippet.contains("知识图谱"));
        assert!(snippet.starts_with("..."));
        assert!(snippet.ends_with("..."));
    }

    #[test]
    fn test_first_occurrence_wins() {
        let content = format!("first topic here {} topic again", "x".repeat(600));
        let snippet = extract_snippet(&content, "topic");
        assert!(snippet.starts_with("first topic here"));
    }
}
