//! Token estimation and text clipping.
//!
//! Character heuristic: 1 token ≈ 4 bytes of UTF-8, rounded up. Every size
//! decision in the engine (evidence packing, prompt accounting, compaction)
//! uses this one estimate so budgets stay consistent.

/// Estimate the token count for a string.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.len().div_ceil(4)
}

/// Clip `text` to at most `max_chars` characters, marking the cut with `…`.
///
/// Whitespace is trimmed first. Cuts happen on char boundaries.
pub fn clip(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let kept: String = trimmed.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}…", kept.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn four_chars_is_one_token() {
        assert_eq!(estimate_tokens("test"), 1);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn clip_short_text_is_untouched() {
        assert_eq!(clip("  obras  ", 10), "obras");
    }

    #[test]
    fn clip_marks_the_cut() {
        let clipped = clip("suministro de vehículos", 10);
        assert!(clipped.ends_with('…'));
        assert!(clipped.chars().count() <= 10);
    }

    #[test]
    fn multibyte_counts_bytes() {
        // "año" is 4 bytes
        assert_eq!(estimate_tokens("año"), 1);
    }
}
