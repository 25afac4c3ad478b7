//! Small shared helpers.

/// Truncate a string to at most `max_len` bytes on a char boundary,
/// appending a marker when anything was cut.
pub fn truncate_with_marker(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len.saturating_sub(3);
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

/// Short random id, 8 hex chars of a v4 UUID.
pub fn short_id() -> String {
    uuid::Uuid::new_v4().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_string_untouched() {
        assert_eq!(truncate_with_marker("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_adds_marker() {
        let out = truncate_with_marker("abcdefghij", 8);
        assert_eq!(out, "abcde...");
    }

    #[test]
    fn test_truncate_respects_char_boundary() {
        let out = truncate_with_marker("日本語テキスト", 8);
        assert!(out.ends_with("..."));
        assert!(out.len() <= 8);
    }

    #[test]
    fn test_short_id_length() {
        assert_eq!(short_id().len(), 8);
    }
}
