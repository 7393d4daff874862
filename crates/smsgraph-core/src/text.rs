/// Truncate to at most `max_chars` characters (not bytes), so multi-byte
/// text never splits inside a code point.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.chars().take(max_chars).collect()
}

/// Join up to `max_items` entries with `sep`, noting how many were omitted.
pub fn join_first<I, S>(items: I, max_items: usize, sep: &str) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let all: Vec<String> = items.into_iter().map(|s| s.as_ref().to_string()).collect();
    let total = all.len();
    let mut out = all
        .into_iter()
        .take(max_items)
        .collect::<Vec<_>>()
        .join(sep);
    if total > max_items {
        out.push_str(&format!(" (+{} more)", total - max_items));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars_short_unchanged() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("", 0), "");
    }

    #[test]
    fn test_truncate_chars_cuts_at_limit() {
        assert_eq!(truncate_chars("hello world", 5), "hello");
    }

    #[test]
    fn test_truncate_chars_multibyte() {
        // 4 chars, 12 bytes; counting bytes would split a code point
        assert_eq!(truncate_chars("日本語文", 2), "日本");
    }

    #[test]
    fn test_join_first_under_limit() {
        assert_eq!(join_first(["a", "b"], 3, "; "), "a; b");
    }

    #[test]
    fn test_join_first_over_limit() {
        assert_eq!(join_first(["a", "b", "c", "d"], 3, "; "), "a; b; c (+1 more)");
    }

    #[test]
    fn test_join_first_empty() {
        assert_eq!(join_first(Vec::<String>::new(), 3, "; "), "");
    }
}
