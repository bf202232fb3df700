//! Context window extraction around a matched span.

/// Byte radius kept on each side of a match before normalization.
pub const CONTEXT_RADIUS: usize = 150;

/// Slice a window of roughly `CONTEXT_RADIUS` bytes around `[start, end)`,
/// snapped outward to UTF-8 char boundaries, then trimmed with whitespace
/// runs collapsed to single spaces.
pub fn context_window(text: &str, start: usize, end: usize) -> String {
    let mut lo = start.saturating_sub(CONTEXT_RADIUS);
    while lo > 0 && !text.is_char_boundary(lo) {
        lo -= 1;
    }
    let mut hi = end.saturating_add(CONTEXT_RADIUS).min(text.len());
    while hi < text.len() && !text.is_char_boundary(hi) {
        hi += 1;
    }
    normalize(&text[lo..hi])
}

/// Collapse whitespace runs (including newlines) to single spaces and trim.
pub fn normalize(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_bounded_and_normalized() {
        let text = format!("{}  leak\na@b.com\tnow  {}", "x".repeat(400), "y".repeat(400));
        let start = text.find("a@b.com").unwrap();
        let ctx = context_window(&text, start, start + "a@b.com".len());
        assert!(ctx.contains("leak a@b.com now"));
        assert!(ctx.len() <= 2 * CONTEXT_RADIUS + "a@b.com".len() + 2);
        assert!(!ctx.contains('\n'));
        assert!(!ctx.starts_with(' ') && !ctx.ends_with(' '));
    }

    #[test]
    fn window_clamps_at_text_edges() {
        let ctx = context_window("a@b.com wrote in", 0, 7);
        assert_eq!(ctx, "a@b.com wrote in");
    }

    #[test]
    fn window_never_splits_multibyte_chars() {
        // The byte radius lands inside a 2-byte char on both sides here; a
        // naive byte slice would panic.
        let text = format!("{}xa@b.comy{}", "é".repeat(100), "è".repeat(100));
        let start = text.find("a@b.com").unwrap();
        let ctx = context_window(&text, start, start + "a@b.com".len());
        assert!(ctx.contains("a@b.com"));
    }
}
