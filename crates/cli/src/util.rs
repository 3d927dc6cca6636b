use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

/// Display width of a string, accounting for CJK double-width, emoji, etc.
/// Vocabulary labels such as "日本語" would otherwise misalign report columns.
pub(crate) fn display_width(s: &str) -> usize {
    UnicodeWidthStr::width(s)
}

/// Truncate to at most `width` display columns, marking the cut with "..".
pub(crate) fn truncate_display(s: &str, width: usize) -> String {
    if display_width(s) <= width {
        return s.to_string();
    }
    if width < 3 {
        return s
            .chars()
            .find(|ch| ch.width().unwrap_or(0) <= width)
            .map(String::from)
            .unwrap_or_default();
    }

    let budget = width - 2;
    let mut used = 0;
    let mut kept = String::new();
    for ch in s.chars() {
        let w = ch.width().unwrap_or(0);
        if used + w > budget {
            break;
        }
        used += w;
        kept.push(ch);
    }
    kept.push_str("..");
    kept
}

/// Fit `s` into exactly `width` display columns, keeping at least one
/// trailing space as the column separator.
pub(crate) fn pad_right(s: &str, width: usize) -> String {
    let fitted = truncate_display(s, width.saturating_sub(1));
    let w = display_width(&fitted);
    format!("{fitted}{}", " ".repeat(width.saturating_sub(w)))
}
