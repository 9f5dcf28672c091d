/// Any control character. Notes may keep ordinary line breaks and tabs.
pub(crate) fn has_control_chars(value: &str, allow_line_breaks: bool) -> bool {
    value.chars().any(|c| {
        c.is_control() && !(allow_line_breaks && matches!(c, '\n' | '\r' | '\t'))
    })
}

/// Cuts `value` to at most `max_chars` characters. Returns whether it was cut.
pub(crate) fn truncate_chars(value: &str, max_chars: usize) -> (String, bool) {
    match value.char_indices().nth(max_chars) {
        Some((byte_index, _)) => (value[..byte_index].to_string(), true),
        None => (value.to_string(), false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_control_characters() {
        assert!(has_control_chars("S-1\u{0000}", false));
        assert!(has_control_chars("line\nbreak", false));
        assert!(!has_control_chars("line\nbreak", true));
        assert!(has_control_chars("bell\u{0007}", true));
        assert!(!has_control_chars("plain", false));
    }

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), ("hé".to_string(), true));
        assert_eq!(truncate_chars("hi", 2), ("hi".to_string(), false));
    }
}
