/// Lexical state while walking SQL text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum State {
    Normal,
    SingleQuoted,
    DoubleQuoted,
    /// SQL Server `[quoted identifier]`
    Bracketed,
    LineComment,
    BlockComment(u32),
}

pub(super) fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

/// Scan an identifier starting at `start`; returns the end offset when at least one byte matched.
pub(super) fn scan_word(bytes: &[u8], start: usize) -> Option<usize> {
    let mut idx = start;
    while idx < bytes.len() && is_word_byte(bytes[idx]) {
        idx += 1;
    }
    if idx == start { None } else { Some(idx) }
}

/// Scan whitespace followed by the keyword `unknown` (any case) that is not itself a prefix.
pub(super) fn scan_unknown_hint(bytes: &[u8], start: usize) -> Option<usize> {
    const HINT: &[u8] = b"unknown";
    let mut idx = start;
    while idx < bytes.len() && bytes[idx].is_ascii_whitespace() {
        idx += 1;
    }
    if idx == start {
        return None;
    }
    let end = idx + HINT.len();
    if end > bytes.len() || !bytes[idx..end].eq_ignore_ascii_case(HINT) {
        return None;
    }
    if bytes.get(end).is_some_and(|b| is_word_byte(*b)) {
        return None;
    }
    Some(end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_stop_at_punctuation() {
        assert_eq!(scan_word(b"ids)", 0), Some(3));
        assert_eq!(scan_word(b")", 0), None);
    }

    #[test]
    fn unknown_hint_needs_leading_whitespace() {
        assert_eq!(scan_word(b"ids UNKNOWN)", 0), Some(3));
        assert_eq!(scan_unknown_hint(b"ids UNKNOWN)", 3), Some(11));
        assert_eq!(scan_unknown_hint(b"idsunknown", 3), None);
        assert_eq!(scan_unknown_hint(b"ids unknowns", 3), None);
    }
}
