pub(super) fn is_line_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'-') && bytes.get(idx + 1) == Some(&b'-')
}

pub(super) fn is_block_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'/') && bytes.get(idx + 1) == Some(&b'*')
}

pub(super) fn is_block_comment_end(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'*') && bytes.get(idx + 1) == Some(&b'/')
}

pub(super) fn is_placeholder_prefix(b: u8) -> bool {
    matches!(b, b'@' | b':' | b'?')
}

/// `@@ROWCOUNT` style system variables and `::type` casts are not placeholders.
pub(super) fn is_doubled_prefix(bytes: &[u8], idx: usize) -> bool {
    idx > 0 && bytes[idx - 1] == bytes[idx] && matches!(bytes[idx], b'@' | b':')
}
