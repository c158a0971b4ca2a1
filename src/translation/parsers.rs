pub(super) fn is_line_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'-') && bytes.get(idx + 1) == Some(&b'-')
}

pub(super) fn is_block_comment_start(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'/') && bytes.get(idx + 1) == Some(&b'*')
}

pub(super) fn is_block_comment_end(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx) == Some(&b'*') && bytes.get(idx + 1) == Some(&b'/')
}

/// `@@ROWCOUNT` and friends, or an `@` glued to a preceding identifier.
pub(super) fn is_not_a_placeholder(bytes: &[u8], idx: usize) -> bool {
    bytes.get(idx + 1) == Some(&b'@')
        || (idx > 0 && super::scanner::is_identifier_byte(bytes[idx - 1]))
}
