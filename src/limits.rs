//! Byte classifiers and resource limits enforced by the request parsers.
//!
//! Every accumulator in the parsing layer is bounded by one of the
//! constants below; a field that would exceed its limit makes the request
//! invalid and the connection is closed without a response.

/// Maximum length of the HTTP method token.
pub const METHOD_MAX: usize = 1024;

/// Maximum length of the URI stem (resource).
pub const RESOURCE_MAX: usize = 256 * 1024;

/// Maximum length of the raw query string.
pub const QUERY_STRING_MAX: usize = 1024 * 1024;

/// Maximum length of a header name.
pub const HEADER_NAME_MAX: usize = 1024;

/// Maximum length of a header value.
pub const HEADER_VALUE_MAX: usize = 1024 * 1024;

/// Maximum length of a url-encoded parameter name.
pub const QUERY_NAME_MAX: usize = 1024;

/// Maximum length of a url-encoded parameter value.
pub const QUERY_VALUE_MAX: usize = 1024 * 1024;

/// Maximum length of a cookie name.
pub const COOKIE_NAME_MAX: usize = 1024;

/// Maximum length of a cookie value.
pub const COOKIE_VALUE_MAX: usize = 1024 * 1024;

/// Maximum length of a request body.
pub const POST_CONTENT_MAX: usize = 1024 * 1024;

/// Size of the per-connection read buffer.
pub const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Returns true if `c` is a 7-bit ASCII character.
#[inline]
pub fn is_char(c: u8) -> bool {
    c <= 127
}

/// Returns true if `c` is an ASCII control character.
#[inline]
pub fn is_control(c: u8) -> bool {
    c <= 31 || c == 127
}

/// Returns true if `c` is an ASCII digit.
#[inline]
pub fn is_digit(c: u8) -> bool {
    c.is_ascii_digit()
}

/// Returns true if `c` is an HTTP token separator.
#[inline]
pub fn is_special(c: u8) -> bool {
    matches!(
        c,
        b'(' | b')'
            | b'<'
            | b'>'
            | b'@'
            | b','
            | b';'
            | b':'
            | b'\\'
            | b'"'
            | b'/'
            | b'['
            | b']'
            | b'?'
            | b'='
            | b'{'
            | b'}'
            | b' '
            | b'\t'
    )
}

/// Returns true if `c` may appear in an HTTP token (method or header name).
#[inline]
pub fn is_token_char(c: u8) -> bool {
    is_char(c) && !is_control(c) && !is_special(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_token_chars() {
        assert!(is_token_char(b'G'));
        assert!(is_token_char(b'-'));
        assert!(!is_token_char(b' '));
        assert!(!is_token_char(b':'));
        assert!(!is_token_char(b'\t'));
        assert!(!is_token_char(0x7f));
        assert!(!is_token_char(0x80));
    }

    #[test]
    fn classifies_controls() {
        assert!(is_control(0));
        assert!(is_control(31));
        assert!(is_control(127));
        assert!(!is_control(32));
        assert!(!is_control(b'a'));
    }
}
