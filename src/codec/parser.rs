//! The incremental HTTP request parser.
//!
//! The parser is a hand-rolled state machine that consumes arbitrarily
//! fragmented byte streams one byte at a time. Each call to
//! [`RequestParser::parse`] consumes as much of the input as it can and
//! reports one of three outcomes: more bytes are needed, the request head
//! is complete, or the request is invalid. State is preserved across
//! calls, so the same byte sequence produces the same result no matter how
//! it is split over reads.
//!
//! Line termination is deliberately permissive: CRLF, bare CR and bare LF
//! are all accepted, and after a CR a second CR (or after an LF a second
//! LF) ends the request. Real-world clients produce all of these.

use crate::limits::{
    is_char, is_control, is_digit, is_special, is_token_char, HEADER_NAME_MAX, HEADER_VALUE_MAX,
    METHOD_MAX, QUERY_STRING_MAX, RESOURCE_MAX,
};
use crate::protocol::Request;

/// The parser's position inside the request grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseState {
    MethodStart,
    Method,
    UriStem,
    UriQuery,
    HttpVerH,
    HttpVerT1,
    HttpVerT2,
    HttpVerP,
    HttpVerSlash,
    MajorStart,
    Major,
    MinorStart,
    Minor,
    ExpectingNewline,
    ExpectingCr,
    HeaderWhitespace,
    HeaderStart,
    HeaderName,
    SpaceBeforeHeaderValue,
    HeaderValue,
    ExpectingFinalNewline,
    ExpectingFinalCr,
}

/// The tri-state outcome of a parse call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStatus {
    /// More bytes are needed to finish the request head
    Incomplete,
    /// The request head is complete and valid
    Complete,
    /// The request is malformed or exceeded a limit
    Invalid,
}

/// An incremental parser for one HTTP request head.
///
/// The parser owns bounded accumulators for the field currently being
/// read; committed fields are written straight into the [`Request`]
/// passed to [`parse`](Self::parse). A parser instance serves exactly one
/// request.
pub struct RequestParser {
    state: ParseState,
    limit_exceeded: Option<(usize, usize)>,
    method: Vec<u8>,
    resource: Vec<u8>,
    query_string: Vec<u8>,
    header_name: Vec<u8>,
    header_value: Vec<u8>,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self {
            state: ParseState::MethodStart,
            limit_exceeded: None,
            method: Vec::new(),
            resource: Vec::new(),
            query_string: Vec::new(),
            header_name: Vec::new(),
            header_value: Vec::new(),
        }
    }
}

impl RequestParser {
    pub fn new() -> Self {
        Default::default()
    }

    /// The current parse state.
    pub fn state(&self) -> ParseState {
        self.state
    }

    /// The `(size, limit)` pair of the field that tripped a size limit,
    /// if the last `Invalid` outcome was caused by one.
    pub fn limit_exceeded(&self) -> Option<(usize, usize)> {
        self.limit_exceeded
    }

    fn over_limit(&mut self, current: usize, max: usize) -> ParseStatus {
        self.limit_exceeded = Some((current, max));
        ParseStatus::Invalid
    }

    /// Consumes bytes from `buf`, advancing the request head parse.
    ///
    /// Returns the number of bytes consumed together with the parse
    /// status. The parser never looks past `buf` and consumes at most
    /// `buf.len()` bytes; on `Complete` the unconsumed tail belongs to the
    /// request body (or is a protocol error, decided by the read
    /// pipeline).
    pub fn parse(&mut self, request: &mut Request, buf: &[u8]) -> (usize, ParseStatus) {
        use ParseState::*;

        let mut i = 0;
        while i < buf.len() {
            let c = buf[i];

            match self.state {
                MethodStart => {
                    // skip leading whitespace before the method
                    if c != b' ' && c != b'\r' && c != b'\n' {
                        if !is_token_char(c) {
                            return (i, ParseStatus::Invalid);
                        }
                        self.state = Method;
                        self.method.clear();
                        self.method.push(c);
                    }
                }

                Method => {
                    if c == b' ' {
                        request.set_method(take_string(&mut self.method));
                        self.resource.clear();
                        self.state = UriStem;
                    } else if !is_token_char(c) {
                        return (i, ParseStatus::Invalid);
                    } else if self.method.len() >= METHOD_MAX {
                        return (i, self.over_limit(self.method.len() + 1, METHOD_MAX));
                    } else {
                        self.method.push(c);
                    }
                }

                UriStem => {
                    if c == b' ' {
                        request.set_resource(take_string(&mut self.resource));
                        self.state = HttpVerH;
                    } else if c == b'?' {
                        request.set_resource(take_string(&mut self.resource));
                        self.query_string.clear();
                        self.state = UriQuery;
                    } else if is_control(c) {
                        return (i, ParseStatus::Invalid);
                    } else if self.resource.len() >= RESOURCE_MAX {
                        return (i, self.over_limit(self.resource.len() + 1, RESOURCE_MAX));
                    } else {
                        self.resource.push(c);
                    }
                }

                UriQuery => {
                    if c == b' ' {
                        request.set_query_string(take_string(&mut self.query_string));
                        self.state = HttpVerH;
                    } else if is_control(c) {
                        return (i, ParseStatus::Invalid);
                    } else if self.query_string.len() >= QUERY_STRING_MAX {
                        return (i, self.over_limit(self.query_string.len() + 1, QUERY_STRING_MAX));
                    } else {
                        self.query_string.push(c);
                    }
                }

                HttpVerH => {
                    if c != b'H' {
                        return (i, ParseStatus::Invalid);
                    }
                    self.state = HttpVerT1;
                }

                HttpVerT1 => {
                    if c != b'T' {
                        return (i, ParseStatus::Invalid);
                    }
                    self.state = HttpVerT2;
                }

                HttpVerT2 => {
                    if c != b'T' {
                        return (i, ParseStatus::Invalid);
                    }
                    self.state = HttpVerP;
                }

                HttpVerP => {
                    if c != b'P' {
                        return (i, ParseStatus::Invalid);
                    }
                    self.state = HttpVerSlash;
                }

                HttpVerSlash => {
                    if c != b'/' {
                        return (i, ParseStatus::Invalid);
                    }
                    self.state = MajorStart;
                }

                MajorStart => {
                    if !is_digit(c) {
                        return (i, ParseStatus::Invalid);
                    }
                    request.parts_mut().set_version_major(u32::from(c - b'0'));
                    self.state = Major;
                }

                Major => {
                    if c == b'.' {
                        self.state = MinorStart;
                    } else if is_digit(c) {
                        // saturate instead of overflowing on absurd digit runs
                        let major = request.version_major();
                        request
                            .parts_mut()
                            .set_version_major(major.saturating_mul(10).saturating_add(u32::from(c - b'0')));
                    } else {
                        return (i, ParseStatus::Invalid);
                    }
                }

                MinorStart => {
                    if !is_digit(c) {
                        return (i, ParseStatus::Invalid);
                    }
                    request.parts_mut().set_version_minor(u32::from(c - b'0'));
                    self.state = Minor;
                }

                Minor => {
                    if c == b'\r' {
                        self.state = ExpectingNewline;
                    } else if c == b'\n' {
                        self.state = ExpectingCr;
                    } else if is_digit(c) {
                        let minor = request.version_minor();
                        request
                            .parts_mut()
                            .set_version_minor(minor.saturating_mul(10).saturating_add(u32::from(c - b'0')));
                    } else {
                        return (i, ParseStatus::Invalid);
                    }
                }

                ExpectingNewline => {
                    // a CR was just read
                    if c == b'\n' {
                        self.state = HeaderStart;
                    } else if c == b'\r' {
                        // two CRs in a row: CR alone is (incorrectly) being
                        // used for line termination, so the request is done
                        return (i + 1, ParseStatus::Complete);
                    } else if c == b'\t' || c == b' ' {
                        self.state = HeaderWhitespace;
                    } else if !is_token_char(c) {
                        return (i, ParseStatus::Invalid);
                    } else {
                        self.header_name.clear();
                        self.header_name.push(c);
                        self.state = HeaderName;
                    }
                }

                ExpectingCr => {
                    // an LF was read without a preceding CR
                    if c == b'\r' {
                        self.state = HeaderStart;
                    } else if c == b'\n' {
                        // two LFs in a row terminate the request
                        return (i + 1, ParseStatus::Complete);
                    } else if c == b'\t' || c == b' ' {
                        self.state = HeaderWhitespace;
                    } else if !is_token_char(c) {
                        return (i, ParseStatus::Invalid);
                    } else {
                        self.header_name.clear();
                        self.header_name.push(c);
                        self.state = HeaderName;
                    }
                }

                HeaderWhitespace => {
                    if c == b'\r' {
                        self.state = ExpectingNewline;
                    } else if c == b'\n' {
                        self.state = ExpectingCr;
                    } else if c != b'\t' && c != b' ' {
                        if !is_token_char(c) {
                            return (i, ParseStatus::Invalid);
                        }
                        self.header_name.clear();
                        self.header_name.push(c);
                        self.state = HeaderName;
                    }
                }

                HeaderStart => {
                    if c == b'\r' {
                        self.state = ExpectingFinalNewline;
                    } else if c == b'\n' {
                        self.state = ExpectingFinalCr;
                    } else if c == b'\t' || c == b' ' {
                        self.state = HeaderWhitespace;
                    } else if !is_token_char(c) {
                        return (i, ParseStatus::Invalid);
                    } else {
                        self.header_name.clear();
                        self.header_name.push(c);
                        self.state = HeaderName;
                    }
                }

                HeaderName => {
                    if c == b':' {
                        self.header_value.clear();
                        self.state = SpaceBeforeHeaderValue;
                    } else if !is_token_char(c) {
                        return (i, ParseStatus::Invalid);
                    } else if self.header_name.len() >= HEADER_NAME_MAX {
                        return (i, self.over_limit(self.header_name.len() + 1, HEADER_NAME_MAX));
                    } else {
                        self.header_name.push(c);
                    }
                }

                SpaceBeforeHeaderValue => {
                    if c == b' ' {
                        self.state = HeaderValue;
                    } else if c == b'\r' {
                        self.commit_header(request);
                        self.state = ExpectingNewline;
                    } else if c == b'\n' {
                        self.commit_header(request);
                        self.state = ExpectingCr;
                    } else if !is_char(c) || is_control(c) || is_special(c) {
                        return (i, ParseStatus::Invalid);
                    } else {
                        self.header_value.push(c);
                        self.state = HeaderValue;
                    }
                }

                HeaderValue => {
                    if c == b'\r' {
                        self.commit_header(request);
                        self.state = ExpectingNewline;
                    } else if c == b'\n' {
                        self.commit_header(request);
                        self.state = ExpectingCr;
                    } else if is_control(c) {
                        return (i, ParseStatus::Invalid);
                    } else if self.header_value.len() >= HEADER_VALUE_MAX {
                        return (i, self.over_limit(self.header_value.len() + 1, HEADER_VALUE_MAX));
                    } else {
                        self.header_value.push(c);
                    }
                }

                ExpectingFinalNewline => {
                    if c == b'\n' {
                        return (i + 1, ParseStatus::Complete);
                    }
                    return (i, ParseStatus::Complete);
                }

                ExpectingFinalCr => {
                    if c == b'\r' {
                        return (i + 1, ParseStatus::Complete);
                    }
                    return (i, ParseStatus::Complete);
                }
            }

            i += 1;
        }

        (i, ParseStatus::Incomplete)
    }

    fn commit_header(&mut self, request: &mut Request) {
        let name = take_string(&mut self.header_name);
        let value = take_string(&mut self.header_value);
        request.parts_mut().add_header(name, value);
    }
}

/// Drains an accumulator into an owned string, replacing any non-UTF-8
/// bytes (bytes above 127 are allowed in URIs and header values).
fn take_string(buf: &mut Vec<u8>) -> String {
    let s = String::from_utf8_lossy(buf).into_owned();
    buf.clear();
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &[u8]) -> (Request, usize, ParseStatus) {
        let mut parser = RequestParser::new();
        let mut request = Request::new();
        let (consumed, status) = parser.parse(&mut request, input);
        (request, consumed, status)
    }

    #[test]
    fn minimal_get() {
        let (request, consumed, status) = parse_all(b"GET / HTTP/1.0\r\n\r\n");
        assert_eq!(status, ParseStatus::Complete);
        assert_eq!(consumed, 18);
        assert_eq!(request.method(), "GET");
        assert_eq!(request.resource(), "/");
        assert_eq!(request.version_major(), 1);
        assert_eq!(request.version_minor(), 0);
        assert!(!request.check_keep_alive());
    }

    #[test]
    fn full_get_with_query_and_headers() {
        let input = b"GET /a/b?x=1&y=two HTTP/1.1\r\nHost: h\r\nCookie: A=1; B=\"two\"\r\n\r\n";
        let (request, consumed, status) = parse_all(input);
        assert_eq!(status, ParseStatus::Complete);
        assert_eq!(consumed, input.len());
        assert_eq!(request.method(), "GET");
        assert_eq!(request.resource(), "/a/b");
        assert_eq!(request.query_string(), "x=1&y=two");
        assert_eq!(request.get_header("Host"), "h");
        assert_eq!(request.get_header("Cookie"), "A=1; B=\"two\"");
        assert!(request.check_keep_alive());
    }

    #[test]
    fn one_byte_at_a_time_matches_single_call() {
        let input = b"GET /a/b?x=1&y=two HTTP/1.1\r\nHost: h\r\nCookie: A=1; B=\"two\"\r\n\r\n";

        let mut parser = RequestParser::new();
        let mut request = Request::new();
        let mut status = ParseStatus::Incomplete;
        let mut total = 0;
        for &byte in input.iter() {
            let (consumed, s) = parser.parse(&mut request, &[byte]);
            total += consumed;
            status = s;
            if s != ParseStatus::Incomplete {
                break;
            }
        }

        assert_eq!(status, ParseStatus::Complete);
        assert_eq!(total, input.len());
        assert_eq!(request.method(), "GET");
        assert_eq!(request.resource(), "/a/b");
        assert_eq!(request.query_string(), "x=1&y=two");
        assert_eq!(request.get_header("Host"), "h");
    }

    #[test]
    fn every_split_point_matches_single_call() {
        let input: &[u8] = b"POST /p?k=v HTTP/1.1\r\nHost: h\r\nContent-Length: 7\r\n\r\n";
        for split in 0..input.len() {
            let mut parser = RequestParser::new();
            let mut request = Request::new();
            let (first, status) = parser.parse(&mut request, &input[..split]);
            assert_eq!(status, ParseStatus::Incomplete, "split at {split}");
            assert_eq!(first, split);
            let (second, status) = parser.parse(&mut request, &input[split..]);
            assert_eq!(status, ParseStatus::Complete, "split at {split}");
            assert_eq!(first + second, input.len());
            assert_eq!(request.method(), "POST");
            assert_eq!(request.query_string(), "k=v");
            assert_eq!(request.get_header("Content-Length"), "7");
        }
    }

    #[test]
    fn bare_lf_terminators() {
        let (request, _, status) = parse_all(b"GET / HTTP/1.1\nHost: h\n\n");
        assert_eq!(status, ParseStatus::Complete);
        assert_eq!(request.method(), "GET");
        assert_eq!(request.resource(), "/");
        assert_eq!(request.get_header("Host"), "h");
        assert!(request.check_keep_alive());
    }

    #[test]
    fn from_curl_style_literal() {
        use indoc::indoc;

        // indoc strips the margin and leaves bare-LF line endings, which
        // the parser accepts in quirk mode
        let str = indoc! {r##"
        GET /index.html HTTP/1.1
        Host: 127.0.0.1:8080
        User-Agent: curl/7.79.1
        Accept: */*

        "##};

        let (request, _, status) = parse_all(str.as_bytes());
        assert_eq!(status, ParseStatus::Complete);
        assert_eq!(request.method(), "GET");
        assert_eq!(request.resource(), "/index.html");
        assert_eq!(request.get_header("Host"), "127.0.0.1:8080");
        assert_eq!(request.get_header("User-Agent"), "curl/7.79.1");
        assert_eq!(request.get_header("Accept"), "*/*");
        assert_eq!(request.headers().len(), 3);
    }

    #[test]
    fn bare_cr_terminators() {
        let (request, _, status) = parse_all(b"GET / HTTP/1.1\rHost: h\r\r");
        assert_eq!(status, ParseStatus::Complete);
        assert_eq!(request.get_header("Host"), "h");
    }

    #[test]
    fn mixed_terminators() {
        let (request, _, status) = parse_all(b"GET / HTTP/1.1\r\nHost: h\nAccept: */*\r\n\r\n");
        assert_eq!(status, ParseStatus::Complete);
        assert_eq!(request.get_header("Host"), "h");
        assert_eq!(request.get_header("Accept"), "*/*");
    }

    #[test]
    fn over_limit_method_is_invalid() {
        let mut input = vec![b'A'; METHOD_MAX + 1];
        input.push(b' ');
        let mut parser = RequestParser::new();
        let mut request = Request::new();
        let (_, status) = parser.parse(&mut request, &input);
        assert_eq!(status, ParseStatus::Invalid);
        assert_eq!(parser.limit_exceeded(), Some((METHOD_MAX + 1, METHOD_MAX)));
    }

    #[test]
    fn method_at_limit_is_accepted() {
        let mut input = vec![b'A'; METHOD_MAX];
        input.extend_from_slice(b" / HTTP/1.1\r\n\r\n");
        let (request, _, status) = parse_all(&input);
        assert_eq!(status, ParseStatus::Complete);
        assert_eq!(request.method().len(), METHOD_MAX);
    }

    #[test]
    fn bad_method_char_is_invalid() {
        let (_, consumed, status) = parse_all(b"GE(T / HTTP/1.1\r\n\r\n");
        assert_eq!(status, ParseStatus::Invalid);
        assert_eq!(consumed, 2);
    }

    #[test]
    fn bad_version_literal_is_invalid() {
        let (_, _, status) = parse_all(b"GET / HTXP/1.1\r\n\r\n");
        assert_eq!(status, ParseStatus::Invalid);
    }

    #[test]
    fn control_byte_in_uri_is_invalid() {
        let (_, _, status) = parse_all(b"GET /a\x01b HTTP/1.1\r\n\r\n");
        assert_eq!(status, ParseStatus::Invalid);
    }

    #[test]
    fn duplicate_headers_are_preserved_in_order() {
        let input = b"GET / HTTP/1.1\r\nX-Tag: one\r\nHost: h\r\nX-Tag: two\r\nX-Tag: three\r\n\r\n";
        let (request, _, status) = parse_all(input);
        assert_eq!(status, ParseStatus::Complete);
        assert_eq!(request.headers().count("X-Tag"), 3);
        let values: Vec<_> = request.headers().get_all("X-Tag").collect();
        assert_eq!(values, vec!["one", "two", "three"]);
    }

    #[test]
    fn empty_header_value_is_kept() {
        let (request, _, status) = parse_all(b"GET / HTTP/1.1\r\nX-Empty:\r\nHost: h\r\n\r\n");
        assert_eq!(status, ParseStatus::Complete);
        assert!(request.has_header("X-Empty"));
        assert_eq!(request.get_header("X-Empty"), "");
    }

    #[test]
    fn header_value_without_space_after_colon() {
        let (request, _, status) = parse_all(b"GET / HTTP/1.1\r\nHost:h\r\n\r\n");
        assert_eq!(status, ParseStatus::Complete);
        assert_eq!(request.get_header("Host"), "h");
    }

    #[test]
    fn leading_whitespace_before_method_is_skipped() {
        let (request, _, status) = parse_all(b"\r\n  GET / HTTP/1.1\r\n\r\n");
        assert_eq!(status, ParseStatus::Complete);
        assert_eq!(request.method(), "GET");
    }

    #[test]
    fn multi_digit_version_numbers() {
        let (request, _, status) = parse_all(b"GET / HTTP/12.10\r\n\r\n");
        assert_eq!(status, ParseStatus::Complete);
        assert_eq!(request.version_major(), 12);
        assert_eq!(request.version_minor(), 10);
    }

    #[test]
    fn oversized_version_numbers_saturate() {
        let (request, _, status) = parse_all(b"GET / HTTP/9999999999.99999999990\r\n\r\n");
        assert_eq!(status, ParseStatus::Complete);
        assert_eq!(request.version_major(), u32::MAX);
        assert_eq!(request.version_minor(), u32::MAX);
    }

    #[test]
    fn leftover_body_bytes_are_not_consumed() {
        let input = b"POST /p HTTP/1.1\r\nContent-Length: 7\r\n\r\nq=hello";
        let (request, consumed, status) = parse_all(input);
        assert_eq!(status, ParseStatus::Complete);
        assert_eq!(consumed, input.len() - 7);
        assert_eq!(request.get_header("Content-Length"), "7");
    }

    #[test]
    fn parse_never_reads_past_the_buffer() {
        // incomplete request: every byte consumed, none beyond
        let input = b"GET / HTT";
        let mut parser = RequestParser::new();
        let mut request = Request::new();
        let (consumed, status) = parser.parse(&mut request, input);
        assert_eq!(status, ParseStatus::Incomplete);
        assert_eq!(consumed, input.len());
    }
}
