//! The outgoing HTTP response and its wire serialization.
//!
//! A response accumulates body bytes through [`Response::write`] and
//! [`Response::write_no_copy`], then [`Response::send`] serializes the
//! status line, headers and body into a gathered buffer sequence and
//! issues a single write on the connection. Exactly one of
//! `Content-Length` or a chunked `Transfer-Encoding` is emitted.

use std::fmt::Write as _;
use std::time::SystemTime;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::connection::TcpConnection;

use super::{
    MessageParts, Request, SendError, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, SET_COOKIE,
    TRANSFER_ENCODING,
};

const INIT_HEAD_SIZE: usize = 4 * 1024;

/// An outgoing cookie, rendered as one `Set-Cookie` header on send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetCookie {
    name: String,
    value: String,
    path: Option<String>,
    domain: Option<String>,
    max_age: Option<u64>,
}

impl SetCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into(), ..Default::default() }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Lifetime of the cookie in seconds; zero tells the client to discard it.
    pub fn max_age(mut self, seconds: u64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    /// Renders the RFC 2109 `Set-Cookie` header value.
    fn to_header_value(&self) -> String {
        let mut header = format!("{}=\"{}\"; Version=\"1\"", self.name, self.value);
        if let Some(path) = &self.path {
            let _ = write!(header, "; Path=\"{path}\"");
        }
        if let Some(domain) = &self.domain {
            let _ = write!(header, "; Domain=\"{domain}\"");
        }
        if let Some(max_age) = self.max_age {
            let _ = write!(header, "; Max-Age=\"{max_age}\"");
        }
        header
    }
}

/// An outgoing HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    parts: MessageParts,
    status_code: u32,
    status_message: String,
    cookies: Vec<SetCookie>,
    /// Accumulates copied body bytes until the next no-copy write or send.
    pending: BytesMut,
    buffers: Vec<Bytes>,
    body_length: usize,
}

impl Default for Response {
    fn default() -> Self {
        let mut parts = MessageParts::new();
        parts.set_version_major(1);
        parts.set_version_minor(1);
        parts.change_header(CONTENT_TYPE, "text/html");
        Self {
            parts,
            status_code: 200,
            status_message: "OK".to_owned(),
            cookies: Vec::new(),
            pending: BytesMut::new(),
            buffers: Vec::new(),
            body_length: 0,
        }
    }
}

impl Response {
    pub fn new() -> Self {
        Default::default()
    }

    /// Creates a response matching the request's HTTP version and chunk
    /// support.
    ///
    /// A request whose version never parsed (0.0) gets the default 1.1
    /// status line.
    pub fn for_request(request: &Request) -> Self {
        let mut response = Self::new();
        if request.version_major() >= 1 {
            response.parts.set_version_major(request.version_major());
            response.parts.set_version_minor(request.version_minor());
        }
        response.parts.set_chunks_supported(request.parts().chunks_supported());
        response
    }

    pub fn parts(&self) -> &MessageParts {
        &self.parts
    }

    pub fn parts_mut(&mut self) -> &mut MessageParts {
        &mut self.parts
    }

    pub fn status_code(&self) -> u32 {
        self.status_code
    }

    /// Sets the status code; codes below 100 are not valid HTTP.
    pub fn set_status_code(&mut self, code: u32) {
        debug_assert!(code >= 100, "HTTP status codes start at 100");
        self.status_code = code;
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn set_status_message(&mut self, message: impl Into<String>) {
        self.status_message = message.into();
    }

    pub fn set_content_type(&mut self, content_type: impl Into<String>) {
        self.parts.change_header(CONTENT_TYPE, content_type);
    }

    /// Emits a `Last-Modified` header for the given time.
    pub fn set_last_modified(&mut self, time: SystemTime) {
        self.parts.change_header("Last-Modified", httpdate::fmt_http_date(time));
    }

    pub fn add_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.parts.add_header(key, value);
    }

    pub fn change_header(&mut self, key: &str, value: impl Into<String>) {
        self.parts.change_header(key, value);
    }

    /// Queues a session cookie with just a name and a value.
    pub fn set_cookie(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.add_cookie(SetCookie::new(name, value));
    }

    /// Queues a fully-specified cookie.
    pub fn add_cookie(&mut self, cookie: SetCookie) {
        self.cookies.push(cookie);
    }

    /// Tells the client to discard the named cookie.
    pub fn delete_cookie(&mut self, name: impl Into<String>) {
        self.add_cookie(SetCookie::new(name, "").path("/").max_age(0));
    }

    /// Switches the response to chunked transfer encoding.
    ///
    /// Chunked framing is only used when the peer supports it (HTTP/1.1);
    /// otherwise the body falls back to a plain `Content-Length` send.
    pub fn set_chunked(&mut self, chunked: bool) {
        self.parts.set_chunked(chunked);
    }

    /// Returns the number of body bytes written so far.
    pub fn body_length(&self) -> usize {
        self.body_length
    }

    /// Appends body content, copying it into the response.
    pub fn write(&mut self, data: impl AsRef<[u8]>) {
        let data = data.as_ref();
        if !data.is_empty() {
            self.pending.extend_from_slice(data);
            self.body_length += data.len();
        }
    }

    /// Appends body content without copying.
    pub fn write_no_copy(&mut self, data: Bytes) {
        if !data.is_empty() {
            self.flush_pending();
            self.body_length += data.len();
            self.buffers.push(data);
        }
    }

    /// Appends static body content without copying.
    pub fn write_static(&mut self, data: &'static str) {
        self.write_no_copy(Bytes::from_static(data.as_bytes()));
    }

    fn flush_pending(&mut self) {
        if !self.pending.is_empty() {
            let pending = std::mem::take(&mut self.pending);
            self.buffers.push(pending.freeze());
        }
    }

    /// Sends the response over the connection.
    ///
    /// The `Connection` header follows the connection's lifecycle mode,
    /// which the read pipeline derived from the request. The whole message
    /// is issued as one gathered write.
    pub async fn send(&mut self, conn: &mut TcpConnection) -> Result<(), SendError> {
        let keep_alive = conn.keep_alive();
        let buffers = self.prepare_send(keep_alive);
        let total: usize = buffers.iter().map(|b| b.len()).sum();
        conn.write_buffers(&buffers).await.map_err(SendError::io)?;
        debug!(bytes = total, keep_alive, "sent HTTP response");
        Ok(())
    }

    /// Builds the gathered write sequence for the whole response.
    fn prepare_send(&mut self, keep_alive: bool) -> Vec<Bytes> {
        self.flush_pending();
        let using_chunks = self.parts.is_chunked() && self.parts.chunks_supported();

        self.parts.change_header(CONNECTION, if keep_alive { "Keep-Alive" } else { "close" });
        self.parts.change_header("Date", httpdate::fmt_http_date(SystemTime::now()));
        if using_chunks {
            self.parts.change_header(TRANSFER_ENCODING, "chunked");
            self.parts.delete_header(CONTENT_LENGTH);
        } else {
            self.parts.change_header(CONTENT_LENGTH, self.body_length.to_string());
            self.parts.delete_header(TRANSFER_ENCODING);
        }
        let cookies = std::mem::take(&mut self.cookies);
        for cookie in &cookies {
            self.parts.add_header(SET_COOKIE, cookie.to_header_value());
        }

        let mut head = BytesMut::with_capacity(INIT_HEAD_SIZE);
        let _ = write!(
            helper::Writer(&mut head),
            "HTTP/{}.{} {} {}\r\n",
            self.parts.version_major(),
            self.parts.version_minor(),
            self.status_code,
            self.status_message
        );
        for (name, value) in self.parts.headers().iter() {
            head.put_slice(name.as_bytes());
            head.put_slice(b": ");
            head.put_slice(value.as_bytes());
            head.put_slice(b"\r\n");
        }
        head.put_slice(b"\r\n");

        let mut write_buffers = Vec::with_capacity(self.buffers.len() + 2);
        write_buffers.push(head.freeze());

        if using_chunks {
            for buffer in &self.buffers {
                let mut framing = BytesMut::new();
                let _ = write!(helper::Writer(&mut framing), "{:x}\r\n", buffer.len());
                write_buffers.push(framing.freeze());
                write_buffers.push(buffer.clone());
                write_buffers.push(Bytes::from_static(b"\r\n"));
            }
            write_buffers.push(Bytes::from_static(b"0\r\n\r\n"));
        } else {
            write_buffers.extend(self.buffers.iter().cloned());
        }

        write_buffers
    }
}

mod helper {
    use bytes::{BufMut, BytesMut};
    use std::fmt;

    pub struct Writer<'a>(pub &'a mut BytesMut);

    impl fmt::Write for Writer<'_> {
        fn write_str(&mut self, s: &str) -> fmt::Result {
            self.0.put_slice(s.as_bytes());
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flatten(buffers: &[Bytes]) -> Vec<u8> {
        let mut out = Vec::new();
        for buffer in buffers {
            out.extend_from_slice(buffer);
        }
        out
    }

    fn head_of(bytes: &[u8]) -> String {
        let text = String::from_utf8_lossy(bytes);
        let end = text.find("\r\n\r\n").expect("missing end of headers");
        text[..end + 4].to_string()
    }

    #[test]
    fn emits_content_length_and_body() {
        let mut response = Response::new();
        response.write(b"hello");
        let buffers = response.prepare_send(false);
        let bytes = flatten(&buffers);
        let head = head_of(&bytes);

        assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(head.contains("Content-Length: 5\r\n"));
        assert!(head.contains("Connection: close\r\n"));
        assert!(head.contains("Date: "));
        assert!(!head.contains("Transfer-Encoding"));
        assert!(bytes.ends_with(b"\r\n\r\nhello"));
    }

    #[test]
    fn keep_alive_header_follows_flag() {
        let mut response = Response::new();
        let buffers = response.prepare_send(true);
        let head = head_of(&flatten(&buffers));
        assert!(head.contains("Connection: Keep-Alive\r\n"));
        assert!(head.contains("Content-Length: 0\r\n"));
    }

    #[test]
    fn chunked_send_frames_each_buffer() {
        let mut response = Response::new();
        response.set_chunked(true);
        response.parts_mut().set_chunks_supported(true);
        response.write_no_copy(Bytes::from_static(b"hello"));
        response.write_no_copy(Bytes::from_static(b" world"));

        let buffers = response.prepare_send(true);
        let bytes = flatten(&buffers);
        let head = head_of(&bytes);

        assert!(head.contains("Transfer-Encoding: chunked\r\n"));
        assert!(!head.contains("Content-Length"));
        let body = &bytes[head.len()..];
        assert_eq!(body, b"5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n");
    }

    #[test]
    fn chunked_without_support_falls_back_to_length() {
        let mut response = Response::new();
        response.set_chunked(true);
        response.write(b"data");
        let buffers = response.prepare_send(false);
        let head = head_of(&flatten(&buffers));
        assert!(head.contains("Content-Length: 4\r\n"));
        assert!(!head.contains("Transfer-Encoding"));
    }

    #[test]
    fn cookies_become_set_cookie_headers() {
        let mut response = Response::new();
        response.set_cookie("session", "abc123");
        response.add_cookie(SetCookie::new("theme", "dark").path("/app").domain("example.com").max_age(3600));
        let buffers = response.prepare_send(false);
        let head = head_of(&flatten(&buffers));

        assert!(head.contains("Set-Cookie: session=\"abc123\"; Version=\"1\"\r\n"));
        assert!(head.contains(
            "Set-Cookie: theme=\"dark\"; Version=\"1\"; Path=\"/app\"; Domain=\"example.com\"; Max-Age=\"3600\"\r\n"
        ));
    }

    #[test]
    fn delete_cookie_expires_immediately() {
        let mut response = Response::new();
        response.delete_cookie("session");
        let buffers = response.prepare_send(false);
        let head = head_of(&flatten(&buffers));
        assert!(head.contains("Set-Cookie: session=\"\"; Version=\"1\"; Path=\"/\"; Max-Age=\"0\"\r\n"));
    }

    #[test]
    fn last_modified_header_is_formatted() {
        let mut response = Response::new();
        response.set_last_modified(std::time::UNIX_EPOCH);
        let buffers = response.prepare_send(false);
        let head = head_of(&flatten(&buffers));
        assert!(head.contains("Last-Modified: Thu, 01 Jan 1970 00:00:00 GMT\r\n"));
    }

    #[test]
    fn status_line_uses_message_and_version() {
        let mut response = Response::new();
        response.set_status_code(404);
        response.set_status_message("Not Found");
        response.parts_mut().set_version_major(1);
        response.parts_mut().set_version_minor(0);
        let buffers = response.prepare_send(false);
        let head = head_of(&flatten(&buffers));
        assert!(head.starts_with("HTTP/1.0 404 Not Found\r\n"));
    }

    #[test]
    fn mixed_copy_and_no_copy_writes_preserve_order() {
        let mut response = Response::new();
        response.write(b"one ");
        response.write_static("two ");
        response.write(b"three");
        let buffers = response.prepare_send(false);
        let bytes = flatten(&buffers);
        assert!(bytes.ends_with(b"one two three"));
        assert_eq!(response.body_length(), 13);
    }
}
