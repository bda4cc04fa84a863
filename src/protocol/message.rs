//! The shared container embedded in both requests and responses.
//!
//! `MessageParts` owns everything the two message kinds have in common:
//! the headers multimap, the HTTP version, the content buffer, the chunk
//! cache and the remote address. `Request` and `Response` embed it rather
//! than inheriting from it, and re-export the operations they need.

use std::net::{IpAddr, Ipv4Addr};

use bytes::{Bytes, BytesMut};

/// The `Connection` header name.
pub const CONNECTION: &str = "Connection";
/// The `Content-Length` header name.
pub const CONTENT_LENGTH: &str = "Content-Length";
/// The `Content-Type` header name.
pub const CONTENT_TYPE: &str = "Content-Type";
/// The `Cookie` header name.
pub const COOKIE: &str = "Cookie";
/// The `Set-Cookie` header name.
pub const SET_COOKIE: &str = "Set-Cookie";
/// The `Transfer-Encoding` header name.
pub const TRANSFER_ENCODING: &str = "Transfer-Encoding";
/// The form content type that triggers body parameter parsing.
pub const CONTENT_TYPE_URLENCODED: &str = "application/x-www-form-urlencoded";

use super::Headers;

/// Fields common to HTTP requests and responses.
#[derive(Debug, Clone)]
pub struct MessageParts {
    is_valid: bool,
    chunks_supported: bool,
    remote_ip: IpAddr,
    version_major: u32,
    version_minor: u32,
    content_length: usize,
    is_chunked: bool,
    content: Option<BytesMut>,
    chunk_buffers: Vec<Bytes>,
    headers: Headers,
}

impl Default for MessageParts {
    fn default() -> Self {
        Self {
            is_valid: false,
            chunks_supported: false,
            remote_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            version_major: 0,
            version_minor: 0,
            content_length: 0,
            is_chunked: false,
            content: None,
            chunk_buffers: Vec::new(),
            headers: Headers::new(),
        }
    }
}

impl MessageParts {
    pub fn new() -> Self {
        Default::default()
    }

    /// Clears all message data back to the freshly-constructed state.
    pub fn clear(&mut self) {
        *self = Default::default();
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn set_valid(&mut self, valid: bool) {
        self.is_valid = valid;
    }

    pub fn chunks_supported(&self) -> bool {
        self.chunks_supported
    }

    pub fn set_chunks_supported(&mut self, supported: bool) {
        self.chunks_supported = supported;
    }

    pub fn remote_ip(&self) -> IpAddr {
        self.remote_ip
    }

    pub fn set_remote_ip(&mut self, ip: IpAddr) {
        self.remote_ip = ip;
    }

    pub fn version_major(&self) -> u32 {
        self.version_major
    }

    pub fn set_version_major(&mut self, major: u32) {
        self.version_major = major;
    }

    pub fn version_minor(&self) -> u32 {
        self.version_minor
    }

    pub fn set_version_minor(&mut self, minor: u32) {
        self.version_minor = minor;
    }

    pub fn content_length(&self) -> usize {
        self.content_length
    }

    pub fn set_content_length(&mut self, length: usize) {
        self.content_length = length;
    }

    pub fn is_chunked(&self) -> bool {
        self.is_chunked
    }

    pub fn set_chunked(&mut self, chunked: bool) {
        self.is_chunked = chunked;
    }

    /// Returns the payload content, or an empty slice if none was created.
    pub fn content(&self) -> &[u8] {
        match &self.content {
            Some(buffer) => &buffer[..self.content_length],
            None => &[],
        }
    }

    /// Returns a mutable view of the payload content.
    ///
    /// The view covers exactly `content_length` bytes; the terminating zero
    /// byte is not exposed.
    pub fn content_mut(&mut self) -> &mut [u8] {
        match &mut self.content {
            Some(buffer) => &mut buffer[..self.content_length],
            None => &mut [],
        }
    }

    /// Allocates a zero-filled content buffer of `content_length + 1` bytes.
    ///
    /// The final byte stays zero, terminating the payload.
    pub fn create_content_buffer(&mut self) -> &mut [u8] {
        self.content = Some(BytesMut::zeroed(self.content_length + 1));
        self.content_mut()
    }

    /// Appends a chunk buffer to the chunk cache.
    pub fn add_chunk(&mut self, chunk: Bytes) {
        self.chunk_buffers.push(chunk);
    }

    pub fn chunk_buffers(&self) -> &[Bytes] {
        &self.chunk_buffers
    }

    /// Pieces all cached chunks together into the content buffer.
    pub fn concatenate_chunks(&mut self) {
        self.content_length = self.chunk_buffers.iter().map(|c| c.len()).sum();
        let chunks = std::mem::take(&mut self.chunk_buffers);
        let buffer = self.create_content_buffer();
        let mut offset = 0;
        for chunk in &chunks {
            buffer[offset..offset + chunk.len()].copy_from_slice(chunk);
            offset += chunk.len();
        }
        self.chunk_buffers = chunks;
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Returns true if at least one value for the header is defined.
    pub fn has_header(&self, key: &str) -> bool {
        self.headers.contains(key)
    }

    /// Returns the first value for the header, or an empty string.
    pub fn get_header(&self, key: &str) -> &str {
        self.headers.get_value(key)
    }

    /// Appends a value for the header, keeping existing entries.
    pub fn add_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.headers.add_value(key, value);
    }

    /// Replaces all values for the header with a single one.
    pub fn change_header(&mut self, key: &str, value: impl Into<String>) {
        self.headers.change_value(key, value);
    }

    /// Removes all values for the header.
    pub fn delete_header(&mut self, key: &str) {
        self.headers.delete_value(key);
    }

    /// Sets the content length from the `Content-Length` header.
    ///
    /// An absent or empty header yields zero; trailing garbage after the
    /// leading digits is ignored.
    pub fn update_content_length_from_header(&mut self) {
        let value = self.headers.get_value(CONTENT_LENGTH).trim();
        let digits: &str = &value[..value.bytes().take_while(|b| b.is_ascii_digit()).count()];
        self.content_length = digits.parse().unwrap_or(0);
    }

    /// Sets the chunked flag from the `Transfer-Encoding` header.
    ///
    /// Transfer coding values are case-insensitive; any value other than
    /// `chunked` is ignored.
    pub fn update_transfer_coding_from_header(&mut self) {
        self.is_chunked = false;
        if self.headers.contains(TRANSFER_ENCODING) {
            let value = self.headers.get_value(TRANSFER_ENCODING);
            if value.eq_ignore_ascii_case("chunked") {
                self.is_chunked = true;
            }
        }
    }

    /// Returns true if the connection carrying this message may be reused.
    ///
    /// Keep-alive holds when the `Connection` header is not `close` and
    /// either the version is at least 1.1 or the header explicitly requests
    /// `keep-alive` (the HTTP/1.0 extension).
    pub fn check_keep_alive(&self) -> bool {
        let connection = self.headers.get_value(CONNECTION);
        if connection.eq_ignore_ascii_case("close") {
            return false;
        }
        if self.version_major > 1 || (self.version_major == 1 && self.version_minor >= 1) {
            return true;
        }
        connection.eq_ignore_ascii_case("keep-alive")
    }
}
