//! The parsed HTTP request handed to modules.

use std::net::IpAddr;

use super::{Dictionary, Headers, MessageParts};

/// An incoming HTTP request.
///
/// A request is filled in by the incremental parser and the read pipeline;
/// modules receive it read-only. On top of the shared [`MessageParts`] it
/// carries the method token, the URI stem, the raw query string and the
/// decoded query and cookie parameter multimaps.
#[derive(Debug, Clone, Default)]
pub struct Request {
    parts: MessageParts,
    method: String,
    resource: String,
    query_string: String,
    query_params: Dictionary,
    cookie_params: Dictionary,
}

impl Request {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn parts(&self) -> &MessageParts {
        &self.parts
    }

    pub fn parts_mut(&mut self) -> &mut MessageParts {
        &mut self.parts
    }

    /// The HTTP method token, exactly as received.
    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn set_method(&mut self, method: impl Into<String>) {
        self.method = method.into();
    }

    /// The URI stem, without the query string.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn set_resource(&mut self, resource: impl Into<String>) {
        self.resource = resource.into();
    }

    /// The raw query string, still percent-encoded.
    pub fn query_string(&self) -> &str {
        &self.query_string
    }

    pub fn set_query_string(&mut self, query_string: impl Into<String>) {
        self.query_string = query_string.into();
    }

    /// Decoded query parameters from the URI and any url-encoded body.
    pub fn query_params(&self) -> &Dictionary {
        &self.query_params
    }

    pub fn query_params_mut(&mut self) -> &mut Dictionary {
        &mut self.query_params
    }

    /// Cookie parameters; cookie names are lowercased.
    pub fn cookie_params(&self) -> &Dictionary {
        &self.cookie_params
    }

    pub fn cookie_params_mut(&mut self) -> &mut Dictionary {
        &mut self.cookie_params
    }

    pub fn is_valid(&self) -> bool {
        self.parts.is_valid()
    }

    pub fn set_valid(&mut self, valid: bool) {
        self.parts.set_valid(valid);
    }

    pub fn version_major(&self) -> u32 {
        self.parts.version_major()
    }

    pub fn version_minor(&self) -> u32 {
        self.parts.version_minor()
    }

    pub fn remote_ip(&self) -> IpAddr {
        self.parts.remote_ip()
    }

    pub fn headers(&self) -> &Headers {
        self.parts.headers()
    }

    pub fn has_header(&self, key: &str) -> bool {
        self.parts.has_header(key)
    }

    pub fn get_header(&self, key: &str) -> &str {
        self.parts.get_header(key)
    }

    pub fn content(&self) -> &[u8] {
        self.parts.content()
    }

    pub fn content_length(&self) -> usize {
        self.parts.content_length()
    }

    pub fn check_keep_alive(&self) -> bool {
        self.parts.check_keep_alive()
    }
}
