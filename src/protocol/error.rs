//! Error types for HTTP protocol handling.
//!
//! [`HttpError`] is the top-level error at the connection boundary; it
//! wraps [`ParseError`] (request side) and [`SendError`] (response
//! side). Malformed request syntax is not an error value: it is surfaced
//! once to the handler as an invalid `Request`; the error types cover
//! framing violations (a field over its limit, bytes beyond the declared
//! body length) and transport failures.

use std::io;
use thiserror::Error;

/// The top-level error type for HTTP operations.
///
/// Produced by the per-connection request/response loop and consumed at
/// the logging boundary when a connection is torn down.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Errors that occur while reading and parsing a request
    #[error("request error: {source}")]
    RequestError {
        #[from]
        source: ParseError,
    },

    /// Errors that occur while sending a response
    #[error("response error: {source}")]
    ResponseError {
        #[from]
        source: SendError,
    },
}

/// Errors that occur during HTTP request reading.
#[derive(Error, Debug)]
pub enum ParseError {
    /// A field or the body exceeded one of the parser limits
    #[error("request field too large, current: {current} exceed the limit {max}")]
    FieldTooLarge { current: usize, max: usize },

    /// Bytes beyond the declared Content-Length arrived with the request
    #[error("{count} excess bytes beyond the declared content length")]
    ExcessBytes { count: usize },

    /// I/O error while reading the request
    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl ParseError {
    /// Creates a new FieldTooLarge error
    pub fn field_too_large(current: usize, max: usize) -> Self {
        Self::FieldTooLarge { current, max }
    }

    /// Creates a new ExcessBytes error
    pub fn excess_bytes(count: usize) -> Self {
        Self::ExcessBytes { count }
    }

    /// Creates a new I/O error
    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

/// Errors that occur during HTTP response sending.
#[derive(Error, Debug)]
pub enum SendError {
    /// I/O error during sending
    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl SendError {
    /// Creates a new I/O error
    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}
