//! The request read pipeline.
//!
//! Drives one request from the wire to a finished [`Request`]: read some
//! bytes, feed the incremental parser, read more until the head is
//! complete, copy any body bytes that arrived with the head (spill-over),
//! read the remainder of the body exactly, then run the url-encoded and
//! cookie sub-parsers and hand the request to dispatch.

use std::io;

use thiserror::Error;
use tracing::{debug, warn};

use crate::codec::{cookie, form, ParseState, ParseStatus, RequestParser};
use crate::connection::TcpConnection;
use crate::limits::POST_CONTENT_MAX;
use crate::protocol::{
    Dictionary, ParseError, Request, CONTENT_TYPE, CONTENT_TYPE_URLENCODED, COOKIE,
};

/// Why a request could not be produced.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The peer closed the connection before a request began
    #[error("connection closed by peer")]
    Closed,

    /// A field or the body exceeded a parser limit; the connection is
    /// closed with no response
    #[error("{0}")]
    Limit(#[from] ParseError),

    /// The transport failed mid-request
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Reads one request from a connection.
///
/// A reader owns the parser and the request being built; it serves exactly
/// one request and is consumed by [`read`](Self::read). A syntactically
/// invalid request is returned as a `Request` with its validity flag
/// cleared so dispatch can still answer with a 400.
pub struct RequestReader {
    parser: RequestParser,
    request: Request,
}

impl RequestReader {
    pub fn new(conn: &TcpConnection) -> Self {
        let mut request = Request::new();
        request.parts_mut().set_remote_ip(conn.remote_ip());
        Self { parser: RequestParser::new(), request }
    }

    /// Reads, parses and finalizes one request.
    pub async fn read(mut self, conn: &mut TcpConnection) -> Result<Request, ReadError> {
        // header phase: read-some, parse, repeat
        loop {
            if conn.read_buffer().is_empty() {
                match conn.read_some().await {
                    Ok(0) => {
                        return Err(if self.parser.state() == ParseState::MethodStart {
                            ReadError::Closed
                        } else {
                            ReadError::Io(io::ErrorKind::UnexpectedEof.into())
                        });
                    }
                    Ok(n) => debug!(bytes = n, "read bytes from HTTP request"),
                    Err(e) => {
                        // nothing of this request was seen yet: close silently
                        return Err(if self.parser.state() == ParseState::MethodStart {
                            ReadError::Closed
                        } else {
                            ReadError::Io(e)
                        });
                    }
                }
            }

            let (consumed, status) = self.parser.parse(&mut self.request, conn.read_buffer());
            conn.consume(consumed);
            if consumed > 0 {
                debug!(bytes = consumed, "parsed HTTP header bytes");
            }

            match status {
                ParseStatus::Incomplete => continue,
                ParseStatus::Invalid => {
                    if let Some((current, max)) = self.parser.limit_exceeded() {
                        return Err(ParseError::field_too_large(current, max).into());
                    }
                    self.request.set_valid(false);
                    return Ok(self.request);
                }
                ParseStatus::Complete => break,
            }
        }

        // body phase
        self.request.parts_mut().update_content_length_from_header();
        self.request.parts_mut().update_transfer_coding_from_header();
        let content_length = self.request.content_length();
        if content_length > POST_CONTENT_MAX {
            return Err(ParseError::field_too_large(content_length, POST_CONTENT_MAX).into());
        }

        let leftover = conn.read_buffer().len();
        if content_length > 0 {
            let copy_now = leftover.min(content_length);
            self.request.parts_mut().create_content_buffer();
            if copy_now > 0 {
                let spill = &conn.read_buffer()[..copy_now];
                self.request.parts_mut().content_mut()[..copy_now].copy_from_slice(spill);
                conn.consume(copy_now);
                debug!(bytes = copy_now, "copied request content bytes from the header read");
            }
            if copy_now < content_length {
                let tail = &mut self.request.parts_mut().content_mut()[copy_now..];
                conn.read_exact_into(tail).await?;
                debug!(bytes = content_length - copy_now, "read remaining request content bytes");
            }
        }

        // bytes past the declared body would be a pipelined request, which
        // this core treats as a protocol error
        let excess = conn.read_buffer().len();
        if excess > 0 {
            let cause = ParseError::excess_bytes(excess);
            warn!(%cause, "marking request invalid");
            self.request.set_valid(false);
            return Ok(self.request);
        }

        self.finalize();
        Ok(self.request)
    }

    /// Marks the request valid and populates the decoded parameter maps.
    fn finalize(&mut self) {
        self.request.set_valid(true);

        let major = self.request.version_major();
        let minor = self.request.version_minor();
        self.request.parts_mut().set_chunks_supported(major > 1 || (major == 1 && minor >= 1));

        if !self.request.query_string().is_empty() {
            let mut raw = Dictionary::new();
            if form::parse_url_encoded(&mut raw, self.request.query_string().as_bytes()) {
                insert_decoded(self.request.query_params_mut(), &raw);
            } else {
                warn!("request query string parsing failed (URI)");
            }
        }

        if self.request.get_header(CONTENT_TYPE) == CONTENT_TYPE_URLENCODED {
            let mut raw = Dictionary::new();
            if form::parse_url_encoded(&mut raw, self.request.content()) {
                insert_decoded(self.request.query_params_mut(), &raw);
            } else {
                warn!("request query string parsing failed (POST content)");
            }
        }

        let cookie_headers: Vec<String> =
            self.request.headers().get_all(COOKIE).map(str::to_owned).collect();
        for header in cookie_headers {
            if !cookie::parse_cookie_header(self.request.cookie_params_mut(), &header) {
                warn!("cookie header parsing failed");
            }
        }
    }
}

/// Percent-decodes every pair of `raw` into `params`.
fn insert_decoded(params: &mut Dictionary, raw: &Dictionary) {
    for (name, value) in raw.iter() {
        params.add_value(form::url_decode(name), form::url_decode(value));
    }
}
