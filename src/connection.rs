//! The TCP connection wrapper.
//!
//! A [`TcpConnection`] owns the transport byte stream, the fixed-size read
//! buffer the parser consumes from, and the lifecycle mode that decides
//! what happens after a response has been sent. The transport is boxed so
//! a TLS stream can be slotted in as an opaque byte stream; the crate
//! itself never implements TLS.

use std::io::{self, IoSlice};
use std::net::{IpAddr, SocketAddr};

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::limits::READ_BUFFER_SIZE;

/// Marker for any byte stream a connection can run over.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Transport for T {}

/// What to do with the connection once the current response is finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Close the socket after the response
    Close,
    /// Keep the socket open and read another request
    KeepAlive,
    /// Reserved; behaves as `KeepAlive` for now
    Pipelined,
}

/// A TCP (or TLS) connection with its read buffer and lifecycle mode.
///
/// A connection has exactly one owner at a time: the server while idle,
/// the read pipeline during a request, and the response until the send
/// completes.
pub struct TcpConnection {
    stream: Box<dyn Transport>,
    read_buffer: BytesMut,
    lifecycle: Lifecycle,
    tls: bool,
    remote_addr: SocketAddr,
}

impl TcpConnection {
    /// Wraps an accepted TCP stream.
    pub fn new(stream: TcpStream, remote_addr: SocketAddr) -> Self {
        Self::from_transport(Box::new(stream), remote_addr, false)
    }

    /// Wraps an arbitrary transport, e.g. an in-memory stream in tests or
    /// an already-negotiated TLS stream.
    pub fn from_transport(stream: Box<dyn Transport>, remote_addr: SocketAddr, tls: bool) -> Self {
        Self {
            stream,
            read_buffer: BytesMut::with_capacity(READ_BUFFER_SIZE),
            lifecycle: Lifecycle::Close,
            tls,
            remote_addr,
        }
    }

    /// The remote endpoint address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// The remote endpoint IP.
    pub fn remote_ip(&self) -> IpAddr {
        self.remote_addr.ip()
    }

    /// True if the transport is a TLS stream.
    pub fn is_tls(&self) -> bool {
        self.tls
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn set_lifecycle(&mut self, lifecycle: Lifecycle) {
        self.lifecycle = lifecycle;
    }

    /// True if the connection should be reused after the current response.
    pub fn keep_alive(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::KeepAlive | Lifecycle::Pipelined)
    }

    /// Unconsumed bytes from the last read.
    pub fn read_buffer(&self) -> &[u8] {
        &self.read_buffer
    }

    /// Discards `n` consumed bytes from the front of the read buffer.
    pub fn consume(&mut self, n: usize) {
        self.read_buffer.advance(n);
    }

    /// Reads some bytes from the transport into the read buffer.
    ///
    /// Returns the number of bytes read; zero means the peer closed the
    /// connection.
    pub async fn read_some(&mut self) -> io::Result<usize> {
        self.read_buffer.reserve(READ_BUFFER_SIZE);
        self.stream.read_buf(&mut self.read_buffer).await
    }

    /// Reads exactly `buf.len()` bytes from the transport into `buf`,
    /// bypassing the read buffer.
    ///
    /// The read buffer must be drained first; body tails are read straight
    /// into the request's content buffer.
    pub async fn read_exact_into(&mut self, buf: &mut [u8]) -> io::Result<()> {
        debug_assert!(self.read_buffer.is_empty(), "read buffer must be drained before a body tail read");
        self.stream.read_exact(buf).await.map(|_| ())
    }

    /// Writes all buffers as one gathered write and flushes the transport.
    pub async fn write_buffers(&mut self, buffers: &[Bytes]) -> io::Result<()> {
        let total: usize = buffers.iter().map(|b| b.len()).sum();
        let mut written = 0;

        while written < total {
            let mut slices = Vec::with_capacity(buffers.len());
            let mut skip = written;
            for buffer in buffers {
                if skip >= buffer.len() {
                    skip -= buffer.len();
                    continue;
                }
                slices.push(IoSlice::new(&buffer[skip..]));
                skip = 0;
            }

            let n = self.stream.write_vectored(&slices).await?;
            if n == 0 {
                return Err(io::ErrorKind::WriteZero.into());
            }
            written += n;
        }

        self.stream.flush().await
    }

    /// Ends the request/response cycle.
    ///
    /// Returns true if the connection stays open for another request;
    /// otherwise shuts the transport down. After a `false` return no
    /// further I/O happens on this connection.
    pub async fn finish(&mut self) -> bool {
        if self.keep_alive() {
            return true;
        }
        if let Err(e) = self.stream.shutdown().await {
            debug!(cause = %e, "error shutting down connection");
        }
        false
    }
}
