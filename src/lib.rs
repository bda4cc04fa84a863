//! An embeddable HTTP/1.x server framework.
//!
//! The crate accepts TCP connections, parses requests incrementally with a
//! byte-by-byte state machine, dispatches them to [`Module`] handlers keyed
//! by URI prefix, and writes responses while managing the connection
//! lifecycle (close vs keep-alive).
//!
//! The usual embedding flow:
//!
//! ```no_run
//! use std::sync::Arc;
//! use harbor_http::{make_module, Engine, Response};
//!
//! let engine = Engine::get_instance();
//! let server = engine.add_http_server(8080).unwrap();
//! server.add_module(
//!     "/hello",
//!     Arc::new(make_module(|request, conn| {
//!         Box::pin(async move {
//!             let mut response = Response::for_request(request);
//!             response.write(b"Hello there!");
//!             response.send(conn).await.is_ok()
//!         })
//!     })),
//! );
//! engine.start().unwrap();
//! engine.join();
//! ```

pub mod codec;
pub mod connection;
pub mod engine;
pub mod handler;
pub mod limits;
pub mod protocol;
pub mod reader;
pub mod server;

pub use connection::{Lifecycle, TcpConnection};
pub use engine::{Engine, EngineError};
pub use handler::{make_module, Module};
pub use protocol::{Dictionary, Headers, Request, Response};
pub use server::{HttpServer, Server};
