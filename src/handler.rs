//! Request modules and the prefix dispatch table.
//!
//! A module is anything implementing [`Module`]: it receives the finished
//! request and the connection, and returns true once it has produced a
//! response. Modules are registered on an [`HttpServer`] under a URI
//! prefix; dispatch picks the longest registered prefix of the request's
//! resource and falls through to shorter prefixes (and finally the
//! fallback) while handlers return false.
//!
//! [`HttpServer`]: crate::server::HttpServer

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::info;

use crate::connection::TcpConnection;
use crate::protocol::{Request, Response, SendError};

/// A request handler bound to a URI prefix.
#[async_trait]
pub trait Module: Send + Sync {
    /// Handles a request, returning true if a response was produced.
    ///
    /// Returning false passes the request on to the next shorter matching
    /// prefix, then to the fallback.
    async fn handle(&self, request: &Request, conn: &mut TcpConnection) -> bool;

    /// Called before the owning server starts accepting connections.
    fn start(&self) {}

    /// Called after the owning server has stopped accepting connections.
    fn stop(&self) {}
}

/// The future returned by a function module.
pub type ModuleFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

/// A [`Module`] built from a plain function or closure.
pub struct ModuleFn<F> {
    f: F,
}

#[async_trait]
impl<F> Module for ModuleFn<F>
where
    F: for<'a> Fn(&'a Request, &'a mut TcpConnection) -> ModuleFuture<'a> + Send + Sync,
{
    async fn handle(&self, request: &Request, conn: &mut TcpConnection) -> bool {
        (self.f)(request, conn).await
    }
}

/// Wraps a function or closure as a [`Module`].
///
/// ```no_run
/// # use harbor_http::{make_module, Response};
/// let module = make_module(|request, conn| {
///     Box::pin(async move {
///         let mut response = Response::for_request(request);
///         response.write(b"hi");
///         response.send(conn).await.is_ok()
///     })
/// });
/// ```
pub fn make_module<F>(f: F) -> ModuleFn<F>
where
    F: for<'a> Fn(&'a Request, &'a mut TcpConnection) -> ModuleFuture<'a> + Send + Sync,
{
    ModuleFn { f }
}

/// The per-server resource map: URI prefix to module, plus a fallback.
pub struct ModuleMap {
    modules: BTreeMap<String, Arc<dyn Module>>,
    fallback: Arc<dyn Module>,
}

impl Default for ModuleMap {
    fn default() -> Self {
        Self { modules: BTreeMap::new(), fallback: Arc::new(NotFoundModule) }
    }
}

impl ModuleMap {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers a module under a URI prefix.
    ///
    /// An empty prefix is equivalent to setting the fallback.
    pub fn add(&mut self, prefix: impl Into<String>, module: Arc<dyn Module>) {
        let prefix = prefix.into();
        if prefix.is_empty() {
            self.fallback = module;
        } else {
            self.modules.insert(prefix, module);
        }
    }

    /// Removes the module registered under `prefix`, if any.
    pub fn remove(&mut self, prefix: &str) -> Option<Arc<dyn Module>> {
        self.modules.remove(prefix)
    }

    /// Replaces the fallback module.
    pub fn set_fallback(&mut self, module: Arc<dyn Module>) {
        self.fallback = module;
    }

    pub fn fallback(&self) -> Arc<dyn Module> {
        self.fallback.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Iterates over the registered modules (excluding the fallback).
    pub fn modules(&self) -> impl Iterator<Item = &Arc<dyn Module>> {
        self.modules.values()
    }

    /// Returns every module whose prefix is a prefix of `resource`,
    /// longest first.
    pub fn matching(&self, resource: &str) -> Vec<Arc<dyn Module>> {
        let mut matches: Vec<(&str, &Arc<dyn Module>)> = self
            .modules
            .iter()
            .filter(|(prefix, _)| resource.starts_with(prefix.as_str()))
            .map(|(prefix, module)| (prefix.as_str(), module))
            .collect();
        matches.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        matches.into_iter().map(|(_, module)| module.clone()).collect()
    }
}

/// The default fallback: answers 404 with the canonical HTML body.
pub struct NotFoundModule;

#[async_trait]
impl Module for NotFoundModule {
    async fn handle(&self, request: &Request, conn: &mut TcpConnection) -> bool {
        info!(resource = request.resource(), "no modules found to handle HTTP request");
        send_not_found(request, conn).await.is_ok()
    }
}

const NOT_FOUND_HTML_START: &str = "<html><head>\n\
     <title>404 Not Found</title>\n\
     </head><body>\n\
     <h1>Not Found</h1>\n\
     <p>The requested URL ";
const NOT_FOUND_HTML_FINISH: &str = " was not found on this server.</p>\n\
     </body></html>\n";

const BAD_REQUEST_HTML: &str = "<html><head>\n\
     <title>400 Bad Request</title>\n\
     </head><body>\n\
     <h1>Bad Request</h1>\n\
     <p>Your browser sent a request that this server could not understand.</p>\n\
     </body></html>\n";

const SERVER_ERROR_HTML_START: &str = "<html><head>\n\
     <title>500 Server Error</title>\n\
     </head><body>\n\
     <h1>Internal Server Error</h1>\n\
     <p>The server encountered an internal error: <strong>";
const SERVER_ERROR_HTML_FINISH: &str = "</strong></p>\n\
     </body></html>\n";

/// Sends the canonical 404 response.
pub async fn send_not_found(request: &Request, conn: &mut TcpConnection) -> Result<(), SendError> {
    let mut response = Response::for_request(request);
    response.set_status_code(404);
    response.set_status_message("Not Found");
    response.write_no_copy(Bytes::from_static(NOT_FOUND_HTML_START.as_bytes()));
    response.write(request.resource());
    response.write_no_copy(Bytes::from_static(NOT_FOUND_HTML_FINISH.as_bytes()));
    response.send(conn).await
}

/// Sends the canonical 400 response for an invalid request.
pub async fn send_bad_request(request: &Request, conn: &mut TcpConnection) -> Result<(), SendError> {
    let mut response = Response::for_request(request);
    response.set_status_code(400);
    response.set_status_message("Bad Request");
    response.write_no_copy(Bytes::from_static(BAD_REQUEST_HTML.as_bytes()));
    response.send(conn).await
}

/// Sends the canonical 500 response for a failed module.
pub async fn send_server_error(
    request: &Request,
    conn: &mut TcpConnection,
    error_msg: &str,
) -> Result<(), SendError> {
    let mut response = Response::for_request(request);
    response.set_status_code(500);
    response.set_status_message("Internal Server Error");
    response.write_no_copy(Bytes::from_static(SERVER_ERROR_HTML_START.as_bytes()));
    response.write(error_msg);
    response.write_no_copy(Bytes::from_static(SERVER_ERROR_HTML_FINISH.as_bytes()));
    response.send(conn).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TagModule;

    #[async_trait]
    impl Module for TagModule {
        async fn handle(&self, _request: &Request, _conn: &mut TcpConnection) -> bool {
            true
        }
    }

    fn map_with(prefixes: &[&str]) -> (ModuleMap, Vec<Arc<dyn Module>>) {
        let mut map = ModuleMap::new();
        let mut modules: Vec<Arc<dyn Module>> = Vec::new();
        for prefix in prefixes {
            let module: Arc<dyn Module> = Arc::new(TagModule);
            map.add(*prefix, module.clone());
            modules.push(module);
        }
        (map, modules)
    }

    #[test]
    fn longest_prefix_wins() {
        let (map, modules) = map_with(&["/", "/a", "/a/b"]);
        let expect = |resource: &str, index: usize| {
            let matched = map.matching(resource);
            assert!(!matched.is_empty(), "{resource} matched nothing");
            assert!(
                Arc::ptr_eq(&matched[0], &modules[index]),
                "{resource} did not match prefix #{index}"
            );
        };

        expect("/a/b/c", 2);
        expect("/a/x", 1);
        expect("/z", 0);
    }

    #[test]
    fn miss_falls_back() {
        let (map, _modules) = map_with(&["/a"]);
        assert!(map.matching("/z").is_empty());
        // the fallback is always available
        let _ = map.fallback();
    }

    #[test]
    fn matching_orders_longest_first() {
        let (map, modules) = map_with(&["/", "/a", "/a/b"]);
        let matched = map.matching("/a/b/c");
        assert_eq!(matched.len(), 3);
        assert!(Arc::ptr_eq(&matched[0], &modules[2]));
        assert!(Arc::ptr_eq(&matched[1], &modules[1]));
        assert!(Arc::ptr_eq(&matched[2], &modules[0]));
    }

    #[test]
    fn empty_prefix_sets_fallback() {
        let mut map = ModuleMap::new();
        let module: Arc<dyn Module> = Arc::new(TagModule);
        map.add("", module.clone());
        assert!(map.is_empty());
        assert!(Arc::ptr_eq(&map.fallback(), &module));
    }

    #[test]
    fn remove_unregisters() {
        let (mut map, _modules) = map_with(&["/a"]);
        assert_eq!(map.len(), 1);
        assert!(map.remove("/a").is_some());
        assert!(map.matching("/a").is_empty());
        assert!(map.remove("/a").is_none());
    }

    #[tokio::test]
    async fn function_modules_run() {
        let counter = Arc::new(AtomicUsize::new(0));
        let captured = counter.clone();
        let module = make_module(move |_request, _conn| {
            let captured = captured.clone();
            Box::pin(async move {
                captured.fetch_add(1, Ordering::SeqCst);
                false
            })
        });

        let (_, server) = tokio::io::duplex(64);
        let addr = "127.0.0.1:40000".parse().unwrap();
        let mut conn = TcpConnection::from_transport(Box::new(server), addr, false);
        let request = Request::new();

        assert!(!module.handle(&request, &mut conn).await);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
