//! Per-port servers: the acceptor, the connection set, and the HTTP
//! server that drives the read pipeline and module dispatch.
//!
//! A server binds its port non-blocking at `start`, accepts sockets into
//! [`TcpConnection`]s, and runs one task per connection; callbacks for a
//! connection are therefore naturally serialized. `stop` shuts the
//! acceptor down, flags every active connection to close after its
//! current response, and waits for the set to drain.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use futures::FutureExt;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::connection::{Lifecycle, TcpConnection};
use crate::engine::EngineError;
use crate::handler::{send_bad_request, send_server_error, Module, ModuleMap};
use crate::protocol::{HttpError, ParseError};
use crate::reader::{ReadError, RequestReader};

/// A per-port server the engine can own.
#[async_trait]
pub trait Server: Send + Sync {
    /// The configured listening port (zero means an ephemeral port).
    fn port(&self) -> u16;

    /// True while the acceptor is running.
    fn is_listening(&self) -> bool;

    /// The number of currently active connections.
    fn connection_count(&self) -> usize;

    /// Binds the port and begins accepting on the given runtime.
    fn start(self: Arc<Self>, handle: &Handle) -> Result<(), EngineError>;

    /// Stops accepting and drains active connections.
    async fn stop(&self);
}

/// Receives each accepted connection from an [`Acceptor`].
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    async fn handle_connection(&self, conn: TcpConnection, shutdown: watch::Receiver<bool>);
}

/// Tracks active connections for observability and shutdown draining.
pub struct ConnectionSet {
    count: Arc<watch::Sender<usize>>,
}

impl Default for ConnectionSet {
    fn default() -> Self {
        let (count, _) = watch::channel(0);
        Self { count: Arc::new(count) }
    }
}

impl ConnectionSet {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn count(&self) -> usize {
        *self.count.borrow()
    }

    /// Registers a connection; dropping the guard deregisters it.
    pub fn register(&self) -> ConnectionGuard {
        self.count.send_modify(|count| *count += 1);
        ConnectionGuard { count: self.count.clone() }
    }

    /// Waits until no connections remain.
    pub async fn drain(&self) {
        let mut receiver = self.count.subscribe();
        let _ = receiver.wait_for(|count| *count == 0).await;
    }
}

/// RAII membership in a [`ConnectionSet`].
pub struct ConnectionGuard {
    count: Arc<watch::Sender<usize>>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.count.send_modify(|count| *count -= 1);
    }
}

/// The per-port accept machinery shared by server implementations.
pub struct Acceptor {
    port: u16,
    listening: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
    connections: Arc<ConnectionSet>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl Acceptor {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            listening: AtomicBool::new(false),
            local_addr: Mutex::new(None),
            connections: Arc::new(ConnectionSet::new()),
            shutdown: Mutex::new(None),
            accept_task: Mutex::new(None),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    /// The bound address, available after `start` (useful with port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.count()
    }

    /// Binds the port non-blocking and spawns the accept loop.
    pub fn start(
        &self,
        handle: &Handle,
        conn_handler: Arc<dyn ConnectionHandler>,
    ) -> Result<(), EngineError> {
        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, self.port);
        let std_listener = std::net::TcpListener::bind(bind_addr)
            .and_then(|listener| listener.set_nonblocking(true).map(|_| listener))
            .map_err(|source| EngineError::Bind { port: self.port, source })?;

        let _guard = handle.enter();
        let listener = TcpListener::from_std(std_listener)
            .map_err(|source| EngineError::Bind { port: self.port, source })?;

        let local_addr = listener.local_addr().ok();
        *self.local_addr.lock().unwrap() = local_addr;
        if let Some(addr) = local_addr {
            info!(%addr, "server listening");
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        *self.shutdown.lock().unwrap() = Some(shutdown_tx);

        let connections = self.connections.clone();
        let task = handle.spawn(accept_loop(listener, conn_handler, connections, shutdown_rx));
        *self.accept_task.lock().unwrap() = Some(task);

        self.listening.store(true, Ordering::Release);
        Ok(())
    }

    /// Stops the accept loop and waits for connections to drain.
    pub async fn stop(&self) {
        let shutdown = self.shutdown.lock().unwrap().take();
        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(true);
        }
        let task = self.accept_task.lock().unwrap().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        self.connections.drain().await;
        self.listening.store(false, Ordering::Release);
        debug!(port = self.port, "server stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    conn_handler: Arc<dyn ConnectionHandler>,
    connections: Arc<ConnectionSet>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;

            _ = shutdown.changed() => break,

            accepted = listener.accept() => match accepted {
                Ok((stream, remote_addr)) => {
                    debug!(%remote_addr, "accepted connection");
                    let guard = connections.register();
                    let handler = conn_handler.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        let conn = TcpConnection::new(stream, remote_addr);
                        handler.handle_connection(conn, shutdown).await;
                        drop(guard);
                    });
                }
                Err(e) => {
                    warn!(cause = %e, "failed to accept connection");
                }
            },
        }
    }
}

/// A server that speaks HTTP/1.x and dispatches to registered modules.
pub struct HttpServer {
    acceptor: Acceptor,
    modules: RwLock<ModuleMap>,
}

impl HttpServer {
    /// Creates an HTTP server for the given port (zero for ephemeral).
    pub fn new(port: u16) -> Arc<Self> {
        Arc::new(Self { acceptor: Acceptor::new(port), modules: RwLock::new(ModuleMap::new()) })
    }

    /// Registers a module under a URI prefix; an empty prefix sets the
    /// fallback.
    pub fn add_module(&self, prefix: impl Into<String>, module: Arc<dyn Module>) {
        self.modules.write().unwrap().add(prefix, module);
    }

    /// Removes the module registered under `prefix`.
    pub fn remove_module(&self, prefix: &str) -> Option<Arc<dyn Module>> {
        self.modules.write().unwrap().remove(prefix)
    }

    /// Replaces the fallback module (default: the 404 responder).
    pub fn set_fallback(&self, module: Arc<dyn Module>) {
        self.modules.write().unwrap().set_fallback(module);
    }

    /// The bound address, available after start.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.acceptor.local_addr()
    }

    /// Dispatches one valid request through the resource map.
    async fn handle_request(&self, request: &crate::protocol::Request, conn: &mut TcpConnection) {
        let (matching, fallback, no_modules) = {
            let modules = self.modules.read().unwrap();
            (modules.matching(request.resource()), modules.fallback(), modules.is_empty())
        };

        if no_modules {
            warn!("no modules configured");
        }

        for module in matching {
            match AssertUnwindSafe(module.handle(request, conn)).catch_unwind().await {
                Ok(true) => {
                    debug!(resource = request.resource(), "HTTP request handled by module");
                    return;
                }
                Ok(false) => continue,
                Err(panic) => {
                    let message = panic_message(&panic);
                    error!(resource = request.resource(), cause = %message, "HTTP module panicked");
                    conn.set_lifecycle(Lifecycle::Close);
                    let _ = send_server_error(request, conn, &message).await;
                    return;
                }
            }
        }

        fallback.handle(request, conn).await;
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    eprintln!("DIAG is_box_any={} is_box_str={} is_box_dyn_error={} is_unit={} is_box_send_err={}",
        panic.downcast_ref::<Box<dyn std::any::Any + Send>>().is_some(),
        panic.downcast_ref::<Box<str>>().is_some(),
        panic.downcast_ref::<Box<dyn std::error::Error + Send + Sync>>().is_some(),
        panic.downcast_ref::<()>().is_some(),
        panic.downcast_ref::<Box<dyn std::error::Error + Send>>().is_some(),
    );
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_owned()
    }
}

#[async_trait]
impl ConnectionHandler for HttpServer {
    async fn handle_connection(&self, conn: TcpConnection, shutdown: watch::Receiver<bool>) {
        // transport failures are recovered by closing the connection
        if let Err(e) = self.process(conn, shutdown).await {
            info!(cause = %e, "connection closed on error");
        }
    }
}

impl HttpServer {
    /// Runs request/response cycles on one connection until it closes.
    async fn process(
        &self,
        mut conn: TcpConnection,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), HttpError> {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            // default to closing until the request proves keep-alive
            conn.set_lifecycle(Lifecycle::Close);

            let outcome = tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    debug!("request read aborted (shutting down)");
                    return Ok(());
                }
                outcome = async {
                    let reader = RequestReader::new(&conn);
                    reader.read(&mut conn).await
                } => outcome,
            };

            let request = match outcome {
                Ok(request) => request,
                Err(ReadError::Closed) => return Ok(()),
                // limit breaches close with no response
                Err(ReadError::Limit(cause)) => return Err(cause.into()),
                Err(ReadError::Io(e)) => return Err(ParseError::io(e).into()),
            };

            if !request.is_valid() {
                info!("received an invalid HTTP request");
                conn.set_lifecycle(Lifecycle::Close);
                send_bad_request(&request, &mut conn).await?;
                conn.finish().await;
                return Ok(());
            }

            debug!("received a valid HTTP request");
            let keep_alive = request.check_keep_alive() && !*shutdown.borrow();
            conn.set_lifecycle(if keep_alive { Lifecycle::KeepAlive } else { Lifecycle::Close });

            self.handle_request(&request, &mut conn).await;

            // a shutdown that arrived mid-request closes after this response
            if *shutdown.borrow() {
                conn.set_lifecycle(Lifecycle::Close);
            }
            if !conn.finish().await {
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl Server for HttpServer {
    fn port(&self) -> u16 {
        self.acceptor.port()
    }

    fn is_listening(&self) -> bool {
        self.acceptor.is_listening()
    }

    fn connection_count(&self) -> usize {
        self.acceptor.connection_count()
    }

    fn start(self: Arc<Self>, handle: &Handle) -> Result<(), EngineError> {
        for module in self.all_modules() {
            module.start();
        }
        self.acceptor.start(handle, self.clone())
    }

    async fn stop(&self) {
        self.acceptor.stop().await;
        for module in self.all_modules() {
            module.stop();
        }
    }
}

impl HttpServer {
    /// Every registered module plus the fallback, for lifecycle hooks.
    fn all_modules(&self) -> Vec<Arc<dyn Module>> {
        let map = self.modules.read().unwrap();
        let mut all: Vec<Arc<dyn Module>> = map.modules().cloned().collect();
        all.push(map.fallback());
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn connection_set_counts_and_drains() {
        let set = Arc::new(ConnectionSet::new());
        assert_eq!(set.count(), 0);

        let first = set.register();
        let second = set.register();
        assert_eq!(set.count(), 2);

        drop(first);
        assert_eq!(set.count(), 1);

        let drained = {
            let set = set.clone();
            tokio::spawn(async move { set.drain().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!drained.is_finished());

        drop(second);
        tokio::time::timeout(Duration::from_secs(1), drained).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn drain_returns_immediately_when_empty() {
        let set = ConnectionSet::new();
        tokio::time::timeout(Duration::from_secs(1), set.drain()).await.unwrap();
    }
}
