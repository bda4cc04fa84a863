//! The process-wide engine: the shared I/O service, the worker pool and
//! the server registry.
//!
//! The engine is created lazily exactly once; [`Engine::get_instance`]
//! returns the singleton. Servers are registered by port before `start`.
//! `start` builds a multi-thread runtime with `num_threads` workers
//! (default 5) and starts every server on it; `stop` stops the servers,
//! tears the runtime down and signals anyone blocked in `join`.
//!
//! The public methods are blocking and must be called from outside the
//! engine's own runtime (i.e. not from inside a module handler).

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Condvar, Mutex, OnceLock};

use futures::future::join_all;
use thiserror::Error;
use tokio::runtime::{Builder, Runtime};
use tracing::{info, warn};

use crate::server::{HttpServer, Server};

/// Default number of worker threads in the engine's pool.
pub const DEFAULT_NUM_THREADS: usize = 5;

/// State errors surfaced by the engine and server public API.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `start` was called while the engine is running
    #[error("engine is already running")]
    AlreadyStarted,

    /// `start` was called with no servers registered
    #[error("no servers have been added to the engine")]
    NoServers,

    /// The engine is running and the operation needs it stopped
    #[error("engine is running; stop it first")]
    StillRunning,

    /// A server could not bind its port
    #[error("unable to bind to port {port}: {source}")]
    Bind { port: u16, source: io::Error },

    /// The worker runtime could not be built
    #[error("unable to start worker threads: {source}")]
    Runtime { source: io::Error },
}

static ENGINE: OnceLock<Engine> = OnceLock::new();

struct Inner {
    servers: HashMap<u16, Arc<dyn Server>>,
    runtime: Option<Runtime>,
    num_threads: usize,
    running: bool,
}

/// The process-wide server engine.
pub struct Engine {
    inner: Mutex<Inner>,
    stopped: Condvar,
}

impl Engine {
    fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                servers: HashMap::new(),
                runtime: None,
                num_threads: DEFAULT_NUM_THREADS,
                running: false,
            }),
            stopped: Condvar::new(),
        }
    }

    /// Returns the lazily-created singleton.
    pub fn get_instance() -> &'static Engine {
        ENGINE.get_or_init(Engine::new)
    }

    /// True while the engine is running.
    pub fn is_running(&self) -> bool {
        self.inner.lock().unwrap().running
    }

    /// Sets the worker pool size; effective only before `start`.
    pub fn set_num_threads(&self, num_threads: usize) {
        let mut inner = self.inner.lock().unwrap();
        if inner.running {
            warn!("set_num_threads ignored while the engine is running");
            return;
        }
        inner.num_threads = num_threads.max(1);
    }

    /// Registers a server by port; false if the port is taken.
    pub fn add_server(&self, server: Arc<dyn Server>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let port = server.port();
        if inner.servers.contains_key(&port) {
            return false;
        }
        inner.servers.insert(port, server);
        true
    }

    /// Creates and registers an HTTP server; `None` on a port collision.
    pub fn add_http_server(&self, port: u16) -> Option<Arc<HttpServer>> {
        let server = HttpServer::new(port);
        self.add_server(server.clone()).then_some(server)
    }

    /// Returns the server registered on `port`, if any.
    pub fn get_server(&self, port: u16) -> Option<Arc<dyn Server>> {
        self.inner.lock().unwrap().servers.get(&port).cloned()
    }

    /// Unregisters all servers; only valid while stopped.
    pub fn clear_servers(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.running {
            return Err(EngineError::StillRunning);
        }
        inner.servers.clear();
        Ok(())
    }

    /// Starts every registered server on a fresh worker pool.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.running {
            return Err(EngineError::AlreadyStarted);
        }
        if inner.servers.is_empty() {
            return Err(EngineError::NoServers);
        }

        info!(num_threads = inner.num_threads, "engine starting up");

        let runtime = Builder::new_multi_thread()
            .worker_threads(inner.num_threads)
            .thread_name("harbor-worker")
            .enable_all()
            .build()
            .map_err(|source| EngineError::Runtime { source })?;

        let mut started: Vec<Arc<dyn Server>> = Vec::new();
        for server in inner.servers.values() {
            if let Err(e) = server.clone().start(runtime.handle()) {
                // roll the partial start back before surfacing the error
                runtime.block_on(async {
                    join_all(started.iter().map(|server| server.stop())).await;
                });
                return Err(e);
            }
            started.push(server.clone());
        }

        inner.runtime = Some(runtime);
        inner.running = true;
        Ok(())
    }

    /// Stops every server, drains connections and tears down the pool.
    ///
    /// Safe to call while stopped (does nothing).
    pub fn stop(&self) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.running {
            return;
        }

        info!("engine shutting down");

        let runtime = inner.runtime.take().expect("running engine always has a runtime");
        let servers: Vec<Arc<dyn Server>> = inner.servers.values().cloned().collect();
        runtime.block_on(async {
            join_all(servers.iter().map(|server| server.stop())).await;
        });
        drop(runtime);

        info!("engine has shutdown");
        inner.running = false;
        self.stopped.notify_all();
    }

    /// Blocks the calling thread until `stop` completes.
    pub fn join(&self) {
        let mut inner = self.inner.lock().unwrap();
        while inner.running {
            inner = self.stopped.wait(inner).unwrap();
        }
    }
}
