//! Single-reactor, multi-threaded HTTP/1.1 static-file-plus-form-login
//! server.
//!
//! `Server::run` is the crate's single entry point: it builds a
//! [`context::ServerContext`] (the DB pool, worker pool, and resolved
//! trigger-mode flags), binds the listening socket, and drives the
//! [`reactor::Reactor`] loop. Everything underneath is exposed as a
//! library so each component is unit-testable in isolation.

pub mod auth;
pub mod buffer;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod http;
pub mod logging;
pub mod pool;
pub mod reactor;
pub mod timer;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_appender::non_blocking::WorkerGuard;

use crate::config::ServerConfig;
use crate::context::ServerContext;
use crate::error::Result;
use crate::reactor::Reactor;

/// Owns the logging guard and the server context for the life of the
/// process; `run` blocks until a fatal error occurs.
pub struct Server {
    config: ServerConfig,
    _log_guard: Option<WorkerGuard>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        let _log_guard = logging::init(&config.log);
        Server { config, _log_guard }
    }

    pub fn run(self) -> Result<()> {
        let ctx = Arc::new(ServerContext::new(&self.config)?);
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        tracing::info!(%addr, workers = self.config.worker_threads, "starting reactor");
        let mut reactor = Reactor::bind(addr, self.config.linger, ctx)?;
        reactor.run()
    }
}
