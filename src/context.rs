//! Server-wide shared state owned by one `ServerContext`, constructed
//! once at startup and handed to the Reactor, which threads it through
//! to every worker closure.

use std::path::PathBuf;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::pool::{DbPool, WorkerPool};

pub struct ServerContext {
    pub db: DbPool,
    pub workers: WorkerPool,
    pub doc_root: PathBuf,
    pub idle_timeout: Duration,
    pub conn_edge_triggered: bool,
    pub listener_edge_triggered: bool,
}

impl ServerContext {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let trigger_mode = config.trigger_mode.resolve()?;
        Ok(ServerContext {
            db: DbPool::new(&config.db)?,
            workers: WorkerPool::new(config.worker_threads),
            doc_root: PathBuf::from(&config.doc_root),
            idle_timeout: Duration::from_millis(config.idle_timeout_ms),
            conn_edge_triggered: trigger_mode.conn_edge_triggered(),
            listener_edge_triggered: trigger_mode.listener_edge_triggered(),
        })
    }
}
