//! Bounded, semaphore-guarded database connection pool.
//!
//! A fixed number of handles are opened up front and held in a FIFO
//! queue guarded by a counting semaphore. `acquire` blocks on the
//! semaphore (bounding concurrent checkouts to the pool size) then
//! pops a handle; `release` pushes it back and posts the semaphore.
//! The scoped-guard pattern is mandatory so a handle is always
//! returned, including on early-return error paths — modeled here as a
//! `Drop` guard (`PooledConn`).

use std::sync::{Arc, Condvar, Mutex};

use mysql::{Conn, Opts, OptsBuilder};

use crate::config::DbConfig;
use crate::error::{Error, Result};

struct Inner {
    queue: Mutex<Vec<Conn>>,
    available: Condvar,
    closed: Mutex<bool>,
    max_count: usize,
}

/// A bounded pool of opaque database handles.
#[derive(Clone)]
pub struct DbPool {
    inner: Arc<Inner>,
}

impl DbPool {
    /// Opens `config.pool_size` handles against the configured DSN and
    /// enqueues them. Fails fast if any handle cannot be opened.
    pub fn new(config: &DbConfig) -> Result<Self> {
        let opts: Opts = OptsBuilder::new()
            .ip_or_hostname(Some("localhost"))
            .tcp_port(config.port)
            .user(Some(&config.user))
            .pass(Some(&config.password))
            .db_name(Some(&config.name))
            .into();

        let mut handles = Vec::with_capacity(config.pool_size);
        for _ in 0..config.pool_size {
            handles.push(Conn::new(opts.clone()).map_err(Error::DbPoolInit)?);
        }

        Ok(DbPool {
            inner: Arc::new(Inner {
                queue: Mutex::new(handles),
                available: Condvar::new(),
                closed: Mutex::new(false),
                max_count: config.pool_size,
            }),
        })
    }

    /// Blocks until a handle is available, then hands out a scoped guard
    /// that returns the handle to the pool on drop. Returns
    /// `Error::DbPoolClosed` if the pool is concurrently closed while
    /// waiting.
    pub fn acquire(&self) -> Result<PooledConn> {
        let mut queue = self.inner.queue.lock().unwrap();
        loop {
            if *self.inner.closed.lock().unwrap() {
                return Err(Error::DbPoolClosed);
            }
            if let Some(conn) = queue.pop() {
                return Ok(PooledConn {
                    conn: Some(conn),
                    pool: self.inner.clone(),
                });
            }
            queue = self.inner.available.wait(queue).unwrap();
        }
    }

    /// Current number of idle (immediately available) handles.
    pub fn available(&self) -> usize {
        self.inner.queue.lock().unwrap().len()
    }

    /// The configured maximum pool size.
    pub fn capacity(&self) -> usize {
        self.inner.max_count
    }

    /// Drains the queue and drops every handle, closing the underlying
    /// connections. Any caller currently blocked in `acquire` is released
    /// with `Error::DbPoolClosed`.
    pub fn close(&self) {
        *self.inner.closed.lock().unwrap() = true;
        self.inner.queue.lock().unwrap().clear();
        self.inner.available.notify_all();
    }
}

/// A database handle checked out from a [`DbPool`]. Returned to the pool
/// automatically when dropped, including on early-return error paths.
pub struct PooledConn {
    conn: Option<Conn>,
    pool: Arc<Inner>,
}

impl std::ops::Deref for PooledConn {
    type Target = Conn;
    fn deref(&self) -> &Conn {
        self.conn.as_ref().expect("PooledConn used after release")
    }
}

impl std::ops::DerefMut for PooledConn {
    fn deref_mut(&mut self) -> &mut Conn {
        self.conn.as_mut().expect("PooledConn used after release")
    }
}

impl Drop for PooledConn {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if *self.pool.closed.lock().unwrap() {
                // pool closed while checked out: let the handle close on
                // its own drop rather than returning it to a dead queue.
                return;
            }
            self.pool.queue.lock().unwrap().push(conn);
            self.pool.available.notify_one();
        }
    }
}


#[cfg(test)]
mod tests {
    // `DbPool::new` requires a reachable MariaDB/MySQL server, which isn't
    // available in this environment; the semaphore/queue bookkeeping is
    // exercised directly against a hand-built pool instead of going
    // through `new`.
    use super::*;
    use super::testing::empty_pool;

    #[test]
    fn close_releases_waiters_with_pool_closed_error() {
        let pool = empty_pool(1);
        pool.close();
        let err = pool.acquire().unwrap_err();
        assert!(matches!(err, Error::DbPoolClosed));
    }

    #[test]
    fn available_count_tracks_capacity() {
        let pool = empty_pool(3);
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.capacity(), 3);
    }
}
