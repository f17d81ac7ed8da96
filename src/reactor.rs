//! Single-threaded dispatch loop owning the connection table, timer
//! heap, and readiness notifier; the readiness-notifier abstraction is
//! a thin wrapper kept inline here rather than split into its own
//! module, since `mio::Poll`/`Registry` already provide exactly that
//! interface.
//!
//! `poll` for readiness, accept on the listening fd, otherwise extend
//! the connection's deadline and submit a read/write task to the
//! worker pool. Connections live in a
//! `Slab<Arc<Mutex<Connection<_>>>>` — the `Mutex` is a formality the
//! type system requires even though the one-shot-equivalent
//! reregister-after-handling discipline guarantees a connection is
//! only ever touched by one worker at a time.

use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use slab::Slab;
use socket2::{Domain, Socket, Type};

use crate::connection::Connection;
use crate::context::ServerContext;
use crate::error::{Error, Result};

const LISTEN_TOKEN: Token = Token(usize::MAX);
const WAKE_TOKEN: Token = Token(usize::MAX - 1);

/// Per-process live-connection cap.
const MAX_CONNECTIONS: usize = 65_535;

const SERVER_BUSY_RESPONSE: &[u8] =
    b"HTTP/1.1 503 Service Unavailable\r\nConnection: close\r\nContent-length: 0\r\n\r\n";

type SharedConnection = Arc<Mutex<Connection<TcpStream>>>;

/// Readiness bits captured out of an `mio::event::Event` before the
/// borrow on `self.events` ends, so the dispatch loop can mutate
/// `self.connections` while iterating.
#[derive(Clone, Copy)]
struct Readiness {
    readable: bool,
    writable: bool,
    closed_or_errored: bool,
}

impl From<&mio::event::Event> for Readiness {
    fn from(ev: &mio::event::Event) -> Self {
        Readiness {
            readable: ev.is_readable(),
            writable: ev.is_writable(),
            closed_or_errored: ev.is_error() || ev.is_read_closed(),
        }
    }
}

pub struct Reactor {
    listener: TcpListener,
    poll: Poll,
    registry: Arc<mio::Registry>,
    events: Events,
    connections: Slab<SharedConnection>,
    timers: crate::timer::TimerHeap,
    ctx: Arc<ServerContext>,
    closed_tx: Sender<usize>,
    closed_rx: Receiver<usize>,
    waker: Arc<Waker>,
}

impl Reactor {
    /// Binds the listening socket with `SO_REUSEADDR`, optional
    /// `SO_LINGER`, and non-blocking mode, and registers it for
    /// continuous `READABLE` interest — the listening fd is never
    /// one-shot.
    pub fn bind(addr: SocketAddr, linger: bool, ctx: Arc<ServerContext>) -> Result<Self> {
        let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::STREAM, None).map_err(Error::Bind)?;
        socket.set_reuse_address(true).map_err(Error::Bind)?;
        if linger {
            socket
                .set_linger(Some(Duration::from_secs(1)))
                .map_err(Error::Bind)?;
        }
        socket.set_nonblocking(true).map_err(Error::Bind)?;
        socket.bind(&addr.into()).map_err(Error::Bind)?;
        socket.listen(1024).map_err(Error::Bind)?;

        let mut listener = TcpListener::from_std(socket.into());

        let poll = Poll::new().map_err(Error::Notifier)?;
        let registry = Arc::new(poll.registry().try_clone().map_err(Error::Notifier)?);
        registry
            .register(&mut listener, LISTEN_TOKEN, Interest::READABLE)
            .map_err(Error::Notifier)?;

        let waker = Arc::new(Waker::new(&registry, WAKE_TOKEN).map_err(Error::Notifier)?);
        let (closed_tx, closed_rx) = unbounded();

        Ok(Reactor {
            listener,
            poll,
            registry,
            events: Events::with_capacity(1024),
            connections: Slab::with_capacity(1024),
            timers: crate::timer::TimerHeap::with_capacity(1024),
            ctx,
            closed_tx,
            closed_rx,
            waker,
        })
    }

    /// The bound address, including the OS-assigned port when the
    /// configured port was `0` — primarily useful for tests that need an
    /// ephemeral listening port.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs the dispatch loop until a fatal I/O error occurs. There is
    /// no in-process shutdown signal today; the binary's `main` simply
    /// lets the process be killed.
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.drain_closed();

            let timeout = self.timers.next_tick_ms().map(Duration::from_millis);
            self.poll.poll(&mut self.events, timeout).map_err(Error::Notifier)?;

            let ready: Vec<(Token, Readiness)> =
                self.events.iter().map(|e| (e.token(), Readiness::from(e))).collect();

            for (token, readiness) in ready {
                match token {
                    LISTEN_TOKEN => {
                        if let Err(e) = self.accept_batch() {
                            tracing::warn!(error = %e, "accept batch failed");
                        }
                    }
                    WAKE_TOKEN => self.drain_closed(),
                    Token(key) => self.handle_conn_event(key, readiness),
                }
            }
        }
    }

    fn accept_batch(&mut self) -> io::Result<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.accept_one(stream, peer)?,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
            if !self.ctx.listener_edge_triggered {
                break;
            }
        }
        Ok(())
    }

    fn accept_one(&mut self, mut stream: TcpStream, peer: SocketAddr) -> io::Result<()> {
        if self.connections.len() >= MAX_CONNECTIONS {
            let _ = stream.write_all(SERVER_BUSY_RESPONSE);
            return Ok(());
        }

        let conn = Connection::new(
            stream,
            peer,
            self.ctx.doc_root.clone(),
            self.ctx.conn_edge_triggered,
        );
        let key = self.connections.insert(Arc::new(Mutex::new(conn)));

        {
            let mut guard = self.connections[key].lock().unwrap();
            guard.register(&self.registry, Token(key), Interest::READABLE)?;
        }

        if !self.ctx.idle_timeout.is_zero() {
            let closed_tx = self.closed_tx.clone();
            let waker = self.waker.clone();
            self.timers.add(key, self.ctx.idle_timeout, move |id| {
                let _ = closed_tx.send(id);
                let _ = waker.wake();
            });
        }

        tracing::debug!(%peer, token = key, "accepted connection");
        Ok(())
    }

    fn handle_conn_event(&mut self, key: usize, readiness: Readiness) {
        let conn = match self.connections.get(key) {
            Some(c) => c.clone(),
            None => return,
        };

        if readiness.closed_or_errored {
            self.close_connection(key);
            return;
        }

        if !self.ctx.idle_timeout.is_zero() {
            self.timers.adjust(key, self.ctx.idle_timeout);
        }

        if readiness.readable {
            self.dispatch_read(key, conn);
        } else if readiness.writable {
            self.dispatch_write(key, conn);
        }
    }

    fn dispatch_read(&self, key: usize, conn: SharedConnection) {
        let ctx = self.ctx.clone();
        let registry = self.registry.clone();
        let closed_tx = self.closed_tx.clone();
        let waker = self.waker.clone();

        self.ctx.workers.submit(move || {
            let mut c = conn.lock().unwrap();
            match c.read() {
                Ok(0) => {
                    c.close();
                    drop(c);
                    let _ = closed_tx.send(key);
                    let _ = waker.wake();
                }
                Ok(_) => {
                    let ready = c.process(&ctx.db);
                    let interest = if ready {
                        Interest::WRITABLE
                    } else {
                        Interest::READABLE
                    };
                    if c.reregister(&registry, Token(key), interest).is_err() {
                        c.close();
                        drop(c);
                        let _ = closed_tx.send(key);
                        let _ = waker.wake();
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let _ = c.reregister(&registry, Token(key), Interest::READABLE);
                }
                Err(_) => {
                    c.close();
                    drop(c);
                    let _ = closed_tx.send(key);
                    let _ = waker.wake();
                }
            }
        });
    }

    fn dispatch_write(&self, key: usize, conn: SharedConnection) {
        let ctx = self.ctx.clone();
        let registry = self.registry.clone();
        let closed_tx = self.closed_tx.clone();
        let waker = self.waker.clone();

        self.ctx.workers.submit(move || {
            let mut c = conn.lock().unwrap();
            let write_result = c.write();

            let close_and_notify = |c: &mut Connection<TcpStream>| {
                c.close();
            };

            match write_result {
                Ok(_) if c.is_write_complete() => {
                    if c.keep_alive() {
                        c.mark_reading();
                        let ready = c.process(&ctx.db);
                        let interest = if ready {
                            Interest::WRITABLE
                        } else {
                            Interest::READABLE
                        };
                        if c.reregister(&registry, Token(key), interest).is_err() {
                            close_and_notify(&mut c);
                            drop(c);
                            let _ = closed_tx.send(key);
                            let _ = waker.wake();
                        }
                    } else {
                        close_and_notify(&mut c);
                        drop(c);
                        let _ = closed_tx.send(key);
                        let _ = waker.wake();
                    }
                }
                Ok(_) => {
                    if c.reregister(&registry, Token(key), Interest::WRITABLE).is_err() {
                        close_and_notify(&mut c);
                        drop(c);
                        let _ = closed_tx.send(key);
                        let _ = waker.wake();
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    let _ = c.reregister(&registry, Token(key), Interest::WRITABLE);
                }
                Err(_) => {
                    close_and_notify(&mut c);
                    drop(c);
                    let _ = closed_tx.send(key);
                    let _ = waker.wake();
                }
            }
        });
    }

    fn drain_closed(&mut self) {
        while let Ok(key) = self.closed_rx.try_recv() {
            self.close_connection(key);
        }
    }

    fn close_connection(&mut self, key: usize) {
        if let Some(conn) = self.connections.try_remove(key) {
            if let Ok(mut c) = conn.lock() {
                let _ = c.deregister(&self.registry);
                c.close();
            }
            self.timers.cancel(key);
            tracing::debug!(token = key, "closed connection");
        }
    }
}
