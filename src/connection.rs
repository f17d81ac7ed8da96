//! Per-connection state machine tying buffers, parser, and response
//! builder together.
//!
//! The connection's position in its lifecycle is modeled explicitly as
//! a Rust enum rather than an always-present iovec pair: the writev
//! body offset only exists while `state` is `Writing`.

use std::io::{self, IoSlice, Read, Write};
use std::net::SocketAddr;

use crate::auth;
use crate::buffer::Buffer;
use crate::http::{ParseOutcome, ParseState, Request, Response};
use crate::pool::DbPool;

/// Writev batching threshold past which a level-triggered connection
/// keeps looping rather than yielding back to the reactor.
const WRITE_BATCH_THRESHOLD: usize = 10_240;

const INITIAL_BUFFER_CAPACITY: usize = 4096;

/// The connection's position in its read/process/write/teardown cycle.
/// The writev body offset is only meaningful in `Writing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Reading,
    Processing,
    Writing { body_sent: usize },
    Closed,
}

/// A single client connection: socket, buffers, in-flight request and
/// response, and the state tag above.
pub struct Connection<S> {
    stream: S,
    peer: SocketAddr,
    read_buf: Buffer,
    write_buf: Buffer,
    request: Request,
    response: Response,
    state: ConnState,
    edge_triggered: bool,
}

impl<S> Connection<S>
where
    S: Read + Write,
{
    /// Creates a freshly accepted connection. Connections are not
    /// pooled/reused across clients, so initialization lives entirely in
    /// the constructor rather than a separate `init` step.
    pub fn new(
        stream: S,
        peer: SocketAddr,
        doc_root: impl Into<std::path::PathBuf>,
        edge_triggered: bool,
    ) -> Self {
        Connection {
            stream,
            peer,
            read_buf: Buffer::with_capacity(INITIAL_BUFFER_CAPACITY),
            write_buf: Buffer::with_capacity(INITIAL_BUFFER_CAPACITY),
            request: Request::default(),
            response: Response::new(doc_root),
            state: ConnState::Reading,
            edge_triggered,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, ConnState::Closed)
    }

    /// Whether the in-flight request asked to keep the connection open,
    /// valid once a response has been built for it.
    pub fn keep_alive(&self) -> bool {
        self.response.keep_alive()
    }

    /// Reads from the socket into `read_buf`. On an edge-triggered
    /// registration, drains until `WouldBlock`; otherwise performs a
    /// single read. Returns the total bytes read; `Ok(0)` (with no prior
    /// bytes read this call) signals a peer hangup the caller should
    /// treat as a close.
    pub fn read(&mut self) -> io::Result<usize> {
        let mut total = 0usize;
        loop {
            match self.read_buf.read_fd(&mut self.stream) {
                Ok(0) => {
                    if total == 0 {
                        return Ok(0);
                    }
                    break;
                }
                Ok(n) => {
                    total += n;
                    if !self.edge_triggered {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    /// Parses as much of a request as `read_buf` currently allows and,
    /// once complete, builds the response into `write_buf`. Returns
    /// `true` once a response is ready to write, `false` if there is
    /// nothing to do yet (no bytes, or an in-progress parse still
    /// waiting on more data).
    ///
    /// `request.init()` is only called when the previous request fully
    /// finished (`ParseState::Finish`) — on keep-alive reuse this gives
    /// an idempotent reset between requests, while a request split
    /// across multiple readiness events keeps its parser state instead
    /// of restarting from scratch every call.
    pub fn process(&mut self, db: &DbPool) -> bool {
        self.state = ConnState::Processing;

        if self.request.state.0 == ParseState::Finish {
            self.request.init();
        }

        if self.read_buf.readable() == 0 {
            self.state = ConnState::Reading;
            return false;
        }

        match self.request.parse(&mut self.read_buf) {
            ParseOutcome::Incomplete => {
                self.state = ConnState::Reading;
                false
            }
            ParseOutcome::Complete => {
                self.build_response(db);
                true
            }
            ParseOutcome::Failed(code) => {
                self.response.init(&self.request.path, false, Some(code));
                self.finish_response();
                true
            }
        }
    }

    fn build_response(&mut self, db: &DbPool) {
        let keep_alive = self.request.is_keep_alive();

        let auth_target = if self.request.method == "POST" {
            auth::action_for_path(&self.request.path)
                .map(|action| auth::authenticate(action, &self.request.form, db))
        } else {
            None
        };

        match auth_target {
            Some(path) => self.response.init(&path, keep_alive, Some(200)),
            None => self.response.init(&self.request.path, keep_alive, None),
        }
        self.finish_response();
    }

    fn finish_response(&mut self) {
        self.write_buf.retrieve_all();
        self.response.make_response(&mut self.write_buf);
        self.state = ConnState::Writing { body_sent: 0 };
    }

    /// Writes the header buffer and any mapped body via a single
    /// scatter/gather call, looping while edge-triggered or while more
    /// than [`WRITE_BATCH_THRESHOLD`] bytes remain, adjusting slot
    /// offsets after every partial write. Stops (without error) on
    /// `WouldBlock`.
    pub fn write(&mut self) -> io::Result<usize> {
        let mut total_written = 0usize;
        loop {
            let header = self.write_buf.peek();
            let body_all = self.response.mapped_body().unwrap_or(&[]);
            let body_sent = self.writing_body_sent();
            let body_remaining = &body_all[body_sent.min(body_all.len())..];

            if header.is_empty() && body_remaining.is_empty() {
                break;
            }

            let pending = header.len() + body_remaining.len();
            let slices = [IoSlice::new(header), IoSlice::new(body_remaining)];
            let n = match self.stream.write_vectored(&slices) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "peer closed during write",
                    ))
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            };
            total_written += n;

            let header_len = header.len();
            let consumed_header = n.min(header_len);
            self.write_buf.retrieve(consumed_header);
            if self.write_buf.readable() == 0 {
                self.write_buf.retrieve_all();
            }

            let consumed_body = n - consumed_header;
            if consumed_body > 0 {
                if let ConnState::Writing { body_sent } = &mut self.state {
                    *body_sent += consumed_body;
                }
            }

            let remaining_after = pending - n;
            if remaining_after == 0 {
                break;
            }
            if !self.edge_triggered && remaining_after <= WRITE_BATCH_THRESHOLD {
                break;
            }
        }
        Ok(total_written)
    }

    fn writing_body_sent(&self) -> usize {
        match self.state {
            ConnState::Writing { body_sent } => body_sent,
            _ => 0,
        }
    }

    /// Whether the current response has been fully flushed to the
    /// socket: the header buffer is drained and, if a body is mapped,
    /// every byte of it has been written too.
    pub fn is_write_complete(&self) -> bool {
        if self.write_buf.readable() != 0 {
            return false;
        }
        let body_len = self.response.mapped_body().map(<[u8]>::len).unwrap_or(0);
        self.writing_body_sent() >= body_len
    }

    /// Returns the connection to the `Reading` state to await the next
    /// request, e.g. after a keep-alive write completed but no further
    /// bytes were immediately available to parse.
    pub fn mark_reading(&mut self) {
        self.state = ConnState::Reading;
    }

    /// Tears down the connection. Idempotent; the mapped response body
    /// and the socket itself are released by ordinary `Drop` once the
    /// reactor removes this `Connection` from its table.
    pub fn close(&mut self) {
        self.state = ConnState::Closed;
    }
}

/// Readiness-notifier bookkeeping. Split from the core `Read + Write`
/// impl since only real `mio` sources need it — the `MockStream` test
/// double above has no business implementing `mio::event::Source`.
impl<S> Connection<S>
where
    S: Read + Write + mio::event::Source,
{
    pub fn register(
        &mut self,
        registry: &mio::Registry,
        token: mio::Token,
        interest: mio::Interest,
    ) -> io::Result<()> {
        registry.register(&mut self.stream, token, interest)
    }

    pub fn reregister(
        &mut self,
        registry: &mio::Registry,
        token: mio::Token,
        interest: mio::Interest,
    ) -> io::Result<()> {
        registry.reregister(&mut self.stream, token, interest)
    }

    pub fn deregister(&mut self, registry: &mio::Registry) -> io::Result<()> {
        registry.deregister(&mut self.stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::net::{IpAddr, Ipv4Addr};

    /// An in-memory duplex stream: `inbound` feeds `read`, `outbound`
    /// collects everything written. Stands in for a `TcpStream` in unit
    /// tests without touching a real socket.
    struct MockStream {
        inbound: VecDeque<u8>,
        outbound: Vec<u8>,
    }

    impl MockStream {
        fn new(input: &[u8]) -> Self {
            MockStream {
                inbound: input.iter().copied().collect(),
                outbound: Vec::new(),
            }
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.inbound.is_empty() {
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
            let n = buf.len().min(self.inbound.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.inbound.pop_front().unwrap();
            }
            Ok(n)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.outbound.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
            let mut n = 0;
            for b in bufs {
                self.outbound.extend_from_slice(b);
                n += b.len();
            }
            Ok(n)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn peer() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9000)
    }

    fn doc_root() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), b"hello").unwrap();
        std::fs::write(dir.path().join("400.html"), b"bad request").unwrap();
        dir
    }

    #[test]
    fn read_then_process_produces_200_response() {
        let dir = doc_root();
        let stream = MockStream::new(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n");
        let mut conn = Connection::new(stream, peer(), dir.path(), false);
        assert_eq!(conn.read().unwrap(), 38);

        let db = test_db_pool();
        assert!(conn.process(&db));
        assert_eq!(conn.state(), ConnState::Writing { body_sent: 0 });
        assert!(!conn.keep_alive());
    }

    #[test]
    fn malformed_request_line_yields_400_and_closes() {
        let dir = doc_root();
        let stream = MockStream::new(b"BOGUS\r\n\r\n");
        let mut conn = Connection::new(stream, peer(), dir.path(), false);
        conn.read().unwrap();
        let db = test_db_pool();
        assert!(conn.process(&db));
        assert!(!conn.keep_alive());
    }

    #[test]
    fn write_drains_header_and_mapped_body() {
        let dir = doc_root();
        let stream = MockStream::new(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n");
        let mut conn = Connection::new(stream, peer(), dir.path(), false);
        conn.read().unwrap();
        let db = test_db_pool();
        conn.process(&db);
        conn.write().unwrap();
        assert!(conn.is_write_complete());
        assert!(conn.stream.outbound.ends_with(b"hello"));
    }

    fn test_db_pool() -> DbPool {
        crate::pool::db::testing::empty_pool(0)
    }
}
