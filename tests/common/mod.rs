//! Shared scaffolding for the end-to-end scenario tests. Spins up a
//! real `Reactor` against a loopback ephemeral port and a temporary
//! document root, with `db.pool_size = 0` so no live MariaDB/MySQL
//! server is required for the scenarios that don't touch auth.

use std::fs;
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use reactor_web::config::ServerConfig;
use reactor_web::context::ServerContext;
use reactor_web::reactor::Reactor;

pub struct TestServer {
    pub addr: SocketAddr,
    pub doc_root: tempfile::TempDir,
}

impl TestServer {
    pub fn connect(&self) -> TcpStream {
        let stream = TcpStream::connect(self.addr).expect("connect to test server");
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        stream
    }
}

/// Starts a reactor on a background thread with the given idle timeout
/// and returns a handle once the listening port is known. The reactor
/// thread is never joined — it runs for the life of the test process.
pub fn start_server(idle_timeout_ms: u64) -> TestServer {
    let doc_root = tempfile::tempdir().unwrap();
    fs::write(doc_root.path().join("index.html"), b"<html>home</html>").unwrap();
    fs::write(doc_root.path().join("400.html"), b"<html>bad request</html>").unwrap();
    fs::write(doc_root.path().join("404.html"), b"<html>missing</html>").unwrap();
    fs::write(doc_root.path().join("403.html"), b"<html>forbidden</html>").unwrap();

    let mut config = ServerConfig::default();
    config.port = 0;
    config.doc_root = doc_root.path().to_string_lossy().into_owned();
    config.db.pool_size = 0;
    config.worker_threads = 2;
    config.idle_timeout_ms = idle_timeout_ms;
    config.log.enabled = false;

    let ctx = Arc::new(ServerContext::new(&config).expect("build test server context"));
    let mut reactor = Reactor::bind(
        SocketAddr::from(([127, 0, 0, 1], config.port)),
        config.linger,
        ctx,
    )
    .expect("bind test reactor");
    let addr = reactor.local_addr().expect("reactor local addr");

    thread::spawn(move || {
        let _ = reactor.run();
    });
    // give the reactor thread a moment to enter its poll loop.
    thread::sleep(Duration::from_millis(50));

    TestServer { addr, doc_root }
}
