//! Test helpers for spawning a flashdb-server and sending commands.

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use flashdb_protocol::{parse_frame, Frame};

/// A flashdb-server subprocess managed by the test harness.
///
/// The server runs with its working directory inside a temp dir, so the
/// default snapshot/AOF/cluster-config paths all land there.
pub struct TestServer {
    child: Child,
    pub port: u16,
    pub addr: String,
    /// Owned temp directory, cleaned up when the server drops. `None`
    /// when the caller manages the directory (restart scenarios).
    _data_dir: Option<tempfile::TempDir>,
}

/// Options for starting a test server.
#[derive(Default)]
pub struct ServerOptions {
    /// The local node's slot range in `cluster.json`. Defaults to the
    /// whole universe.
    pub slots: Option<(u16, u16)>,
    /// An extra node to list in `cluster.json`: (addr, slot range).
    pub other_node: Option<(String, (u16, u16))>,
    /// Start in replica mode, pulling from this replication address.
    pub replica_of: Option<String>,
    /// Use an existing data directory instead of a fresh temp dir.
    /// The caller keeps ownership (for restart scenarios).
    pub data_dir: Option<PathBuf>,
}

impl TestServer {
    /// Starts a server owning all slots in a fresh temp dir.
    pub fn start() -> Self {
        Self::start_with(ServerOptions::default())
    }

    /// Starts a server with custom options. Blocks until it accepts
    /// connections (up to 5 seconds).
    pub fn start_with(opts: ServerOptions) -> Self {
        let port = find_free_port_pair();
        let addr = format!("127.0.0.1:{port}");

        let (owned_dir, dir_path) = match opts.data_dir {
            Some(path) => (None, path),
            None => {
                let dir = tempfile::tempdir().expect("create temp dir");
                let path = dir.path().to_path_buf();
                (Some(dir), path)
            }
        };

        let (lo, hi) = opts.slots.unwrap_or((0, 1023));
        let mut nodes = vec![json!({
            "id": "self",
            "addr": addr,
            "role": if opts.replica_of.is_some() { "replica" } else { "master" },
            "slots": [lo, hi],
            "replicas": [],
        })];
        if let Some((other_addr, (olo, ohi))) = &opts.other_node {
            nodes.push(json!({
                "id": "other",
                "addr": other_addr,
                "role": "master",
                "slots": [olo, ohi],
                "replicas": [],
            }));
        }
        std::fs::write(
            dir_path.join("cluster.json"),
            serde_json::to_vec_pretty(&json!({ "nodes": nodes })).unwrap(),
        )
        .expect("write cluster.json");

        let mut cmd = Command::new(server_binary());
        cmd.current_dir(&dir_path);
        cmd.env("FLASHDB_ADDR", &addr);
        // suppress tracing output in tests
        cmd.env("RUST_LOG", "error");
        if let Some(master) = &opts.replica_of {
            cmd.env("FLASHDB_ROLE", "replica");
            cmd.env("FLASHDB_MASTER_ADDR", master);
        }

        let child = cmd
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .expect("failed to spawn flashdb-server");

        // wait for the server to be ready
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        loop {
            if std::time::Instant::now() > deadline {
                panic!("flashdb-server failed to start within 5 seconds on port {port}");
            }
            if std::net::TcpStream::connect(&addr).is_ok() {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        Self {
            child,
            port,
            addr,
            _data_dir: owned_dir,
        }
    }

    /// The replication listener address (client port + 10000).
    pub fn replication_addr(&self) -> String {
        format!("127.0.0.1:{}", self.port + 10000)
    }

    /// Connects a test client to this server.
    pub async fn connect(&self) -> TestClient {
        TestClient::connect(&self.addr).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// A minimal RESP2 client for integration testing.
pub struct TestClient {
    pub stream: TcpStream,
    buf: BytesMut,
}

impl TestClient {
    pub async fn connect(addr: &str) -> Self {
        let stream = TcpStream::connect(addr)
            .await
            .unwrap_or_else(|e| panic!("failed to connect to {addr}: {e}"));
        Self {
            stream,
            buf: BytesMut::with_capacity(4096),
        }
    }

    /// Sends a command and returns the parsed response frame.
    pub async fn cmd(&mut self, args: &[&str]) -> Frame {
        let parts: Vec<Bytes> = args
            .iter()
            .map(|a| Bytes::copy_from_slice(a.as_bytes()))
            .collect();
        let mut out = BytesMut::new();
        flashdb_protocol::encode_command(&parts, &mut out);
        self.stream.write_all(&out).await.unwrap();
        self.read_frame().await
    }

    /// Reads the next frame from the connection.
    pub async fn read_frame(&mut self) -> Frame {
        loop {
            match parse_frame(&self.buf) {
                Ok(Some((frame, consumed))) => {
                    let _ = self.buf.split_to(consumed);
                    return frame;
                }
                Ok(None) => {
                    let n = self.stream.read_buf(&mut self.buf).await.unwrap();
                    if n == 0 {
                        panic!("server closed connection while waiting for a frame");
                    }
                }
                Err(e) => panic!("protocol error: {e}"),
            }
        }
    }

    /// Sends a command and expects a Simple "OK" response.
    pub async fn ok(&mut self, args: &[&str]) {
        match self.cmd(args).await {
            Frame::Simple(s) if s == "OK" => {}
            other => panic!("expected OK, got {other:?}"),
        }
    }

    /// Sends a command and extracts the bulk string value, or `None`
    /// for the nil bulk.
    pub async fn get_bulk(&mut self, args: &[&str]) -> Option<String> {
        match self.cmd(args).await {
            Frame::Bulk(data) => Some(String::from_utf8_lossy(&data).to_string()),
            Frame::NullBulk => None,
            other => panic!("expected Bulk or NullBulk, got {other:?}"),
        }
    }

    /// Sends a command and extracts the integer value.
    pub async fn get_int(&mut self, args: &[&str]) -> i64 {
        match self.cmd(args).await {
            Frame::Integer(n) => n,
            other => panic!("expected Integer, got {other:?}"),
        }
    }

    /// Sends a command and expects an error. Returns the message.
    pub async fn err(&mut self, args: &[&str]) -> String {
        match self.cmd(args).await {
            Frame::Error(msg) => msg,
            other => panic!("expected Error, got {other:?}"),
        }
    }
}

/// Finds a free port whose replication counterpart (port + 10000) is
/// also bindable and within the valid range.
fn find_free_port_pair() -> u16 {
    for _ in 0..64 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        if port > 55_535 {
            continue;
        }
        if TcpListener::bind(("127.0.0.1", port + 10000)).is_ok() {
            return port;
        }
    }
    panic!("could not find a usable port pair");
}

/// Locates the flashdb-server binary in the cargo target directory.
fn server_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    // test binary is in target/debug/deps/ — go up to target/debug/
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("flashdb-server");
    if !path.exists() {
        panic!(
            "flashdb-server binary not found. run `cargo build` first.\nlooked at: {}",
            path.display()
        );
    }
    path
}
