//! Replication: master-side fan-out and the replica-side client.
//!
//! A replica opens a TCP connection to the master's replication
//! listener (client port + 10000) and sends the literal `SYNC` command
//! as a RESP2 array. The master answers with a full sync —
//! `+FULLSYNC <n>\r\n`, `n` payload bytes, `+FULLSYNC_END\r\n` — and
//! then streams every accepted write as a RESP2 frame for the rest of
//! the session.
//!
//! The full-sync payload is a tagged binary map: a tag byte, a `u32`
//! entry count, then length-prefixed key/value pairs, little-endian
//! throughout. TTLs are dropped on export, so a freshly synced replica
//! holds values only.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use flashdb_core::Store;
use flashdb_persistence::format::{FormatError, PutRecord, TakeRecord};
use flashdb_protocol::{encode_command, parse_command};

/// The replication listener sits this many ports above the client port.
const REPL_PORT_OFFSET: u16 = 10000;

/// The exact handshake frame a replica sends.
const SYNC_FRAME: &[u8] = b"*1\r\n$4\r\nSYNC\r\n";

/// Payload tag for a plain key→value map.
const PAYLOAD_TAG_KV_MAP: u8 = 1;

/// How long a replica waits after a parse error before retrying the
/// stream.
const REPLICA_RETRY_DELAY: Duration = Duration::from_secs(3);

/// How often a master-side handler re-checks that it is still
/// registered (a failed broadcast may have removed it).
const LIVENESS_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Derives the replication listener address from the client bind
/// address.
pub fn replication_addr(client_addr: &str) -> Result<String, String> {
    let (host, port) = client_addr
        .rsplit_once(':')
        .ok_or_else(|| format!("address '{client_addr}' has no port"))?;
    let port: u16 = port
        .parse()
        .map_err(|_| format!("address '{client_addr}' has a non-numeric port"))?;
    let repl_port = port
        .checked_add(REPL_PORT_OFFSET)
        .ok_or_else(|| format!("replication port for '{client_addr}' exceeds 65535"))?;
    Ok(format!("{host}:{repl_port}"))
}

// ---------------------------------------------------------------------------
// full-sync payload codec
// ---------------------------------------------------------------------------

/// Encodes an exported key→value map as the full-sync payload.
pub fn encode_sync_payload(map: &HashMap<Bytes, Bytes>) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.put_u8(PAYLOAD_TAG_KV_MAP).expect("vec write");
    buf.put_u32(map.len() as u32).expect("vec write");
    for (key, value) in map {
        buf.put_field(key).expect("vec write");
        buf.put_field(value).expect("vec write");
    }
    buf
}

/// Decodes a full-sync payload back into a key→value map.
pub fn decode_sync_payload(data: &[u8]) -> Result<HashMap<Bytes, Bytes>, FormatError> {
    let mut cursor = io::Cursor::new(data);

    let tag = cursor.take_u8()?;
    if tag != PAYLOAD_TAG_KV_MAP {
        return Err(FormatError::UnknownTag(tag));
    }

    let count = cursor.take_u32()?;
    let mut map = HashMap::with_capacity((count as usize).min(65_536));
    for _ in 0..count {
        let key = Bytes::from(cursor.take_field()?);
        let value = Bytes::from(cursor.take_field()?);
        map.insert(key, value);
    }

    if cursor.position() as usize != data.len() {
        return Err(FormatError::InvalidData(
            "trailing bytes after sync payload".into(),
        ));
    }
    Ok(map)
}

// ---------------------------------------------------------------------------
// master side
// ---------------------------------------------------------------------------

/// One live replica connection: the write half, shared between the
/// handshake, the broadcast fan-out, and nobody else.
struct ReplicaHandle {
    id: u64,
    peer: String,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
}

/// Master-side replication state: the set of live replicas.
pub struct ReplicationMaster {
    store: Arc<Store>,
    replicas: Mutex<HashMap<u64, Arc<ReplicaHandle>>>,
    next_id: AtomicU64,
}

impl ReplicationMaster {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            replicas: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Binds the replication listener and serves replica connections
    /// until the stop signal fires.
    pub async fn bind_and_serve(self: Arc<Self>, addr: String, stop: broadcast::Receiver<()>) {
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(%addr, "replication listener failed: {e}");
                return;
            }
        };
        info!(%addr, "replication listener ready");
        self.serve(listener, stop).await;
    }

    /// Accept loop over an already-bound listener.
    pub async fn serve(self: Arc<Self>, listener: TcpListener, mut stop: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = stop.recv() => return,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let master = Arc::clone(&self);
                        tokio::spawn(master.handle_replica(stream));
                    }
                    Err(e) => error!("replication accept error: {e}"),
                }
            }
        }
    }

    /// Drives one replica connection: handshake, full sync, then hold
    /// the socket open watching for disconnect.
    async fn handle_replica(self: Arc<Self>, mut stream: TcpStream) {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".into());

        // the handshake is a single SYNC frame
        if let Err(e) = read_sync_request(&mut stream).await {
            warn!(%peer, "bad replication handshake: {e}");
            return;
        }

        let (mut read_half, write_half) = stream.into_split();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(ReplicaHandle {
            id,
            peer: peer.clone(),
            writer: tokio::sync::Mutex::new(write_half),
        });
        self.lock_replicas().insert(id, Arc::clone(&handle));
        info!(%peer, "replica connected");

        // a failed full sync aborts the registration; the replica must
        // reconnect to retry
        if let Err(e) = self.full_sync(&handle).await {
            warn!(%peer, "full sync failed: {e}");
            self.remove(id);
            return;
        }
        info!(%peer, "full sync complete");

        // liveness: the replica sends nothing after SYNC, so a resolved
        // peek means EOF or error. The tick re-checks registration in
        // case a failed broadcast removed us concurrently.
        let mut probe = [0u8; 1];
        let mut tick = tokio::time::interval(LIVENESS_CHECK_INTERVAL);
        tick.tick().await;
        loop {
            tokio::select! {
                res = read_half.peek(&mut probe) => match res {
                    Ok(0) => {
                        info!(%peer, "replica disconnected");
                        self.remove(id);
                        return;
                    }
                    Ok(_) => {
                        // unexpected chatter; leave it unread and back off
                        tokio::time::sleep(LIVENESS_CHECK_INTERVAL).await;
                    }
                    Err(e) => {
                        warn!(%peer, "replica read error: {e}");
                        self.remove(id);
                        return;
                    }
                },
                _ = tick.tick() => {
                    if !self.lock_replicas().contains_key(&id) {
                        return;
                    }
                }
            }
        }
    }

    /// Sends the current dataset to one replica.
    async fn full_sync(&self, handle: &ReplicaHandle) -> io::Result<()> {
        let payload = encode_sync_payload(&self.store.export());

        let mut writer = handle.writer.lock().await;
        writer
            .write_all(format!("+FULLSYNC {}\r\n", payload.len()).as_bytes())
            .await?;
        writer.write_all(&payload).await?;
        writer.write_all(b"+FULLSYNC_END\r\n").await?;
        writer.flush().await?;
        Ok(())
    }

    /// Fans a write out to every live replica.
    ///
    /// The replica set is snapshotted under the lock and the sends run
    /// concurrently without it. A send failure drops that replica only;
    /// the client write that triggered the broadcast is unaffected.
    pub fn broadcast(self: &Arc<Self>, parts: &[Bytes]) {
        let targets: Vec<Arc<ReplicaHandle>> = {
            let replicas = self.lock_replicas();
            if replicas.is_empty() {
                return;
            }
            replicas.values().cloned().collect()
        };

        let mut cmd = BytesMut::new();
        encode_command(parts, &mut cmd);
        let cmd = cmd.freeze();

        for handle in targets {
            let master = Arc::clone(self);
            let cmd = cmd.clone();
            tokio::spawn(async move {
                let mut writer = handle.writer.lock().await;
                if let Err(e) = writer.write_all(&cmd).await {
                    warn!(peer = %handle.peer, "replica send failed, dropping: {e}");
                    drop(writer);
                    master.remove(handle.id);
                }
            });
        }
    }

    /// Number of currently registered replicas.
    pub fn replica_count(&self) -> usize {
        self.lock_replicas().len()
    }

    fn remove(&self, id: u64) {
        if self.lock_replicas().remove(&id).is_some() {
            debug!(id, "replica removed");
        }
    }

    fn lock_replicas(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Arc<ReplicaHandle>>> {
        self.replicas.lock().expect("replica set mutex poisoned")
    }
}

/// Reads and validates the replica's SYNC handshake frame.
async fn read_sync_request(stream: &mut TcpStream) -> io::Result<()> {
    let mut buf = BytesMut::with_capacity(64);
    loop {
        match parse_command(&buf) {
            Ok(Some((parts, _))) => {
                let ok = parts.len() == 1 && parts[0].eq_ignore_ascii_case(b"SYNC");
                return if ok {
                    Ok(())
                } else {
                    Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "expected SYNC command",
                    ))
                };
            }
            Ok(None) => {
                let n = stream.read_buf(&mut buf).await?;
                if n == 0 {
                    return Err(io::ErrorKind::UnexpectedEof.into());
                }
            }
            Err(e) => {
                return Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string()));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// replica side
// ---------------------------------------------------------------------------

/// Replica-side client: consumes a master's full sync and live stream,
/// applying both to the local store.
pub struct ReplicationReplica {
    store: Arc<Store>,
    master_addr: String,
}

impl ReplicationReplica {
    /// Spawns the replication client in a background task.
    pub fn start(master_addr: String, store: Arc<Store>) {
        let replica = Self { store, master_addr };
        tokio::spawn(async move {
            replica.run().await;
        });
    }

    async fn run(&self) {
        let stream = match TcpStream::connect(&self.master_addr).await {
            Ok(stream) => stream,
            Err(e) => {
                error!(master = %self.master_addr, "failed to connect to master: {e}");
                return;
            }
        };
        info!(master = %self.master_addr, "connected to master");

        if let Err(e) = self.sync(stream).await {
            error!("replication stream ended: {e}");
        }
    }

    /// One replication session: handshake, full sync, live stream.
    async fn sync(&self, mut stream: TcpStream) -> io::Result<()> {
        stream.write_all(SYNC_FRAME).await?;

        let mut buf = BytesMut::with_capacity(4096);

        // +FULLSYNC <n>
        let header = read_line(&mut stream, &mut buf).await?;
        let size = parse_fullsync_header(&header).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unexpected full sync header: {header:?}"),
            )
        })?;
        debug!(bytes = size, "receiving full sync");

        // exactly `size` payload bytes
        while buf.len() < size {
            let n = stream.read_buf(&mut buf).await?;
            if n == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
        }
        let payload = buf.split_to(size);
        let map = decode_sync_payload(&payload)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        let imported = map.len();
        self.store.import(map);

        let end = read_line(&mut stream, &mut buf).await?;
        if end != "+FULLSYNC_END" {
            warn!(marker = %end, "unexpected full sync end marker");
        }
        info!(keys = imported, "full sync imported");

        // live stream: apply frames until the master goes away
        loop {
            match parse_command(&buf) {
                Ok(Some((parts, consumed))) => {
                    let _ = buf.split_to(consumed);
                    self.apply(&parts);
                }
                Ok(None) => {
                    let n = stream.read_buf(&mut buf).await?;
                    if n == 0 {
                        info!("master closed the replication stream");
                        return Ok(());
                    }
                }
                Err(e) => {
                    warn!("replication parse error, backing off: {e}");
                    buf.clear();
                    tokio::time::sleep(REPLICA_RETRY_DELAY).await;
                }
            }
        }
    }

    /// Applies one broadcast command to the local store.
    ///
    /// Only SET and DEL are meaningful on the stream; SET applies with
    /// no TTL, the same asymmetry full sync has.
    fn apply(&self, parts: &[Bytes]) {
        if parts.is_empty() {
            return;
        }
        let name = parts[0].to_ascii_uppercase();
        match name.as_slice() {
            b"SET" if parts.len() >= 3 => {
                self.store.set(parts[1].clone(), parts[2].clone(), None);
            }
            b"DEL" if parts.len() >= 2 => {
                self.store.delete(&parts[1]);
            }
            other => {
                debug!(
                    command = %String::from_utf8_lossy(other),
                    "ignoring replicated command"
                );
            }
        }
    }
}

/// Parses `+FULLSYNC <n>` into the payload byte count.
fn parse_fullsync_header(line: &str) -> Option<usize> {
    let rest = line.strip_prefix("+FULLSYNC")?.trim();
    rest.parse().ok()
}

/// Reads one CRLF-terminated line, leaving any bytes after it in `buf`.
async fn read_line(stream: &mut TcpStream, buf: &mut BytesMut) -> io::Result<String> {
    loop {
        if let Some(pos) = buf.windows(2).position(|w| w == b"\r\n") {
            let line = buf.split_to(pos + 2);
            return Ok(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        let n = stream.read_buf(buf).await?;
        if n == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
    }
}
