//! Replication: the full-sync handshake and master→replica fan-out.

use std::collections::HashMap;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use flashdb_persistence::format::TakeRecord;
use flashdb_protocol::parse_command;

use crate::helpers::{ServerOptions, TestServer};

/// Decodes the full-sync payload: a tag byte, a u32 count, then
/// length-prefixed key/value pairs.
fn decode_payload(data: &[u8]) -> HashMap<Bytes, Bytes> {
    let mut cursor = std::io::Cursor::new(data);
    let tag = cursor.take_u8().unwrap();
    assert_eq!(tag, 1, "unexpected payload tag");
    let count = cursor.take_u32().unwrap();
    let mut map = HashMap::new();
    for _ in 0..count {
        let key = Bytes::from(cursor.take_field().unwrap());
        let value = Bytes::from(cursor.take_field().unwrap());
        map.insert(key, value);
    }
    assert_eq!(cursor.position() as usize, data.len(), "trailing bytes");
    map
}

async fn read_line(stream: &mut TcpStream, buf: &mut BytesMut) -> String {
    loop {
        if let Some(pos) = buf.windows(2).position(|w| w == b"\r\n") {
            let line = buf.split_to(pos + 2);
            return String::from_utf8_lossy(&line[..pos]).into_owned();
        }
        let n = stream.read_buf(buf).await.unwrap();
        assert!(n > 0, "master closed during handshake");
    }
}

#[tokio::test]
async fn full_sync_handshake_over_the_wire() {
    let server = TestServer::start();
    let mut c = server.connect().await;
    c.ok(&["SET", "k1", "v1"]).await;
    c.ok(&["SET", "k2", "v2"]).await;

    // speak the replica protocol by hand against the replication port
    let mut conn = TcpStream::connect(server.replication_addr()).await.unwrap();
    conn.write_all(b"*1\r\n$4\r\nSYNC\r\n").await.unwrap();

    let mut buf = BytesMut::new();
    let header = read_line(&mut conn, &mut buf).await;
    let size: usize = header
        .strip_prefix("+FULLSYNC ")
        .unwrap_or_else(|| panic!("unexpected header: {header:?}"))
        .parse()
        .unwrap();

    while buf.len() < size {
        let n = conn.read_buf(&mut buf).await.unwrap();
        assert!(n > 0, "master closed mid-payload");
    }
    let payload = buf.split_to(size);
    let map = decode_payload(&payload);
    assert_eq!(map.get(&Bytes::from_static(b"k1")), Some(&Bytes::from_static(b"v1")));
    assert_eq!(map.get(&Bytes::from_static(b"k2")), Some(&Bytes::from_static(b"v2")));

    let end = read_line(&mut conn, &mut buf).await;
    assert_eq!(end, "+FULLSYNC_END");

    // a client write is now streamed to us as a RESP2 frame
    c.ok(&["SET", "k3", "v3"]).await;
    let parts = loop {
        if let Some((parts, consumed)) = parse_command(&buf).unwrap() {
            let _ = buf.split_to(consumed);
            break parts;
        }
        let n = conn.read_buf(&mut buf).await.unwrap();
        assert!(n > 0, "master closed before broadcasting");
    };
    assert_eq!(
        parts,
        vec![
            Bytes::from_static(b"SET"),
            Bytes::from_static(b"k3"),
            Bytes::from_static(b"v3"),
        ]
    );
}

#[tokio::test]
async fn replica_process_follows_master() {
    let master = TestServer::start();
    let mut mc = master.connect().await;
    mc.ok(&["SET", "seed", "value"]).await;

    let replica = TestServer::start_with(ServerOptions {
        replica_of: Some(master.replication_addr()),
        ..Default::default()
    });
    let mut rc = replica.connect().await;

    // full sync lands shortly after the replica starts
    let mut synced = false;
    for _ in 0..100 {
        if rc.get_bulk(&["GET", "seed"]).await == Some("value".into()) {
            synced = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(synced, "replica never imported the full sync");

    // live writes follow
    mc.ok(&["SET", "live", "update"]).await;
    let mut streamed = false;
    for _ in 0..100 {
        if rc.get_bulk(&["GET", "live"]).await == Some("update".into()) {
            streamed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(streamed, "replica never applied the live stream");

    // deletes propagate too
    assert_eq!(mc.get_int(&["DEL", "seed"]).await, 1);
    let mut deleted = false;
    for _ in 0..100 {
        if rc.get_bulk(&["GET", "seed"]).await.is_none() {
            deleted = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(deleted, "replica never applied the delete");
}

#[tokio::test]
async fn dead_replica_does_not_fail_client_writes() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    // register a replica, then vanish without reading anything
    {
        let mut conn = TcpStream::connect(server.replication_addr()).await.unwrap();
        conn.write_all(b"*1\r\n$4\r\nSYNC\r\n").await.unwrap();
        // give the master a moment to register and start the full sync
        tokio::time::sleep(Duration::from_millis(200)).await;
    } // dropped: connection reset

    // client writes keep succeeding while the master notices and
    // drops the dead replica
    for i in 0..20 {
        c.ok(&["SET", &format!("k{i}"), "v"]).await;
    }
    assert_eq!(c.get_bulk(&["GET", "k19"]).await, Some("v".into()));
}
