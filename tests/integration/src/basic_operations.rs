//! Point operations and housekeeping over a real connection.

use std::time::Duration;

use flashdb_protocol::Frame;

use crate::helpers::TestServer;

#[tokio::test]
async fn ping_and_echo() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    assert_eq!(c.cmd(&["PING"]).await, Frame::Simple("PONG".into()));
    assert_eq!(
        c.cmd(&["PING", "hello"]).await,
        Frame::Simple("hello".into())
    );
}

#[tokio::test]
async fn set_get_del_exists() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["SET", "foo", "bar"]).await;
    assert_eq!(c.get_bulk(&["GET", "foo"]).await, Some("bar".into()));
    assert_eq!(c.get_int(&["EXISTS", "foo"]).await, 1);

    assert_eq!(c.get_int(&["DEL", "foo"]).await, 1);
    assert_eq!(c.get_bulk(&["GET", "foo"]).await, None);
    assert_eq!(c.get_int(&["EXISTS", "foo"]).await, 0);
}

#[tokio::test]
async fn del_missing_key_is_an_error() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    let msg = c.err(&["DEL", "ghost"]).await;
    assert!(msg.starts_with("ERR"), "got: {msg}");
}

#[tokio::test]
async fn ttl_expiry_end_to_end() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["SET", "foo", "bar", "1"]).await;
    assert_eq!(c.get_bulk(&["GET", "foo"]).await, Some("bar".into()));

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(c.get_bulk(&["GET", "foo"]).await, None);
    assert_eq!(c.get_int(&["TTL", "foo"]).await, -2);
}

#[tokio::test]
async fn ttl_without_expiry_then_expire() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["SET", "x", "y"]).await;
    assert_eq!(c.get_int(&["TTL", "x"]).await, -1);

    assert_eq!(c.get_int(&["EXPIRE", "x", "5"]).await, 1);
    let ttl = c.get_int(&["TTL", "x"]).await;
    assert!((4..=6).contains(&ttl), "ttl was {ttl}");
}

#[tokio::test]
async fn set_with_ex_option() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    c.ok(&["SET", "foo", "bar", "EX", "30"]).await;
    let ttl = c.get_int(&["TTL", "foo"]).await;
    assert!((29..=31).contains(&ttl), "ttl was {ttl}");
}

#[tokio::test]
async fn expire_missing_key_is_zero() {
    let server = TestServer::start();
    let mut c = server.connect().await;
    assert_eq!(c.get_int(&["EXPIRE", "ghost", "5"]).await, 0);
}

#[tokio::test]
async fn arity_and_unknown_command_errors() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    let msg = c.err(&["SET", "onlykey"]).await;
    assert_eq!(msg, "ERR wrong number of arguments for 'SET' command");

    let msg = c.err(&["GIBBERISH", "arg"]).await;
    assert!(msg.contains("unknown command"), "got: {msg}");

    // the connection stays usable after a command-level error
    c.ok(&["SET", "still", "alive"]).await;
}

#[tokio::test]
async fn info_and_command_replies() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    match c.cmd(&["INFO"]).await {
        Frame::Bulk(text) => {
            let text = String::from_utf8_lossy(&text).into_owned();
            assert!(text.contains("uptime_in_seconds:"), "got: {text}");
        }
        other => panic!("expected bulk INFO reply, got {other:?}"),
    }

    assert_eq!(c.cmd(&["COMMAND"]).await, Frame::Array(vec![]));
}

#[tokio::test]
async fn pipelined_commands_reply_in_order() {
    use tokio::io::AsyncWriteExt;

    let server = TestServer::start();
    let mut c = server.connect().await;

    // three requests in a single write
    let batch = b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n\
                  *2\r\n$3\r\nGET\r\n$1\r\na\r\n\
                  *1\r\n$4\r\nPING\r\n";
    c.stream.write_all(batch).await.unwrap();

    assert_eq!(c.read_frame().await, Frame::Simple("OK".into()));
    assert_eq!(
        c.read_frame().await,
        Frame::Bulk(bytes::Bytes::from_static(b"1"))
    );
    assert_eq!(c.read_frame().await, Frame::Simple("PONG".into()));
}
