//! Snapshot and AOF recovery across server restarts.

use crate::helpers::{ServerOptions, TestServer};

#[tokio::test]
async fn aof_replay_across_restart() {
    let data_dir = tempfile::tempdir().unwrap();
    let path = data_dir.path().to_path_buf();

    {
        let server = TestServer::start_with(ServerOptions {
            data_dir: Some(path.clone()),
            ..Default::default()
        });
        let mut c = server.connect().await;

        c.ok(&["SET", "a", "1"]).await;
        c.ok(&["SET", "b", "2", "60"]).await;
        assert_eq!(c.get_int(&["DEL", "a"]).await, 1);
    }
    // server killed on drop; the journal survives in data_dir

    let server = TestServer::start_with(ServerOptions {
        data_dir: Some(path),
        ..Default::default()
    });
    let mut c = server.connect().await;

    assert_eq!(c.get_bulk(&["GET", "a"]).await, None);
    assert_eq!(c.get_bulk(&["GET", "b"]).await, Some("2".into()));
    let ttl = c.get_int(&["TTL", "b"]).await;
    assert!((58..=61).contains(&ttl), "ttl was {ttl}");

    drop(data_dir);
}

#[tokio::test]
async fn save_then_restart_recovers_snapshot_plus_tail() {
    let data_dir = tempfile::tempdir().unwrap();
    let path = data_dir.path().to_path_buf();

    {
        let server = TestServer::start_with(ServerOptions {
            data_dir: Some(path.clone()),
            ..Default::default()
        });
        let mut c = server.connect().await;

        c.ok(&["SET", "snap:a", "alpha"]).await;
        c.ok(&["SET", "snap:b", "beta"]).await;
        c.ok(&["SAVE"]).await;
        // post-snapshot write lands in the freshly reset journal
        c.ok(&["SET", "tail", "gamma"]).await;
    }

    let server = TestServer::start_with(ServerOptions {
        data_dir: Some(path.clone()),
        ..Default::default()
    });
    let mut c = server.connect().await;

    assert_eq!(c.get_bulk(&["GET", "snap:a"]).await, Some("alpha".into()));
    assert_eq!(c.get_bulk(&["GET", "snap:b"]).await, Some("beta".into()));
    assert_eq!(c.get_bulk(&["GET", "tail"]).await, Some("gamma".into()));

    // the snapshot file exists and starts with the right magic
    let snapshot = std::fs::read(path.join("snapshot.fdb")).unwrap();
    assert_eq!(&snapshot[..4], b"FDB1");

    drop(data_dir);
}

#[tokio::test]
async fn bad_snapshot_magic_leaves_store_empty_but_serving() {
    let data_dir = tempfile::tempdir().unwrap();
    let path = data_dir.path().to_path_buf();
    std::fs::write(path.join("snapshot.fdb"), b"XXXXnot-a-snapshot").unwrap();

    let server = TestServer::start_with(ServerOptions {
        data_dir: Some(path),
        ..Default::default()
    });
    let mut c = server.connect().await;

    // nothing was loaded, but the server is healthy
    assert_eq!(c.get_bulk(&["GET", "anything"]).await, None);
    c.ok(&["SET", "fresh", "start"]).await;
    assert_eq!(c.get_bulk(&["GET", "fresh"]).await, Some("start".into()));

    drop(data_dir);
}
