//! Server assembly: persisted-state recovery, background tasks, and
//! the client accept loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use flashdb_cluster::{ClusterConfig, SlotRouter};
use flashdb_core::{replay, Store};
use flashdb_persistence::aof::{Aof, AofError};
use flashdb_persistence::format::FormatError;

use crate::config::{Role, ServerConfig};
use crate::connection::{self, ConnContext};
use crate::dispatch::Dispatcher;
use crate::replication::{self, ReplicationMaster, ReplicationReplica};

/// How often the autosave task snapshots the store and resets the
/// journal.
const AUTOSAVE_INTERVAL: Duration = Duration::from_secs(300);

/// Runs the server until SIGINT/SIGTERM.
pub async fn run(cfg: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = Store::new();
    let aof = Arc::new(Aof::open(&cfg.aof_path)?);

    recover(&store, &cfg);

    // the cluster topology is required; a missing or unparseable file
    // is a startup fatal
    let cluster = ClusterConfig::load(&cfg.cluster_path)?;
    let router = SlotRouter::from_config(&cluster, &cfg.addr);

    let repl = match cfg.role {
        Role::Replica => {
            let master_addr = cfg
                .master_addr
                .clone()
                .ok_or("FLASHDB_MASTER_ADDR is required in replica mode")?;
            ReplicationReplica::start(master_addr, Arc::clone(&store));
            None
        }
        Role::Master => {
            let master = Arc::new(ReplicationMaster::new(Arc::clone(&store)));
            match replication::replication_addr(&cfg.addr) {
                Ok(addr) => {
                    tokio::spawn(Arc::clone(&master).bind_and_serve(addr, store.stop_chan()));
                }
                Err(e) => warn!("replication listener disabled: {e}"),
            }
            Some(master)
        }
    };

    tokio::spawn(autosave(
        Arc::clone(&store),
        Arc::clone(&aof),
        cfg.snapshot_path.clone(),
        store.stop_chan(),
    ));

    let ctx = Arc::new(ConnContext {
        dispatcher: Dispatcher::new(
            Arc::clone(&store),
            Arc::clone(&aof),
            cfg.snapshot_path.clone(),
            cfg.strict_aof,
        ),
        router,
        repl,
    });

    let listener = TcpListener::bind(&cfg.addr).await?;
    info!(addr = %cfg.addr, "listening for clients");

    let mut shutdown = std::pin::pin!(shutdown_signal());
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let ctx = Arc::clone(&ctx);
                    tokio::spawn(async move {
                        if let Err(e) = connection::handle(stream, ctx).await {
                            debug!(%peer, "connection error: {e}");
                        }
                    });
                }
                Err(e) => error!("accept error: {e}"),
            }
        }
    }

    info!("shutdown signal received");
    drop(listener);
    store.close().await;
    aof.close();
    Ok(())
}

/// Startup recovery: snapshot first, then the journal on top of it.
///
/// A missing snapshot or journal is a fresh start, not an error; a
/// corrupt one logs a warning and leaves whatever state loaded so far.
fn recover(store: &Store, cfg: &ServerConfig) {
    match store.load(&cfg.snapshot_path) {
        Ok(restored) => info!(restored, "snapshot loaded"),
        Err(FormatError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("no snapshot found, starting empty");
        }
        Err(e) => warn!("snapshot load failed, continuing without it: {e}"),
    }

    match replay::load_aof(&cfg.aof_path, store) {
        Ok(applied) if applied > 0 => info!(applied, "aof replayed"),
        Ok(_) => {}
        Err(AofError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("aof replay aborted: {e}"),
    }
}

/// Periodic snapshot + journal reset, co-terminating with the store.
async fn autosave(
    store: Arc<Store>,
    aof: Arc<Aof>,
    snapshot_path: PathBuf,
    mut stop: broadcast::Receiver<()>,
) {
    let mut tick = tokio::time::interval(AUTOSAVE_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    tick.tick().await; // the first tick completes immediately

    loop {
        tokio::select! {
            _ = stop.recv() => return,
            _ = tick.tick() => {
                if let Err(e) = store.save(&snapshot_path) {
                    error!("autosave snapshot failed: {e}");
                    continue;
                }
                if let Err(e) = aof.reset() {
                    error!("autosave aof reset failed: {e}");
                } else {
                    debug!("autosave complete");
                }
            }
        }
    }
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
