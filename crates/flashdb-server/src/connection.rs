//! Per-connection handler.
//!
//! Reads RESP2 request frames from a TCP stream, applies slot routing,
//! dispatches commands, and writes replies. Pipelined requests are
//! drained from the buffer one frame at a time; each reply is written
//! before the command's replication broadcast is fired, so replicas may
//! observe a write slightly after the client sees its reply.

use std::io;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use flashdb_cluster::SlotRouter;
use flashdb_protocol::{parse_command, Frame};

use crate::dispatch::Dispatcher;
use crate::replication::ReplicationMaster;

/// Initial read buffer capacity. 4KB covers most commands comfortably.
const BUF_CAPACITY: usize = 4096;

/// Maximum read buffer size before the client is disconnected, so one
/// slow or malicious connection can't hold unbounded memory in
/// incomplete frames.
const MAX_BUF_SIZE: usize = 64 * 1024 * 1024;

/// Everything a connection needs: the dispatcher, the slot router, and
/// (in master mode) the replication fan-out.
pub struct ConnContext {
    pub dispatcher: Dispatcher,
    pub router: SlotRouter,
    pub repl: Option<Arc<ReplicationMaster>>,
}

/// Drives a single client connection to completion.
///
/// The loop exits on client disconnect, on a framing error (terminal
/// per the protocol), or after a MOVED redirect.
pub async fn handle(mut stream: TcpStream, ctx: Arc<ConnContext>) -> io::Result<()> {
    let mut buf = BytesMut::with_capacity(BUF_CAPACITY);
    let mut out = BytesMut::with_capacity(BUF_CAPACITY);

    loop {
        // drain every complete frame already buffered (pipelining)
        loop {
            let (parts, consumed) = match parse_command(&buf) {
                Ok(Some(parsed)) => parsed,
                Ok(None) => break,
                Err(e) => {
                    debug!("closing connection on protocol error: {e}");
                    return Ok(());
                }
            };
            let _ = buf.split_to(consumed);

            if parts.is_empty() {
                continue;
            }

            // any request carrying a key argument is subject to routing
            if parts.len() >= 2 {
                if let Some((slot, owner)) = ctx.router.redirect(&parts[1]) {
                    out.clear();
                    Frame::Error(format!("MOVED {slot} {owner}")).serialize(&mut out);
                    stream.write_all(&out).await?;
                    return Ok(());
                }
            }

            let response = ctx.dispatcher.handle(&parts);

            out.clear();
            response.frame.serialize(&mut out);
            stream.write_all(&out).await?;

            if response.broadcast {
                if let Some(repl) = &ctx.repl {
                    repl.broadcast(&parts);
                }
            }
        }

        if buf.len() > MAX_BUF_SIZE {
            debug!("closing connection: request exceeds maximum buffer size");
            return Ok(());
        }

        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            return Ok(()); // clean disconnect
        }
    }
}
