//! Command dispatch.
//!
//! Validates arguments, mutates the store, journals writes, and builds
//! the reply frame. The ordering contract for every accepted write is:
//! in-memory mutation, then AOF append, then the reply; the replication
//! broadcast happens after the reply is on the wire (the connection
//! layer fires it when `Response::broadcast` is set).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::error;

use flashdb_core::replay::{parse_i64, set_ttl_from_args};
use flashdb_core::{time, Store};
use flashdb_persistence::aof::Aof;
use flashdb_protocol::Frame;

/// A dispatched command's reply, plus whether the command should be
/// fanned out to replicas once the reply has been written.
pub struct Response {
    pub frame: Frame,
    pub broadcast: bool,
}

impl Response {
    fn reply(frame: Frame) -> Self {
        Self {
            frame,
            broadcast: false,
        }
    }

    /// A successful write: reply, then fan out to replicas.
    fn replicate(frame: Frame) -> Self {
        Self {
            frame,
            broadcast: true,
        }
    }
}

/// Executes commands against the store and journal it borrows.
pub struct Dispatcher {
    store: Arc<Store>,
    aof: Arc<Aof>,
    snapshot_path: PathBuf,
    started_at: Instant,
    strict_aof: bool,
}

impl Dispatcher {
    pub fn new(store: Arc<Store>, aof: Arc<Aof>, snapshot_path: PathBuf, strict_aof: bool) -> Self {
        Self {
            store,
            aof,
            snapshot_path,
            started_at: Instant::now(),
            strict_aof,
        }
    }

    /// Dispatches one parsed request. `parts` is never empty.
    pub fn handle(&self, parts: &[Bytes]) -> Response {
        let name = parts[0].to_ascii_uppercase();
        match name.as_slice() {
            b"SET" => self.set(parts),
            b"GET" => self.get(parts),
            b"DEL" => self.del(parts),
            b"EXISTS" => self.exists(parts),
            b"TTL" => self.ttl(parts),
            b"EXPIRE" => self.expire(parts),
            b"PING" => self.ping(parts),
            b"SAVE" => self.save(),
            b"INFO" => self.info(),
            b"COMMAND" => Response::reply(Frame::Array(vec![])),
            _ => Response::reply(err(format!(
                "unknown command '{}'",
                String::from_utf8_lossy(&parts[0])
            ))),
        }
    }

    fn set(&self, parts: &[Bytes]) -> Response {
        if !(3..=5).contains(&parts.len()) {
            return Response::reply(wrong_arity("SET"));
        }

        // the client path rejects a malformed TTL; replay is lenient
        if parts.len() == 4 && parse_i64(&parts[3]).is_none() {
            return Response::reply(err("invalid expire time"));
        }
        if parts.len() == 5 {
            match parts[3].to_ascii_uppercase().as_slice() {
                b"EX" | b"PX" => {}
                _ => {
                    return Response::reply(err(format!(
                        "unsupported SET option '{}'",
                        String::from_utf8_lossy(&parts[3])
                    )));
                }
            }
            if parse_i64(&parts[4]).is_none() {
                return Response::reply(err("invalid expire time"));
            }
        }

        let ttl = set_ttl_from_args(parts);
        self.store.set(parts[1].clone(), parts[2].clone(), ttl);

        if let Err(frame) = self.journal(parts) {
            return Response::reply(frame);
        }
        Response::replicate(Frame::Simple("OK".into()))
    }

    fn get(&self, parts: &[Bytes]) -> Response {
        if parts.len() < 2 {
            return Response::reply(wrong_arity("GET"));
        }
        match self.store.get(&parts[1]) {
            Some(item) => Response::reply(Frame::Bulk(item.value)),
            None => Response::reply(Frame::NullBulk),
        }
    }

    fn del(&self, parts: &[Bytes]) -> Response {
        if parts.len() < 2 {
            return Response::reply(wrong_arity("DEL"));
        }
        if !self.store.delete(&parts[1]) {
            return Response::reply(err("key not found"));
        }
        if let Err(frame) = self.journal(parts) {
            return Response::reply(frame);
        }
        Response::replicate(Frame::Integer(1))
    }

    fn exists(&self, parts: &[Bytes]) -> Response {
        if parts.len() < 2 {
            return Response::reply(wrong_arity("EXISTS"));
        }
        let found = self.store.get(&parts[1]).is_some();
        Response::reply(Frame::Integer(i64::from(found)))
    }

    fn ttl(&self, parts: &[Bytes]) -> Response {
        if parts.len() < 2 {
            return Response::reply(wrong_arity("TTL"));
        }
        let reply = match self.store.get(&parts[1]) {
            None => Frame::Integer(-2),
            Some(item) => match item.remaining_secs() {
                None => Frame::Integer(-1),
                // a deadline that slipped past between the lookup and
                // here reads as already gone
                Some(secs) if secs <= 0 => Frame::Integer(-2),
                Some(secs) => Frame::Integer(secs),
            },
        };
        Response::reply(reply)
    }

    fn expire(&self, parts: &[Bytes]) -> Response {
        if parts.len() < 3 {
            return Response::reply(wrong_arity("EXPIRE"));
        }
        let secs = match parse_i64(&parts[2]) {
            Some(secs) => secs,
            None => return Response::reply(err("invalid seconds")),
        };

        let deadline = time::now_ns().saturating_add(secs.saturating_mul(1_000_000_000));
        if !self.store.expire_at(&parts[1], deadline) {
            return Response::reply(Frame::Integer(0));
        }
        if let Err(frame) = self.journal(parts) {
            return Response::reply(frame);
        }
        Response::replicate(Frame::Integer(1))
    }

    fn ping(&self, parts: &[Bytes]) -> Response {
        let reply = match parts.get(1) {
            None => Frame::Simple("PONG".into()),
            Some(msg) => Frame::Simple(String::from_utf8_lossy(msg).into_owned()),
        };
        Response::reply(reply)
    }

    fn save(&self) -> Response {
        if let Err(e) = self.store.save(&self.snapshot_path) {
            return Response::reply(err(format!("failed to save data to disk: {e}")));
        }
        // the journal only needs to cover post-snapshot writes now
        if let Err(e) = self.aof.reset() {
            return Response::reply(err(format!("failed to reset the aof file: {e}")));
        }
        Response::reply(Frame::Simple("OK".into()))
    }

    fn info(&self) -> Response {
        let uptime = self.started_at.elapsed().as_secs();
        let info = format!(
            "# Server\r\n\
             redis_version:0.1.0-flashdb\r\n\
             uptime_in_seconds:{uptime}\r\n\
             arch_bits:64\r\n\
             process_id:{}\r\n\
             # Memory\r\n\
             mem_allocator:system\r\n\
             # Keyspace\r\n\
             db0:keys={}\r\n",
            std::process::id(),
            self.store.len(),
        );
        Response::reply(Frame::Bulk(Bytes::from(info)))
    }

    /// Appends an accepted write to the journal.
    ///
    /// By default an append failure is logged and the client still sees
    /// success; with `strict_aof` the failure becomes the reply.
    fn journal(&self, parts: &[Bytes]) -> Result<(), Frame> {
        if let Err(e) = self.aof.append(parts) {
            error!("aof append failed: {e}");
            if self.strict_aof {
                return Err(err(format!("failed to append to aof: {e}")));
            }
        }
        Ok(())
    }
}

fn err(msg: impl AsRef<str>) -> Frame {
    Frame::Error(format!("ERR {}", msg.as_ref()))
}

fn wrong_arity(cmd: &str) -> Frame {
    err(format!("wrong number of arguments for '{cmd}' command"))
}
