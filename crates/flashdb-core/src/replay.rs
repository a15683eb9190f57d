//! AOF replay: applying a journal to a store on startup.
//!
//! The journal records commands exactly as clients sent them, so replay
//! re-applies the same small write vocabulary the dispatcher accepts.
//! Unknown commands are skipped for forward compatibility; malformed
//! RESP aborts the whole replay.

use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use flashdb_persistence::aof::{read_commands, AofError};

use crate::store::Store;
use crate::time;

/// Replays a journal file into the store. Returns the number of
/// commands applied.
///
/// Entries with too few arguments are skipped rather than aborting —
/// the journal only ever contains commands the dispatcher accepted, so
/// a short entry means a bug elsewhere, not a corrupt file.
pub fn load_aof(path: impl AsRef<std::path::Path>, store: &Store) -> Result<usize, AofError> {
    let commands = read_commands(path)?;

    let mut applied = 0;
    for parts in commands {
        if parts.is_empty() {
            continue;
        }
        let name = parts[0].to_ascii_uppercase();
        match name.as_slice() {
            b"SET" if parts.len() >= 3 => {
                let ttl = set_ttl_from_args(&parts);
                store.set(parts[1].clone(), parts[2].clone(), ttl);
                applied += 1;
            }
            b"DEL" if parts.len() >= 2 => {
                // "not found" is not an error during replay
                store.delete(&parts[1]);
                applied += 1;
            }
            b"EXPIRE" if parts.len() >= 3 => {
                if let Some(secs) = parse_i64(&parts[2]) {
                    let deadline = time::now_ns().saturating_add(secs.saturating_mul(1_000_000_000));
                    store.expire_at(&parts[1], deadline);
                    applied += 1;
                }
            }
            other => {
                debug!(
                    command = %String::from_utf8_lossy(other),
                    "skipping unreplayable aof entry"
                );
            }
        }
    }
    Ok(applied)
}

/// Extracts the TTL from a journalled SET command.
///
/// Accepts the bare form `SET key value ttl_secs` and the `EX`/`PX`
/// spellings. An unparseable TTL counts as "no expiry" — replay never
/// rejects an entry the dispatcher accepted.
pub fn set_ttl_from_args(parts: &[Bytes]) -> Option<Duration> {
    match parts.len() {
        4 => parse_i64(&parts[3])
            .filter(|&secs| secs > 0)
            .map(|secs| Duration::from_secs(secs as u64)),
        5 => {
            let unit = parts[3].to_ascii_uppercase();
            let amount = parse_i64(&parts[4]).filter(|&n| n > 0)?;
            match unit.as_slice() {
                b"EX" => Some(Duration::from_secs(amount as u64)),
                b"PX" => Some(Duration::from_millis(amount as u64)),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Parses a decimal i64 from raw argument bytes.
pub fn parse_i64(data: &[u8]) -> Option<i64> {
    std::str::from_utf8(data).ok()?.parse().ok()
}
