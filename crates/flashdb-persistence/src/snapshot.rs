//! Point-in-time snapshot files.
//!
//! File layout, little-endian throughout:
//! ```text
//! [FDB1 magic: 4B][entry_count: 4B]
//! [key_len: 4B][key][val_len: 4B][val][expires_at_nanos: 8B]*
//! ```
//! `expires_at_nanos <= 0` means the entry never expires. A reader must
//! reject any magic other than `FDB1` — there is no version negotiation.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use bytes::Bytes;

use crate::format::{FormatError, PutRecord, TakeRecord, SNAPSHOT_MAGIC};

/// A single record in a snapshot file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub key: Bytes,
    pub value: Bytes,
    /// Absolute expiry as nanoseconds since the Unix epoch, or `<= 0`
    /// for no expiry.
    pub expires_at_ns: i64,
}

/// Writes a complete snapshot to `path`, fsyncing before returning.
///
/// The caller is expected to have already filtered out expired entries;
/// this function writes exactly what it is given.
pub fn write_snapshot(path: impl AsRef<Path>, entries: &[SnapshotEntry]) -> Result<(), FormatError> {
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);

    writer.write_all(SNAPSHOT_MAGIC)?;
    let count = u32::try_from(entries.len()).map_err(|_| {
        FormatError::InvalidData(format!("entry count {} exceeds u32::MAX", entries.len()))
    })?;
    writer.put_u32(count)?;

    for entry in entries {
        writer.put_field(&entry.key)?;
        writer.put_field(&entry.value)?;
        writer.put_i64(entry.expires_at_ns)?;
    }

    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

/// Reads all records from a snapshot file.
///
/// Verifies the magic before anything else; a mismatch is fatal for the
/// load. Expired entries are returned as-is — skipping them is the
/// store's decision, not the codec's.
pub fn read_snapshot(path: impl AsRef<Path>) -> Result<Vec<SnapshotEntry>, FormatError> {
    let file = File::open(path.as_ref())?;
    let mut reader = BufReader::new(file);

    reader.expect_magic()?;
    let count = reader.take_u32()?;

    // cap pre-allocation so a corrupt count can't reserve gigabytes
    let mut entries = Vec::with_capacity((count as usize).min(65_536));
    for _ in 0..count {
        let key = Bytes::from(reader.take_field()?);
        let value = Bytes::from(reader.take_field()?);
        let expires_at_ns = reader.take_i64()?;
        entries.push(SnapshotEntry {
            key,
            value,
            expires_at_ns,
        });
    }

    Ok(entries)
}
