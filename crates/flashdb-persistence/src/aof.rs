//! Append-only command journal.
//!
//! Every accepted write is appended as a RESP2 array of bulk strings,
//! in the exact order writes acquired the journal mutex. The file is
//! truncated after a successful snapshot so it only covers post-snapshot
//! mutations.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use flashdb_protocol::{encode_command, parse_command, ProtocolError};

/// Errors from journal operations.
#[derive(Debug, Error)]
pub enum AofError {
    /// The journal handle was closed; the journal no longer accepts writes.
    #[error("aof is closed")]
    Closed,

    /// A journal entry could not be parsed during replay.
    #[error("corrupt aof entry: {0}")]
    Corrupt(#[from] ProtocolError),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// The append-only journal. Owns its file handle exclusively; a mutex
/// serializes appends so the on-disk order is the journalling order.
pub struct Aof {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl Aof {
    /// Opens the journal in append mode, creating the file if missing.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().append(true).create(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    /// Appends one command to the journal.
    ///
    /// The write has reached the OS buffer cache when this returns; the
    /// mutex is held across the file write so concurrent appends cannot
    /// interleave.
    pub fn append(&self, parts: &[Bytes]) -> Result<(), AofError> {
        let mut buf = BytesMut::new();
        encode_command(parts, &mut buf);

        let mut guard = self.file.lock().expect("aof mutex poisoned");
        let file = guard.as_mut().ok_or(AofError::Closed)?;
        file.write_all(&buf)?;
        Ok(())
    }

    /// Truncates the journal and installs a fresh handle.
    ///
    /// Called after a successful snapshot so the journal only covers
    /// writes accepted after the snapshot point.
    pub fn reset(&self) -> Result<(), AofError> {
        let mut guard = self.file.lock().expect("aof mutex poisoned");
        if guard.is_none() {
            return Err(AofError::Closed);
        }

        // drop the old handle first so the truncating open sees a
        // released descriptor
        *guard = None;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        *guard = Some(file);
        Ok(())
    }

    /// Releases the file handle. Later appends fail with [`AofError::Closed`].
    pub fn close(&self) {
        let mut guard = self.file.lock().expect("aof mutex poisoned");
        *guard = None;
    }

    /// Returns the journal path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reads every command recorded in a journal file.
///
/// Parses RESP2 frames until EOF. A malformed or truncated trailing
/// frame aborts with an error — replay must not apply a half-written
/// entry.
pub fn read_commands(path: impl AsRef<Path>) -> Result<Vec<Vec<Bytes>>, AofError> {
    let mut data = Vec::new();
    File::open(path.as_ref())?.read_to_end(&mut data)?;

    let mut commands = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        match parse_command(&data[pos..])? {
            Some((parts, consumed)) => {
                commands.push(parts);
                pos += consumed;
            }
            // incomplete trailing frame: the journal was cut mid-append
            None => return Err(AofError::Corrupt(ProtocolError::Incomplete)),
        }
    }
    Ok(commands)
}
