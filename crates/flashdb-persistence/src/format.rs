//! Record-level binary primitives for flashdb's persisted formats.
//!
//! The snapshot file and the replication full-sync payload share the
//! same building blocks: fixed-width little-endian integers and
//! length-prefixed byte fields, laid out back to back with no padding.
//! The [`PutRecord`] and [`TakeRecord`] extension traits hang those
//! primitives off any `Write`/`Read`, so a codec reads as a
//! description of its layout.

use std::io::{self, Read, Write};

use thiserror::Error;

/// Magic bytes at the start of a snapshot file.
pub const SNAPSHOT_MAGIC: &[u8; 4] = b"FDB1";

/// Allocation cap for a single length-prefixed field. Keys and values
/// are bounded at 512 MiB on the wire, so a longer prefix in a file
/// can only be corruption — refuse it instead of allocating.
pub const MAX_FIELD_LEN: usize = 512 * 1024 * 1024;

/// Errors that can occur when reading or writing persisted data.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("unexpected end of file")]
    UnexpectedEof,

    /// The file did not start with the expected magic bytes.
    #[error("incompatible snapshot version")]
    InvalidMagic,

    /// A tagged payload carried a tag this build doesn't understand.
    #[error("unknown payload tag: {0}")]
    UnknownTag(u8),

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Write-side record primitives, available on every `Write`.
pub trait PutRecord: Write {
    /// Writes a single byte (record and payload tags).
    fn put_u8(&mut self, val: u8) -> io::Result<()> {
        self.write_all(&[val])
    }

    /// Writes a `u32` in little-endian (entry counts, length prefixes).
    fn put_u32(&mut self, val: u32) -> io::Result<()> {
        self.write_all(&val.to_le_bytes())
    }

    /// Writes an `i64` in little-endian (expiry timestamps).
    fn put_i64(&mut self, val: i64) -> io::Result<()> {
        self.write_all(&val.to_le_bytes())
    }

    /// Writes a length-prefixed field, `[len: u32][bytes]` — the
    /// encoding every key and value is stored with.
    fn put_field(&mut self, field: &[u8]) -> io::Result<()> {
        let len = u32::try_from(field.len()).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "field does not fit a u32 length prefix",
            )
        })?;
        self.put_u32(len)?;
        self.write_all(field)
    }
}

impl<W: Write + ?Sized> PutRecord for W {}

/// Read-side record primitives, mirroring [`PutRecord`].
///
/// A short read surfaces as [`FormatError::UnexpectedEof`] so callers
/// can tell a truncated file from a failing disk.
pub trait TakeRecord: Read {
    /// Reads a single tag byte.
    fn take_u8(&mut self) -> Result<u8, FormatError> {
        let mut byte = [0u8; 1];
        fill(self, &mut byte)?;
        Ok(byte[0])
    }

    /// Reads a little-endian `u32`.
    fn take_u32(&mut self) -> Result<u32, FormatError> {
        let mut raw = [0u8; 4];
        fill(self, &mut raw)?;
        Ok(u32::from_le_bytes(raw))
    }

    /// Reads a little-endian `i64`.
    fn take_i64(&mut self) -> Result<i64, FormatError> {
        let mut raw = [0u8; 8];
        fill(self, &mut raw)?;
        Ok(i64::from_le_bytes(raw))
    }

    /// Reads a length-prefixed field, refusing prefixes beyond
    /// [`MAX_FIELD_LEN`].
    fn take_field(&mut self) -> Result<Vec<u8>, FormatError> {
        let len = self.take_u32()? as usize;
        if len > MAX_FIELD_LEN {
            return Err(FormatError::InvalidData(format!(
                "field of {len} bytes exceeds the {MAX_FIELD_LEN}-byte cap"
            )));
        }
        let mut field = vec![0u8; len];
        fill(self, &mut field)?;
        Ok(field)
    }

    /// Consumes the snapshot magic, rejecting anything but `FDB1`.
    fn expect_magic(&mut self) -> Result<(), FormatError> {
        let mut magic = [0u8; 4];
        fill(self, &mut magic)?;
        if &magic != SNAPSHOT_MAGIC {
            return Err(FormatError::InvalidMagic);
        }
        Ok(())
    }
}

impl<R: Read + ?Sized> TakeRecord for R {}

/// `read_exact` with the EOF case folded into [`FormatError`].
fn fill<R: Read + ?Sized>(r: &mut R, buf: &mut [u8]) -> Result<(), FormatError> {
    match r.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(FormatError::UnexpectedEof),
        Err(e) => Err(FormatError::Io(e)),
    }
}
