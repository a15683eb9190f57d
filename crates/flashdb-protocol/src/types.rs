//! RESP2 frame types.
//!
//! The [`Frame`] enum represents a single parsed RESP2 value. Bulk
//! strings use `Bytes` so keys and values can move through the pipeline
//! without copies.

use bytes::Bytes;

/// A single RESP2 protocol frame.
///
/// Covers the subset the server speaks: simple strings, errors,
/// integers, bulk strings, the nil bulk, and arrays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Simple string response, e.g. `+OK\r\n`.
    Simple(String),

    /// Error response, e.g. `-ERR unknown command\r\n`.
    Error(String),

    /// 64-bit signed integer, e.g. `:42\r\n`.
    Integer(i64),

    /// Bulk (binary-safe) string, e.g. `$5\r\nhello\r\n`.
    Bulk(Bytes),

    /// The nil bulk string, `$-1\r\n`. Returned for missing keys.
    NullBulk,

    /// Ordered array of frames, e.g. `*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n`.
    Array(Vec<Frame>),
}

impl Frame {
    /// Returns `true` if this frame is the nil bulk string.
    pub fn is_null(&self) -> bool {
        matches!(self, Frame::NullBulk)
    }
}
