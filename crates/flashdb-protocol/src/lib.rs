//! flashdb-protocol: the RESP2 wire codec.
//!
//! Requests are RESP2 arrays of bulk strings; responses use the simple
//! string, error, integer, bulk, and nil-bulk forms. The same encoding
//! is reused for the AOF journal and the replication stream, so the
//! codec lives in its own crate below everything else.

pub mod error;
pub mod parse;
pub mod serialize;
pub mod types;

pub use error::ProtocolError;
pub use parse::{parse_command, parse_frame};
pub use serialize::encode_command;
pub use types::Frame;
