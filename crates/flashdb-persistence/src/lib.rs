//! flashdb-persistence: durability layer.
//!
//! Handles the binary snapshot format and the append-only command
//! journal. Replaying a journal into a store lives in `flashdb-core`,
//! which consumes the readers defined here.

pub mod aof;
pub mod format;
pub mod snapshot;
