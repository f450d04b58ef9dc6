//! Consumption of the replication stream.
//!
//! Decoding the binlog wire protocol happens upstream, the replay consumes already structured
//! [`ReplicationMessage`](crate::types::ReplicationMessage)s.

pub mod replay;
mod source;

pub use source::*;
