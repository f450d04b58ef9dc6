//! Concurrency primitives used to coordinate the migration workers.
//!
//! The copy worker, the replay worker, the throttler and the cut-over coordinator run as
//! separate tasks. They share one shutdown channel, an operator pause channel and the
//! batching stream adapter used on the replication stream.

pub mod pause;
pub mod shutdown;
pub mod stream;
