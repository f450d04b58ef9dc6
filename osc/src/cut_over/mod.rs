//! Atomic swap of the shadow table into place.

mod coordinator;
mod state;

pub use coordinator::*;
pub use state::*;
