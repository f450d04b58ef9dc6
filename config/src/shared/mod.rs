//! Configuration types shared by the migration engine.

mod base;
mod batch;
mod chunk;
mod connection;
mod cut_over;
mod migration;
mod retry;
mod state_store;
mod throttle;

pub use base::*;
pub use batch::*;
pub use chunk::*;
pub use connection::*;
pub use cut_over::*;
pub use migration::*;
pub use retry::*;
pub use state_store::*;
pub use throttle::*;
