//! Load-based gating of the copy and replay workers.

mod decision;
mod signals;
mod throttler;

pub use decision::*;
pub use signals::*;
pub use throttler::*;
