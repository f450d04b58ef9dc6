mod base;
mod configured;
mod memory;
mod mysql;

pub use base::*;
pub use configured::*;
pub use memory::*;
pub use mysql::*;
