mod base;
mod memory;
mod mysql;

pub use base::*;
pub use memory::*;
pub use mysql::*;
