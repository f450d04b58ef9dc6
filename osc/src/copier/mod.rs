mod chunk;
mod row_copier;

pub use chunk::*;
pub use row_copier::*;
