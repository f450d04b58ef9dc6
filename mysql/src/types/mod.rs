mod keys;
mod position;
mod schema;

pub use keys::*;
pub use position::*;
pub use schema::*;
