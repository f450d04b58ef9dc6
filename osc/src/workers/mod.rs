pub mod base;
pub mod copy;
pub mod cut_over;
pub mod policy;
pub mod replay;
