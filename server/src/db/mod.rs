//! Database module for PostgreSQL persistence.

mod books;
mod checkpoints;
mod pool;

pub use books::*;
pub use checkpoints::*;
pub use pool::*;
