//! Database module for PostgreSQL persistence.

mod apply;
mod pool;

pub use apply::*;
pub use pool::*;
