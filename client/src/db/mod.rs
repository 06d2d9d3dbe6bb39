//! Database module for SQLite persistence of the local record store.

mod pool;
mod records;

pub use pool::*;
pub use records::*;
