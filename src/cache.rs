//! Key-set cache state, refresh engine, and refresh drivers.

pub mod manager;
pub mod scheduler;
pub mod state;
