//! Master side worker pool: roster, availability and routing

pub mod availability;
pub mod routing;
pub mod supervisor;

pub use routing::{ForkOptions, PoolEntry, WorkerPool, WorkerProcess};
