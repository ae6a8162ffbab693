//! Worker side: one working copy, one job at a time

pub mod config;
pub mod handler;
pub mod pipeline;
pub mod queue;
pub mod reporter;
pub mod state;

pub use handler::{Worker, WorkerIdentity};
