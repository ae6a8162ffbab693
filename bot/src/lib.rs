//! Deploy bot library
//!
//! Chat commands are parsed into requests, routed to one of a pool of
//! workers over a message bus, and executed against each worker's own
//! working copy.

pub mod app;
pub mod bus;
pub mod chat;
pub mod deploy;
pub mod dispatch;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod parse;
pub mod pool;
pub mod storage;
pub mod utils;
pub mod worker;
