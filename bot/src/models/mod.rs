//! Data models shared by the master and the workers

pub mod message;
pub mod notice;
pub mod request;
pub mod summary;
