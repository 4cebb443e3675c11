// murmur-client: real-time messaging synchronization layer.

pub mod cache;
pub mod config;
pub mod connection;
pub mod history;
pub mod identity;
pub mod presence;
pub mod reducers;
pub mod runtime;
