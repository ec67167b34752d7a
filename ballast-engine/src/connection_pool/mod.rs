//! Outbound connection caching.

pub mod pool;

pub use pool::ConnectionPool;
