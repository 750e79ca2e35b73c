pub mod config;
pub mod logging;
pub mod redis_kv;
pub mod store;
