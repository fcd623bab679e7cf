//! tessera-adapter-redis - Redis 适配器

mod config;
mod connection;
mod retry;
mod script;
mod store;

pub use config::*;
pub use connection::*;
pub use retry::*;
pub use store::*;
