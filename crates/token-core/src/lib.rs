//! tessera-core - 令牌生命周期引擎
//!
//! 签发、解析、刷新、兑换（轮换）与销毁不透明令牌。
//! 令牌的权威状态保存在共享存储中，进程内不持有任何锁，
//! 所有写操作都通过存储的原子事务完成。
//!
//! 支持两种模型：
//! - 访问令牌 / 刷新令牌对
//! - 单令牌，可挂载一个子令牌（级联销毁）

mod access_token;
mod credential;
mod gateway;
mod id;
mod lifecycle;
mod limit;
mod manager;
mod metrics;
mod record;
mod refresh_token;
mod token;

pub use access_token::*;
pub use credential::*;
pub use id::*;
pub use limit::*;
pub use manager::*;
pub use record::{Payload, RESERVED_PREFIX, fields, is_reserved, validate_payload};
pub use refresh_token::*;
pub use token::*;
