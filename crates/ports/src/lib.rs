//! tessera-ports - 抽象 trait 层
//!
//! 定义令牌引擎依赖的存储接口，引擎本身不关心底层是 Redis 还是内存

mod store;
mod transaction;

pub use store::*;
pub use transaction::*;
