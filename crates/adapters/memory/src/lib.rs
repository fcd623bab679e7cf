//! tessera-adapter-memory - 进程内存储适配器
//!
//! 用于测试和单进程嵌入场景，语义与 Redis 适配器保持一致

mod store;

pub use store::*;
