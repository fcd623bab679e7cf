//! tessera-bootstrap - 统一启动骨架
//!
//! 加载配置、初始化日志、连接 Redis 并构建令牌管理器

mod error;
mod infrastructure;
mod runtime;

pub use error::*;
pub use infrastructure::*;
pub use runtime::*;
