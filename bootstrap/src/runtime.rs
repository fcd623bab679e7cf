//! 运行时初始化

use tessera_config::TesseraConfig;
use tessera_telemetry::{init_tracing, init_tracing_json};
use tracing::info;

use crate::error::BootstrapResult;

/// 运行时配置
pub struct RuntimeConfig {
    pub config_dir: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            config_dir: "config".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// 读取 `.env` 后加载配置
    pub fn load(&self) -> BootstrapResult<TesseraConfig> {
        dotenvy::dotenv().ok();
        Ok(TesseraConfig::load(&self.config_dir)?)
    }
}

/// 初始化日志
///
/// 生产环境或显式开启 `telemetry.json` 时输出 JSON
pub fn init_runtime(config: &TesseraConfig) -> BootstrapResult<()> {
    if config.is_production() || config.telemetry.json {
        init_tracing_json(&config.telemetry.log_level)?;
    } else {
        init_tracing(&config.telemetry.log_level)?;
    }

    info!(
        app_name = %config.app_name,
        app_env = %config.app_env,
        "Runtime initialized"
    );
    Ok(())
}
