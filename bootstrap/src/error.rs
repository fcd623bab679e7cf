//! 启动错误

use tessera_config::ConfigError;
use tessera_errors::TokenError;
use tessera_telemetry::TelemetryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    #[error("Token engine error: {0}")]
    Token(#[from] TokenError),
}

pub type BootstrapResult<T> = Result<T, BootstrapError>;
