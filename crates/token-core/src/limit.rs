//! 刷新次数策略

use std::fmt;
use tessera_errors::{TokenError, TokenResult};

/// 刷新次数上限
///
/// 存储中的编码：`0` 不限，`-1` 禁止刷新，`n > 0` 最多刷新 n 次
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RefreshLimit {
    #[default]
    Unlimited,
    Disabled,
    Capped(u32),
}

impl RefreshLimit {
    pub fn to_wire(self) -> i64 {
        match self {
            Self::Unlimited => 0,
            Self::Disabled => -1,
            Self::Capped(n) => i64::from(n),
        }
    }

    /// 已刷新 `refreshed` 次之后，是否还允许再刷新一次
    pub fn check(self, refreshed: u32) -> TokenResult<()> {
        match self {
            Self::Unlimited => Ok(()),
            Self::Disabled => Err(TokenError::RefreshDisabled),
            Self::Capped(n) if refreshed >= n => Err(TokenError::RefreshLimitReached),
            Self::Capped(_) => Ok(()),
        }
    }
}

impl TryFrom<i64> for RefreshLimit {
    type Error = TokenError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unlimited),
            -1 => Ok(Self::Disabled),
            n if n > 0 => u32::try_from(n)
                .map(Self::Capped)
                .map_err(|_| TokenError::config(format!("refresh limit too large: {}", n))),
            n => Err(TokenError::config(format!("invalid refresh limit: {}", n))),
        }
    }
}

impl fmt::Display for RefreshLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlimited => f.write_str("unlimited"),
            Self::Disabled => f.write_str("disabled"),
            Self::Capped(n) => write!(f, "{}", n),
        }
    }
}
