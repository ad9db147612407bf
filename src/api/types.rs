//! HTTP 协议类型定义
//!
//! 服务端与客户端 SDK 共用

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// 协议错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub enum ServiceErrorCode {
    None,
    Internal,
    NoFreeDevice,
}

impl From<i64> for ServiceErrorCode {
    fn from(code: i64) -> Self {
        match code {
            0 => ServiceErrorCode::None,
            2 => ServiceErrorCode::NoFreeDevice,
            // 未知错误码一律按内部错误处理
            _ => ServiceErrorCode::Internal,
        }
    }
}

impl From<ServiceErrorCode> for i64 {
    fn from(code: ServiceErrorCode) -> Self {
        match code {
            ServiceErrorCode::None => 0,
            ServiceErrorCode::Internal => 1,
            ServiceErrorCode::NoFreeDevice => 2,
        }
    }
}

impl fmt::Display for ServiceErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", i64::from(*self))
    }
}

/// 错误响应体
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("yubictl_svc ({error_code}): {message}")]
pub struct ServiceError {
    /// HTTP 状态码，不参与序列化
    #[serde(skip)]
    pub status: u16,
    pub error_code: ServiceErrorCode,
    #[serde(default)]
    pub message: String,
}

impl ServiceError {
    /// 是否为永久性错误（重试无意义）
    pub fn is_permanent(&self) -> bool {
        !matches!(
            self.error_code,
            ServiceErrorCode::None | ServiceErrorCode::Internal
        )
    }
}

/// 获取租约响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquireResponse {
    pub id: String,
    pub serial: u32,
}

/// 只携带持有者 id 的请求（ping / reboot / release）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseRequest {
    pub id: String,
}

/// 触摸请求，时长以纳秒计
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TouchRequest {
    pub id: String,
    #[serde(default, with = "nanos")]
    pub delay: Duration,
    #[serde(default, with = "nanos")]
    pub duration: Duration,
}

/// Duration 与纳秒整数之间的转换
mod nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let nanos = u64::try_from(value.as_nanos()).unwrap_or(u64::MAX);
        serializer.serialize_u64(nanos)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let nanos = u64::deserialize(deserializer)?;
        Ok(Duration::from_nanos(nanos))
    }
}
