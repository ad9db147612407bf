//! 设备池相关的类型定义

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 默认租约有效期（秒）
pub const DEFAULT_LEASE_TTL: u64 = 3600;

/// 设备池配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DevicePoolConfig {
    /// 租约有效期（秒），超过该时长未续约的租约可被回收
    pub lease_ttl: u64,

    /// 定时重新加载设备的间隔（秒），0 表示不自动加载
    pub reload_interval: u64,
}

impl Default for DevicePoolConfig {
    fn default() -> Self {
        Self {
            lease_ttl: DEFAULT_LEASE_TTL,
            reload_interval: 0,
        }
    }
}

impl DevicePoolConfig {
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl)
    }

    pub fn reload_interval(&self) -> Option<Duration> {
        (self.reload_interval > 0).then(|| Duration::from_secs(self.reload_interval))
    }
}

/// 设备信息快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub serial: u32,
    pub version: String,
    pub location: String,
    pub path: String,
    /// 触摸通道，0 表示未解析
    pub channel: u32,
    /// 当前持有者，空闲时为 None
    pub holder: Option<String>,
    pub leased_at: Option<DateTime<Utc>>,
    /// 距上次访问的秒数
    pub idle_seconds: Option<u64>,
}

impl DeviceInfo {
    pub fn is_free(&self) -> bool {
        self.holder.is_none()
    }
}
