//! 设备条目实现
//!
//! 表示池中的单个设备及其租约状态

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::device::{DeviceHandle, DiscoveredDevice};
use crate::pool::types::DeviceInfo;

/// 租约
#[derive(Debug, Clone)]
pub struct Lease {
    /// 持有者 id
    pub holder: String,

    /// 最后访问时间（单调时钟）
    pub last_access: Instant,

    /// 租约开始时间
    pub acquired_at: DateTime<Utc>,
}

/// 设备条目
pub struct DeviceEntry {
    /// 设备序列号
    pub serial: u32,

    /// 固件版本
    pub version: String,

    /// 总线位置
    pub location: String,

    /// 触摸通道，0 表示未解析
    pub channel: u32,

    /// 硬件控制句柄
    pub handle: Arc<dyn DeviceHandle>,

    /// 当前租约，空闲时为 None
    pub lease: Option<Lease>,
}

impl DeviceEntry {
    /// 创建新的设备条目
    pub fn new(device: DiscoveredDevice, channel: u32) -> Self {
        Self {
            serial: device.serial,
            version: device.version,
            location: device.location,
            channel,
            handle: device.handle,
            lease: None,
        }
    }

    pub fn is_free(&self) -> bool {
        self.lease.is_none()
    }

    pub fn holder(&self) -> Option<&str> {
        self.lease.as_ref().map(|l| l.holder.as_str())
    }

    pub fn is_held_by(&self, holder: &str) -> bool {
        self.holder() == Some(holder)
    }

    /// 空闲时长，设备空闲时为 None
    pub fn idle(&self, now: Instant) -> Option<Duration> {
        self.lease
            .as_ref()
            .map(|l| now.saturating_duration_since(l.last_access))
    }

    /// 分配给持有者
    pub fn acquire(&mut self, holder: &str, now: Instant) {
        self.lease = Some(Lease {
            holder: holder.to_string(),
            last_access: now,
            acquired_at: Utc::now(),
        });
    }

    /// 更新最后访问时间，保证单调不减
    pub fn touch(&mut self, now: Instant) {
        if let Some(lease) = self.lease.as_mut() {
            lease.last_access = lease.last_access.max(now);
        }
    }

    /// 释放租约，返回被释放的租约
    pub fn release(&mut self) -> Option<Lease> {
        self.lease.take()
    }

    /// 获取设备信息
    pub fn to_info(&self, now: Instant) -> DeviceInfo {
        DeviceInfo {
            serial: self.serial,
            version: self.version.clone(),
            location: self.location.clone(),
            path: self.handle.path(),
            channel: self.channel,
            holder: self.holder().map(str::to_string),
            leased_at: self.lease.as_ref().map(|l| l.acquired_at),
            idle_seconds: self.idle(now).map(|d| d.as_secs()),
        }
    }
}

impl std::fmt::Display for DeviceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Yubikey #{}", self.serial)
    }
}
