//! 设备枚举模块
//!
//! 设备池只通过这里的 trait 与底层硬件交互

mod sysfs;

pub use sysfs::{SysfsProvider, YUBICO_VENDOR_ID};

use async_trait::async_trait;
use std::sync::Arc;
use crate::error::Result;

/// 设备硬件控制句柄
#[async_trait]
pub trait DeviceHandle: Send + Sync {
    /// 设备路径，仅用于日志和展示
    fn path(&self) -> String;

    /// 硬件重启设备
    async fn reboot(&self) -> Result<()>;

    /// 检查设备是否可达
    async fn probe(&self) -> Result<()>;
}

/// 枚举得到的设备
#[derive(Clone)]
pub struct DiscoveredDevice {
    pub serial: u32,
    pub version: String,
    /// 总线位置，例如 `1-1.2.3`
    pub location: String,
    pub handle: Arc<dyn DeviceHandle>,
}

impl std::fmt::Debug for DiscoveredDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscoveredDevice")
            .field("serial", &self.serial)
            .field("version", &self.version)
            .field("location", &self.location)
            .field("path", &self.handle.path())
            .finish()
    }
}

/// 设备提供者，负责枚举当前连接的设备
#[async_trait]
pub trait DeviceProvider: Send + Sync {
    /// 按稳定顺序返回所有设备
    async fn enumerate(&self) -> Result<Vec<DiscoveredDevice>>;
}
