//! 基于 Linux sysfs 的 USB 设备提供者

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{DeviceHandle, DeviceProvider, DiscoveredDevice};
use crate::error::{AppError, Result};

/// Yubico 的 USB 厂商 ID
pub const YUBICO_VENDOR_ID: &str = "1050";

/// 轮询 `authorized` 属性的间隔
const PROBE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// 通过 `/sys/bus/usb/devices` 枚举设备
pub struct SysfsProvider {
    root: PathBuf,
    vendor_id: String,
    timeout: Duration,
}

impl SysfsProvider {
    /// 创建新的 sysfs 提供者
    pub fn new(root: impl Into<PathBuf>, vendor_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            root: root.into(),
            vendor_id: vendor_id.into(),
            timeout,
        }
    }
}

#[async_trait]
impl DeviceProvider for SysfsProvider {
    async fn enumerate(&self) -> Result<Vec<DiscoveredDevice>> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| AppError::Enumeration(format!("读取 {} 失败: {}", self.root.display(), e)))?;

        let mut devices = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| AppError::Enumeration(format!("遍历 {} 失败: {}", self.root.display(), e)))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            // 跳过接口节点 (1-1.2:1.0) 和根集线器 (usb1)
            if name.contains(':') || name.starts_with("usb") {
                continue;
            }

            let dir = entry.path();
            match read_attr(&dir, "idVendor").await {
                Some(vendor) if vendor.eq_ignore_ascii_case(&self.vendor_id) => {}
                _ => continue,
            }

            let Some(serial) = read_attr(&dir, "serial")
                .await
                .and_then(|s| s.parse::<u32>().ok())
            else {
                debug!("跳过没有序列号的设备: {}", name);
                continue;
            };

            let version = read_attr(&dir, "bcdDevice")
                .await
                .map(|bcd| format_bcd_version(&bcd))
                .unwrap_or_default();

            devices.push(DiscoveredDevice {
                serial,
                version,
                location: name,
                handle: Arc::new(SysfsHandle {
                    dir,
                    timeout: self.timeout,
                }),
            });
        }

        // read_dir 的顺序不固定
        devices.sort_by(|a, b| a.location.cmp(&b.location));
        Ok(devices)
    }
}

/// sysfs 设备句柄
struct SysfsHandle {
    dir: PathBuf,
    timeout: Duration,
}

impl SysfsHandle {
    async fn write_authorized(&self, value: &str) -> Result<()> {
        tokio::fs::write(self.dir.join("authorized"), value)
            .await
            .map_err(|e| AppError::hardware(self.path(), e))
    }
}

#[async_trait]
impl DeviceHandle for SysfsHandle {
    fn path(&self) -> String {
        self.dir.display().to_string()
    }

    async fn reboot(&self) -> Result<()> {
        info!("重新授权 USB 设备: {}", self.path());
        self.write_authorized("0").await?;
        self.write_authorized("1").await
    }

    async fn probe(&self) -> Result<()> {
        let wait = async {
            loop {
                if read_attr(&self.dir, "authorized").await.as_deref() == Some("1") {
                    return;
                }
                tokio::time::sleep(PROBE_POLL_INTERVAL).await;
            }
        };

        tokio::time::timeout(self.timeout, wait)
            .await
            .map_err(|_| AppError::hardware(self.path(), format!("{:?} 内设备未恢复", self.timeout)))
    }
}

async fn read_attr(dir: &Path, name: &str) -> Option<String> {
    tokio::fs::read_to_string(dir.join(name))
        .await
        .ok()
        .map(|s| s.trim().to_string())
}

/// `bcdDevice` 转换为版本号，例如 `0543` -> `5.4.3`
fn format_bcd_version(bcd: &str) -> String {
    let Ok(raw) = u16::from_str_radix(bcd, 16) else {
        return bcd.to_string();
    };

    let major = (raw >> 12) * 10 + ((raw >> 8) & 0xf);
    let minor = (raw >> 4) & 0xf;
    let patch = raw & 0xf;
    format!("{}.{}.{}", major, minor, patch)
}
