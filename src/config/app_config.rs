use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::api::DEFAULT_ADDR;
use crate::device::{DeviceProvider, SysfsProvider, YUBICO_VENDOR_ID};
use crate::discovery::{DiscoveryKind, LocationResolver};
use crate::pool::{DevicePool, DevicePoolConfig};
use crate::touch::{CommandToucher, CommandToucherConfig, NopToucher, TouchController, ToucherKind};

/// 完整的服务配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub pool: DevicePoolConfig,
    pub discovery: DiscoveryConfig,
    pub touch: TouchConfig,
    pub provider: ProviderConfig,
    pub log: LogConfig,
}

/// HTTP 服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// 监听地址，以 `/` 或 `.` 开头时为 unix socket
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
        }
    }
}

/// 通道发现配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub kind: DiscoveryKind,
    /// `kind = "manual"` 时使用的映射表
    pub manual: Vec<ManualChannel>,
}

/// 手动配置的序列号 -> 通道
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualChannel {
    pub serial: u32,
    pub channel: u32,
}

/// 触摸控制器配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TouchConfig {
    pub kind: ToucherKind,
    pub command: CommandToucherConfig,
}

/// 设备枚举配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub sysfs_root: PathBuf,
    /// USB 厂商 ID（十六进制）
    pub vendor_id: String,
    /// 硬件操作超时（秒）
    pub timeout: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from("/sys/bus/usb/devices"),
            vendor_id: YUBICO_VENDOR_ID.to_string(),
            timeout: 5,
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// 默认日志级别，`RUST_LOG` 优先
    pub level: String,
    /// 日志文件目录，为空时只输出到 stderr
    pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}

impl AppConfig {
    /// 从 TOML 文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::from_files(&[path])
    }

    /// 按顺序加载多个文件，后面的文件覆盖前面的同名键
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self, ConfigError> {
        let mut merged = toml::Table::new();
        for path in paths {
            let path = path.as_ref();
            let content = fs::read_to_string(path)
                .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;

            let table: toml::Table = toml::from_str(&content)
                .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;
            merge_tables(&mut merged, table);
        }

        let config: AppConfig = toml::Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// 从文件加载，并使用环境变量覆盖
    pub fn from_files_with_env<P: AsRef<Path>>(paths: &[P]) -> Result<Self, ConfigError> {
        let mut config = Self::from_files(paths)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// 使用环境变量覆盖配置
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("YUBICTL_ADDR") {
            self.server.addr = addr;
        }

        if let Some(ttl) = lookup("YUBICTL_LEASE_TTL") {
            self.pool.lease_ttl = ttl
                .parse()
                .map_err(|_| ConfigError::ValidationError(format!("YUBICTL_LEASE_TTL 无效: {}", ttl)))?;
        }

        if let Some(level) = lookup("YUBICTL_LOG_LEVEL") {
            self.log.level = level;
        }

        Ok(())
    }

    /// 校验配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.addr.is_empty() {
            return Err(ConfigError::ValidationError("server.addr 不能为空".to_string()));
        }

        if self.pool.lease_ttl == 0 {
            return Err(ConfigError::ValidationError("pool.lease_ttl 必须大于 0".to_string()));
        }

        if let Some(entry) = self.discovery.manual.iter().find(|m| m.channel == 0) {
            return Err(ConfigError::ValidationError(format!(
                "设备 #{} 的通道不能为 0",
                entry.serial
            )));
        }

        if self.touch.kind == ToucherKind::Command && self.touch.command.program.is_empty() {
            return Err(ConfigError::ValidationError("touch.command.program 不能为空".to_string()));
        }

        Ok(())
    }

    /// 创建触摸控制器
    pub fn build_toucher(&self) -> Result<Arc<dyn TouchController>, ConfigError> {
        match self.touch.kind {
            ToucherKind::None => Ok(Arc::new(NopToucher::new())),
            ToucherKind::Command => CommandToucher::new(self.touch.command.clone())
                .map(|t| Arc::new(t) as Arc<dyn TouchController>)
                .map_err(|e| ConfigError::ValidationError(e.to_string())),
        }
    }

    /// 创建通道解析器
    pub fn build_resolver(&self, toucher: &Arc<dyn TouchController>) -> LocationResolver {
        match self.discovery.kind {
            DiscoveryKind::None => LocationResolver::Disabled,
            DiscoveryKind::Manual => LocationResolver::Manual(
                self.discovery
                    .manual
                    .iter()
                    .map(|m| (m.serial, m.channel))
                    .collect::<HashMap<_, _>>(),
            ),
            DiscoveryKind::Topology => {
                if toucher.location().is_empty() {
                    warn!("触摸控制器位置未知，拓扑发现将排除所有设备");
                }
                LocationResolver::Topology(Arc::clone(toucher))
            }
        }
    }

    /// 创建设备提供者
    pub fn build_provider(&self) -> Arc<dyn DeviceProvider> {
        Arc::new(SysfsProvider::new(
            self.provider.sysfs_root.clone(),
            self.provider.vendor_id.clone(),
            Duration::from_secs(self.provider.timeout),
        ))
    }

    /// 创建设备池（设备表为空，需要 reload）
    pub fn build_pool(&self, toucher: &Arc<dyn TouchController>) -> DevicePool {
        DevicePool::new(
            self.pool.clone(),
            self.build_provider(),
            self.build_resolver(toucher),
        )
    }
}

/// 递归合并 TOML 表
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(base_table)), toml::Value::Table(overlay_table)) => {
                merge_tables(base_table, overlay_table);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// 配置错误
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO 错误: {0}")]
    IoError(String),

    #[error("解析错误: {0}")]
    ParseError(String),

    #[error("验证错误: {0}")]
    ValidationError(String),
}
