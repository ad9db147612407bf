//! 设备触摸通道发现
//!
//! 在每次重新加载设备时计算设备对应的触摸控制器通道，0 表示未解析

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::touch::TouchController;

/// 发现方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryKind {
    /// 不解析通道
    #[default]
    #[serde(alias = "")]
    None,
    /// 静态序列号 -> 通道表
    Manual,
    /// 按总线拓扑匹配
    #[serde(alias = "toucher")]
    Topology,
}

impl fmt::Display for DiscoveryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryKind::None => write!(f, "none"),
            DiscoveryKind::Manual => write!(f, "manual"),
            DiscoveryKind::Topology => write!(f, "topology"),
        }
    }
}

/// 通道解析器
#[derive(Clone, Default)]
pub enum LocationResolver {
    /// 始终返回 0
    #[default]
    Disabled,
    /// 按序列号查表，缺失时为 0
    Manual(HashMap<u32, u32>),
    /// 设备和控制器挂在同一个集线器下时，取设备的端口号
    Topology(Arc<dyn TouchController>),
}

impl LocationResolver {
    /// 是否启用了解析，启用时无法解析通道的设备会被排除
    pub fn is_enabled(&self) -> bool {
        !matches!(self, LocationResolver::Disabled)
    }

    pub fn kind(&self) -> DiscoveryKind {
        match self {
            LocationResolver::Disabled => DiscoveryKind::None,
            LocationResolver::Manual(_) => DiscoveryKind::Manual,
            LocationResolver::Topology(_) => DiscoveryKind::Topology,
        }
    }

    /// 计算设备的触摸通道
    pub fn resolve(&self, serial: u32, location: &str) -> u32 {
        match self {
            LocationResolver::Disabled => 0,
            LocationResolver::Manual(channels) => channels.get(&serial).copied().unwrap_or(0),
            LocationResolver::Topology(toucher) => topology_channel(location, &toucher.location()),
        }
    }
}

impl fmt::Debug for LocationResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocationResolver::Disabled => write!(f, "Disabled"),
            LocationResolver::Manual(channels) => f.debug_tuple("Manual").field(channels).finish(),
            LocationResolver::Topology(toucher) => {
                f.debug_tuple("Topology").field(&toucher.location()).finish()
            }
        }
    }
}

/// 位置格式为 `hub.hub.port`，父路径一致时返回设备端口号
fn topology_channel(device_location: &str, controller_location: &str) -> u32 {
    if device_location.is_empty() || controller_location.is_empty() {
        return 0;
    }

    let (Some((device_hub, device_port)), Some((controller_hub, _))) = (
        device_location.rsplit_once('.'),
        controller_location.rsplit_once('.'),
    ) else {
        return 0;
    };

    if device_hub != controller_hub {
        return 0;
    }

    device_port.parse().unwrap_or(0)
}
