//! 触摸控制器模块
//!
//! 模拟用户在设备上"按一下"的硬件抽象

mod command;

pub use command::{CommandToucher, CommandToucherConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use crate::error::{AppError, Result};

/// 触摸控制器类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToucherKind {
    /// 没有触摸硬件
    #[default]
    #[serde(alias = "")]
    None,
    /// 外部驱动程序
    Command,
}

/// 触摸控制器
#[async_trait]
pub trait TouchController: Send + Sync {
    /// 在指定通道上触发一次触摸
    async fn trigger(&self, channel: u32, delay: Duration, duration: Duration) -> Result<()>;

    /// 控制器自身的总线位置，未知时为空字符串
    fn location(&self) -> String;
}

/// 未配置触摸硬件时使用的控制器，所有触发都会失败
#[derive(Debug, Default, Clone)]
pub struct NopToucher;

impl NopToucher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TouchController for NopToucher {
    async fn trigger(&self, _channel: u32, _delay: Duration, _duration: Duration) -> Result<()> {
        Err(AppError::TouchUnsupported)
    }

    fn location(&self) -> String {
        String::new()
    }
}
