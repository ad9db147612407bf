use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::pool::DevicePool;
use crate::touch::{NopToucher, TouchController};

/// Context trait，定义获取设备池和触摸控制器的接口
pub trait IContext: Send + Sync {
    /// 获取设备池，未初始化时返回错误
    fn get_pool(&self) -> Result<&DevicePool>;

    /// 获取触摸控制器，未配置硬件时为 [`NopToucher`]
    fn get_toucher(&self) -> &dyn TouchController;
}

/// 线程安全的 Context，管理 DevicePool 和 TouchController
pub struct Context {
    pool: Option<Arc<DevicePool>>,
    toucher: Arc<dyn TouchController>,
}

impl Context {
    /// 创建新的 Context 实例
    pub fn new(pool: Arc<DevicePool>, toucher: Arc<dyn TouchController>) -> Self {
        Context {
            pool: Some(pool),
            toucher,
        }
    }

    /// 创建没有设备池的 Context
    pub fn without_pool(toucher: Arc<dyn TouchController>) -> Self {
        Context { pool: None, toucher }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::without_pool(Arc::new(NopToucher::new()))
    }
}

impl IContext for Context {
    fn get_pool(&self) -> Result<&DevicePool> {
        self.pool
            .as_deref()
            .ok_or(AppError::NotInitialized("设备池"))
    }

    fn get_toucher(&self) -> &dyn TouchController {
        self.toucher.as_ref()
    }
}
