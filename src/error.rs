use thiserror::Error;

use crate::api::types::ServiceErrorCode;

/// 服务端统一错误类型
#[derive(Error, Debug)]
pub enum AppError {
    /// 设备池中没有空闲设备
    #[error("没有空闲的设备")]
    NoFreeDevice,

    /// 持有者没有关联的设备（未知或已过期的 id）
    #[error("持有者 {0} 没有关联的设备")]
    NotAssociated(String),

    /// 子系统未初始化
    #[error("{0} 未初始化")]
    NotInitialized(&'static str),

    /// 设备枚举失败
    #[error("设备枚举失败: {0}")]
    Enumeration(String),

    /// 硬件操作失败
    #[error("{device} 硬件操作失败: {message}")]
    Hardware { device: String, message: String },

    /// 设备未找到
    #[error("设备未找到: #{0}")]
    DeviceNotFound(u32),

    /// 设备没有可用的触摸通道
    #[error("设备 #{0} 没有配置触摸通道")]
    ChannelUnresolved(u32),

    /// 未配置触摸硬件
    #[error("不支持触摸操作: 未配置触摸控制器")]
    TouchUnsupported,

    /// 请求参数无效
    #[error("无效的请求: {0}")]
    InvalidRequest(String),

    /// IO 错误
    #[error("IO 错误: {0}")]
    IoError(#[from] std::io::Error),
}

/// AppError 的 Result 类型别名
pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    /// 构造硬件错误
    pub fn hardware(device: impl Into<String>, message: impl ToString) -> Self {
        AppError::Hardware {
            device: device.into(),
            message: message.to_string(),
        }
    }

    /// 将错误转换为 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::NoFreeDevice => 410,
            AppError::NotAssociated(_) => 400,
            AppError::NotInitialized(_) => 400,
            AppError::InvalidRequest(_) => 400,
            AppError::DeviceNotFound(_) => 400,
            AppError::ChannelUnresolved(_) => 406,
            AppError::Enumeration(_) => 500,
            AppError::Hardware { .. } => 500,
            AppError::TouchUnsupported => 500,
            AppError::IoError(_) => 500,
        }
    }

    /// 将错误转换为协议错误码
    pub fn error_code(&self) -> ServiceErrorCode {
        match self {
            AppError::NoFreeDevice => ServiceErrorCode::NoFreeDevice,
            _ => ServiceErrorCode::Internal,
        }
    }

    /// 客户端是否应当重试
    ///
    /// 调用方错误和配置错误重试也不会成功；其余（包括硬件故障）按惯例视为暂时性失败。
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            AppError::NoFreeDevice
                | AppError::NotAssociated(_)
                | AppError::NotInitialized(_)
                | AppError::InvalidRequest(_)
                | AppError::DeviceNotFound(_)
                | AppError::ChannelUnresolved(_)
        )
    }
}
