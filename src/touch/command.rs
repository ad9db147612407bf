//! 通过外部驱动程序触发触摸

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

use super::TouchController;
use crate::error::{AppError, Result};

const DEVICE_NAME: &str = "toucher";

/// 外部驱动配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandToucherConfig {
    /// 驱动程序路径
    pub program: String,

    /// 参数模板，支持 `{channel}`、`{delay_ms}`、`{duration_ms}` 占位符
    pub args: Vec<String>,

    /// 控制器的总线位置
    pub location: String,

    /// 单次触发的超时时间（秒）
    pub timeout: u64,
}

impl Default for CommandToucherConfig {
    fn default() -> Self {
        Self {
            program: "h4ptix".to_string(),
            args: vec![
                "trigger".to_string(),
                "--port".to_string(),
                "{channel}".to_string(),
                "--delay".to_string(),
                "{delay_ms}ms".to_string(),
                "--duration".to_string(),
                "{duration_ms}ms".to_string(),
            ],
            location: String::new(),
            timeout: 10,
        }
    }
}

/// 调用外部驱动程序的触摸控制器
pub struct CommandToucher {
    config: CommandToucherConfig,
}

impl CommandToucher {
    pub fn new(config: CommandToucherConfig) -> Result<Self> {
        if config.program.is_empty() {
            return Err(AppError::NotInitialized("触摸驱动程序"));
        }
        Ok(Self { config })
    }

    fn render_args(&self, channel: u32, delay: Duration, duration: Duration) -> Vec<String> {
        let channel = channel.to_string();
        let delay_ms = delay.as_millis().to_string();
        let duration_ms = duration.as_millis().to_string();

        self.config
            .args
            .iter()
            .map(|arg| {
                arg.replace("{channel}", &channel)
                    .replace("{delay_ms}", &delay_ms)
                    .replace("{duration_ms}", &duration_ms)
            })
            .collect()
    }
}

#[async_trait]
impl TouchController for CommandToucher {
    async fn trigger(&self, channel: u32, delay: Duration, duration: Duration) -> Result<()> {
        let args = self.render_args(channel, delay, duration);
        debug!("执行触摸驱动: {} {:?}", self.config.program, args);

        let child = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::hardware(DEVICE_NAME, format!("启动 {} 失败: {}", self.config.program, e)))?;

        // 等待时长本身也计入超时
        let timeout = Duration::from_secs(self.config.timeout) + delay + duration;
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| AppError::hardware(DEVICE_NAME, format!("触发超时 ({:?})", timeout)))?
            .map_err(|e| AppError::hardware(DEVICE_NAME, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(AppError::hardware(
                DEVICE_NAME,
                format!("驱动退出状态 {}: {}", output.status, stderr.trim()),
            ));
        }

        info!("触摸已触发，通道: {}", channel);
        Ok(())
    }

    fn location(&self) -> String {
        self.config.location.clone()
    }
}
