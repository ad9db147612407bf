//! 客户端请求重试

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// 两次尝试之间的等待策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    /// 不等待
    Immediate,

    /// 每次等待相同时间
    Fixed(Duration),

    /// 从 `initial` 开始每次翻倍，不超过 `max`
    Exponential { initial: Duration, max: Duration },
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self::Exponential {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(10),
        }
    }
}

impl RetryStrategy {
    /// 第 `retry` 次重试（从 0 开始）前的等待时间
    pub fn delay_for(&self, retry: u32) -> Duration {
        match *self {
            RetryStrategy::Immediate => Duration::ZERO,
            RetryStrategy::Fixed(delay) => delay,
            RetryStrategy::Exponential { initial, max } => {
                let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

/// 重试配置
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 总尝试次数，至少为 1
    pub max_attempts: u32,
    pub strategy: RetryStrategy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            strategy: RetryStrategy::default(),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, strategy: RetryStrategy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            strategy,
        }
    }

    /// 只尝试一次
    pub fn none() -> Self {
        Self::new(1, RetryStrategy::Immediate)
    }

    /// 执行 `request`，失败且 `should_retry` 为真时按策略等待后重试
    pub async fn execute<F, Fut, T, E, R>(&self, mut request: F, should_retry: R) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
        R: Fn(&E) -> bool,
    {
        let mut retry = 0;
        loop {
            let err = match request().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let attempt = retry + 1;
            if attempt >= self.max_attempts || !should_retry(&err) {
                debug!(attempt, "请求失败，不再重试: {}", err);
                return Err(err);
            }

            let delay = self.strategy.delay_for(retry);
            warn!(attempt, ?delay, "请求失败，稍后重试: {}", err);
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }
}
