use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::lease::LeaseHandle;
use super::retry::RetryConfig;
use crate::api::types::{AcquireResponse, LeaseRequest, ServiceError, ServiceErrorCode, TouchRequest};

/// 默认保活间隔
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(5);

/// 最小保活间隔
pub const MIN_PING_INTERVAL: Duration = Duration::from_millis(10);

/// 默认请求超时
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// 客户端错误
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    /// 服务端返回的业务错误
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// 网络错误
    #[error("请求失败: {0}")]
    Transport(#[from] reqwest::Error),

    /// 非成功状态码且没有可解析的错误体
    #[error("请求失败: 非成功状态码 {0}")]
    Status(u16),

    /// 响应内容不符合预期
    #[error("服务端返回了异常响应: {0}")]
    UnexpectedResponse(String),

    /// 租约已释放
    #[error("租约已释放")]
    Closed,
}

impl ClientError {
    /// 是否为永久性错误（设备池耗尽）
    pub fn is_permanent(&self) -> bool {
        matches!(self, ClientError::Service(e) if e.is_permanent())
    }

    /// 按约定，除永久性错误外都可以重试
    pub fn is_retryable(&self) -> bool {
        !self.is_permanent() && !matches!(self, ClientError::Closed)
    }

    /// SDK 自动重试网络错误和 5xx
    fn should_auto_retry(&self) -> bool {
        match self {
            ClientError::Transport(_) => true,
            ClientError::Service(e) => !e.is_permanent() && e.status >= 500,
            ClientError::Status(status) => *status >= 500,
            ClientError::UnexpectedResponse(_) | ClientError::Closed => false,
        }
    }
}

/// 触摸参数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TouchOptions {
    pub delay: Duration,
    pub duration: Duration,
}

impl TouchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// 触摸前的等待时间
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// 触摸持续时间
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }
}

/// 服务端 HTTP 接口，由 SvcClient 和 LeaseHandle 共享
pub(crate) struct Upstream {
    http: Client,
    base_url: String,
    retry: RetryConfig,
}

impl Upstream {
    pub(crate) fn new(http: Client, base_url: String, retry: RetryConfig) -> Self {
        Self {
            http,
            base_url,
            retry,
        }
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let text = self
            .retry
            .execute(|| self.send(&url, body), ClientError::should_auto_retry)
            .await?;
        decode(&text)
    }

    /// 单次请求，返回响应体
    async fn send<B: Serialize>(&self, url: &str, body: &B) -> Result<String, ClientError> {
        debug!("发送请求到: {}", url);

        let response = self.http.post(url).json(body).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            return Ok(text);
        }

        debug!("请求失败: {} - {}", status, text);
        match serde_json::from_str::<ServiceError>(&text) {
            Ok(mut err) if err.error_code != ServiceErrorCode::None => {
                err.status = status.as_u16();
                Err(ClientError::Service(err))
            }
            _ => Err(ClientError::Status(status.as_u16())),
        }
    }

    async fn acquire(&self) -> Result<AcquireResponse, ClientError> {
        let rsp: AcquireResponse = self.post("/v1/acquire", &serde_json::json!({})).await?;
        if rsp.id.is_empty() || rsp.serial == 0 {
            return Err(ClientError::UnexpectedResponse(format!(
                "id={:?} serial={}",
                rsp.id, rsp.serial
            )));
        }
        Ok(rsp)
    }

    pub(crate) async fn touch(&self, id: &str, options: TouchOptions) -> Result<(), ClientError> {
        let req = TouchRequest {
            id: id.to_string(),
            delay: options.delay,
            duration: options.duration,
        };
        self.post::<_, Empty>("/v1/touch", &req).await.map(drop)
    }

    pub(crate) async fn reboot(&self, id: &str) -> Result<(), ClientError> {
        self.post::<_, Empty>("/v1/reboot", &lease_request(id)).await.map(drop)
    }

    pub(crate) async fn ping(&self, id: &str) -> Result<(), ClientError> {
        self.post::<_, Empty>("/v1/ping", &lease_request(id)).await.map(drop)
    }

    /// 保活使用的单次 ping，下一次 tick 即是重试
    pub(crate) async fn ping_once(&self, id: &str) -> Result<(), ClientError> {
        let url = format!("{}/v1/ping", self.base_url);
        self.send(&url, &lease_request(id)).await.map(drop)
    }

    pub(crate) async fn release(&self, id: &str) -> Result<(), ClientError> {
        self.post::<_, Empty>("/v1/release", &lease_request(id)).await.map(drop)
    }
}

/// 空响应体
struct Empty;

impl<'de> serde::Deserialize<'de> for Empty {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde::de::IgnoredAny::deserialize(deserializer).map(|_| Empty)
    }
}

fn decode<T: DeserializeOwned>(text: &str) -> Result<T, ClientError> {
    // 空响应体按 JSON null 解析
    let text = if text.trim().is_empty() { "null" } else { text };
    serde_json::from_str(text).map_err(|e| ClientError::UnexpectedResponse(format!("{}: {}", e, text)))
}

fn lease_request(id: &str) -> LeaseRequest {
    LeaseRequest { id: id.to_string() }
}

/// yubictl 服务客户端
pub struct SvcClient {
    http: Client,
    base_url: String,
    retry: RetryConfig,
    ping_interval: Duration,
}

impl SvcClient {
    /// 创建新的客户端，`upstream` 形如 `http://localhost:3000`
    pub fn new(upstream: impl Into<String>) -> Result<Self, ClientError> {
        Ok(Self {
            http: build_http(DEFAULT_TIMEOUT)?,
            base_url: upstream.into().trim_end_matches('/').to_string(),
            retry: RetryConfig::default(),
            ping_interval: DEFAULT_PING_INTERVAL,
        })
    }

    /// 设置保活间隔，不小于 [`MIN_PING_INTERVAL`]
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval.max(MIN_PING_INTERVAL);
        self
    }

    /// 设置重试配置
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// 设置单次请求超时
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self, ClientError> {
        self.http = build_http(timeout)?;
        Ok(self)
    }

    /// 获取一个设备租约，并启动保活
    pub async fn acquire(&self) -> Result<LeaseHandle, ClientError> {
        let upstream = Arc::new(Upstream::new(
            self.http.clone(),
            self.base_url.clone(),
            self.retry.clone(),
        ));

        let rsp = upstream.acquire().await?;
        info!(session_id = %rsp.id, serial = rsp.serial, "已获取设备");

        Ok(LeaseHandle::start(upstream, rsp.id, rsp.serial, self.ping_interval))
    }
}

fn build_http(timeout: Duration) -> Result<Client, ClientError> {
    Ok(Client::builder().timeout(timeout).build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::retry::RetryStrategy;
    use crate::client::testing::{spawn_server, AcquireMode};
    use std::sync::atomic::Ordering;

    #[test]
    fn test_error_classification() {
        let no_free = ClientError::Service(ServiceError {
            status: 410,
            error_code: ServiceErrorCode::NoFreeDevice,
            message: String::new(),
        });
        assert!(no_free.is_permanent());
        assert!(!no_free.is_retryable());
        assert!(!no_free.should_auto_retry());

        let internal = ClientError::Service(ServiceError {
            status: 500,
            error_code: ServiceErrorCode::Internal,
            message: String::new(),
        });
        assert!(!internal.is_permanent());
        assert!(internal.should_auto_retry());

        let bad_request = ClientError::Service(ServiceError {
            status: 400,
            error_code: ServiceErrorCode::Internal,
            message: String::new(),
        });
        assert!(bad_request.is_retryable());
        assert!(!bad_request.should_auto_retry());

        assert!(ClientError::Status(502).should_auto_retry());
        assert!(!ClientError::Status(404).should_auto_retry());
    }

    #[test]
    fn test_touch_options_builder() {
        let options = TouchOptions::new()
            .with_delay(Duration::from_secs(1))
            .with_duration(Duration::from_millis(300));
        assert_eq!(options.delay, Duration::from_secs(1));
        assert_eq!(options.duration, Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_zero_ping_interval_is_clamped() {
        let server = spawn_server(AcquireMode::Ok).await;
        let client = SvcClient::new(&server.url)
            .unwrap()
            .with_ping_interval(Duration::ZERO);
        assert_eq!(client.ping_interval, MIN_PING_INTERVAL);

        let lease = client.acquire().await.unwrap();
        tokio::time::sleep(MIN_PING_INTERVAL * 5).await;
        assert!(server.state.pings.load(Ordering::SeqCst) >= 1);
        lease.close().await.unwrap();
    }

    #[test]
    fn test_decode_empty_body() {
        assert!(decode::<Empty>("").is_ok());
        assert!(decode::<AcquireResponse>("").is_err());
    }

    #[tokio::test]
    async fn test_acquire_exhausted_is_permanent_and_not_retried() {
        let server = spawn_server(AcquireMode::Exhausted).await;
        let client = SvcClient::new(&server.url)
            .unwrap()
            .with_retry(RetryConfig::new(4, RetryStrategy::Immediate));

        let err = client.acquire().await.unwrap_err();
        assert!(err.is_permanent());
        assert_eq!(server.state.acquires.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_acquire_rejects_unexpected_response() {
        let server = spawn_server(AcquireMode::EmptyId).await;
        let client = SvcClient::new(&server.url).unwrap();

        let err = client.acquire().await.unwrap_err();
        assert!(matches!(err, ClientError::UnexpectedResponse(_)));
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let server = spawn_server(AcquireMode::Ok).await;
        server.state.failing_reboots.store(2, Ordering::SeqCst);

        let client = SvcClient::new(&server.url)
            .unwrap()
            .with_retry(RetryConfig::new(4, RetryStrategy::Immediate));
        let lease = client.acquire().await.unwrap();

        lease.reboot().await.unwrap();
        assert_eq!(server.state.reboots.load(Ordering::SeqCst), 3);
        lease.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_retries_are_capped() {
        let server = spawn_server(AcquireMode::Ok).await;
        server.state.failing_reboots.store(10, Ordering::SeqCst);

        let client = SvcClient::new(&server.url)
            .unwrap()
            .with_retry(RetryConfig::new(3, RetryStrategy::Immediate));
        let lease = client.acquire().await.unwrap();

        let err = lease.reboot().await.unwrap_err();
        assert!(matches!(err, ClientError::Service(_)));
        assert_eq!(server.state.reboots.load(Ordering::SeqCst), 3);
        lease.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_transport_failure() {
        // 绑定后立即关闭，得到一个没有监听的端口
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = SvcClient::new(format!("http://{}", addr))
            .unwrap()
            .with_retry(RetryConfig::none());
        let err = client.acquire().await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
        assert!(err.is_retryable());
    }
}
