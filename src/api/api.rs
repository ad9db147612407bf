use std::future::Future;
use std::sync::Arc;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::api::types::{AcquireResponse, LeaseRequest, ServiceError, TouchRequest};
use crate::context::IContext;
use crate::error::{AppError, Result};
use crate::pool::{DeviceInfo, DevicePool};

/// 默认监听地址
pub const DEFAULT_ADDR: &str = "127.0.0.1:3000";

/// Handler 共享的状态
pub type SharedContext = Arc<dyn IContext + Sync + Send>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(status = status.as_u16(), retryable = self.is_retryable(), "请求处理失败: {}", self);
        } else {
            debug!(status = status.as_u16(), retryable = self.is_retryable(), "请求被拒绝: {}", self);
        }

        let body = ServiceError {
            status: status.as_u16(),
            error_code: self.error_code(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// 监听地址
///
/// 以 `/` 或 `.` 开头的视为 unix socket 路径；Linux 上以 `@` 开头的视为抽象 socket。
#[derive(Debug, PartialEq, Eq)]
enum ListenAddr {
    Tcp(String),
    #[cfg(unix)]
    Unix(std::path::PathBuf),
    #[cfg(target_os = "linux")]
    Abstract(String),
}

impl ListenAddr {
    fn parse(addr: &str) -> std::io::Result<Self> {
        match addr.chars().next() {
            None => Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "监听地址为空")),
            #[cfg(unix)]
            Some('/') | Some('.') => Ok(ListenAddr::Unix(addr.into())),
            #[cfg(target_os = "linux")]
            Some('@') => Ok(ListenAddr::Abstract(addr[1..].to_string())),
            Some(_) => Ok(ListenAddr::Tcp(addr.to_string())),
        }
    }
}

pub struct ApiServer {
    pub app: Router,
}

impl ApiServer {
    pub fn new(ctx: SharedContext) -> Self {
        let app = Router::new()
            .route("/v1/acquire", post(Self::acquire))
            .route("/v1/touch", post(Self::touch))
            .route("/v1/reboot", post(Self::reboot))
            .route("/v1/ping", post(Self::ping))
            .route("/v1/release", post(Self::release))
            .route("/v1/devices", get(Self::list_devices))
            .layer(TraceLayer::new_for_http())
            .with_state(ctx);
        ApiServer { app }
    }

    /// 启动 API 服务器，`shutdown` 完成后优雅退出
    pub async fn run<F>(self, addr: &str, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match ListenAddr::parse(addr)? {
            ListenAddr::Tcp(addr) => {
                let listener = tokio::net::TcpListener::bind(&addr).await?;
                info!("API 服务器监听于 http://{}", listener.local_addr()?);
                axum::serve(listener, self.app)
                    .with_graceful_shutdown(shutdown)
                    .await
            }
            #[cfg(unix)]
            ListenAddr::Unix(path) => {
                // 清理上次残留的 socket 文件
                if path.exists() {
                    std::fs::remove_file(&path)?;
                }
                let listener = tokio::net::UnixListener::bind(&path)?;
                info!("API 服务器监听于 unix:{}", path.display());
                axum::serve(listener, self.app)
                    .with_graceful_shutdown(shutdown)
                    .await
            }
            #[cfg(target_os = "linux")]
            ListenAddr::Abstract(name) => {
                use std::os::linux::net::SocketAddrExt;

                let socket_addr = std::os::unix::net::SocketAddr::from_abstract_name(name.as_bytes())?;
                let std_listener = std::os::unix::net::UnixListener::bind_addr(&socket_addr)?;
                std_listener.set_nonblocking(true)?;
                let listener = tokio::net::UnixListener::from_std(std_listener)?;
                info!("API 服务器监听于 unix:@{}", name);
                axum::serve(listener, self.app)
                    .with_graceful_shutdown(shutdown)
                    .await
            }
        }
    }

    /// 获取一个空闲设备
    async fn acquire(State(ctx): State<SharedContext>) -> Result<Json<AcquireResponse>> {
        let pool = ctx.get_pool()?;
        let id = Uuid::new_v4().to_string();

        let device = pool.acquire(&id).await?;
        info!(holder = %id, serial = device.serial, path = %device.path, "设备已被获取");

        Ok(Json(AcquireResponse {
            id,
            serial: device.serial,
        }))
    }

    /// 触摸持有的设备
    async fn touch(
        State(ctx): State<SharedContext>,
        body: std::result::Result<Json<TouchRequest>, JsonRejection>,
    ) -> Result<StatusCode> {
        let Json(req) = body.map_err(bad_body)?;
        let device = Self::lookup(ctx.get_pool()?, &req.id).await?;

        if device.channel == 0 {
            return Err(AppError::ChannelUnresolved(device.serial));
        }

        if let Err(e) = ctx
            .get_toucher()
            .trigger(device.channel, req.delay, req.duration)
            .await
        {
            error!(holder = %req.id, serial = device.serial, path = %device.path, "触摸失败: {}", e);
            return Err(e);
        }

        info!(holder = %req.id, serial = device.serial, channel = device.channel, "设备已触摸");
        Ok(StatusCode::OK)
    }

    /// 重启持有的设备
    async fn reboot(
        State(ctx): State<SharedContext>,
        body: std::result::Result<Json<LeaseRequest>, JsonRejection>,
    ) -> Result<StatusCode> {
        let Json(req) = body.map_err(bad_body)?;
        let pool = ctx.get_pool()?;
        let device = Self::lookup(pool, &req.id).await?;

        if let Err(e) = pool.reboot(device.serial).await {
            error!(holder = %req.id, serial = device.serial, path = %device.path, "重启失败: {}", e);
            return Err(e);
        }

        info!(holder = %req.id, serial = device.serial, "设备已重启");
        Ok(StatusCode::OK)
    }

    /// 续期租约
    async fn ping(
        State(ctx): State<SharedContext>,
        body: std::result::Result<Json<LeaseRequest>, JsonRejection>,
    ) -> Result<StatusCode> {
        let Json(req) = body.map_err(bad_body)?;
        let device = ctx.get_pool()?.ping_client(holder_id(&req.id)?).await?;

        debug!(holder = %req.id, serial = device.serial, "收到 ping");
        Ok(StatusCode::OK)
    }

    /// 释放租约
    async fn release(
        State(ctx): State<SharedContext>,
        body: std::result::Result<Json<LeaseRequest>, JsonRejection>,
    ) -> Result<StatusCode> {
        let Json(req) = body.map_err(bad_body)?;
        let device = ctx.get_pool()?.release_client(holder_id(&req.id)?).await?;

        info!(holder = %req.id, serial = device.serial, "设备已归还");
        Ok(StatusCode::OK)
    }

    /// 获取设备列表
    async fn list_devices(State(ctx): State<SharedContext>) -> Result<Json<Vec<DeviceInfo>>> {
        let devices = ctx.get_pool()?.list().await;
        debug!("获取设备列表成功，共 {} 个设备", devices.len());
        Ok(Json(devices))
    }

    async fn lookup(pool: &DevicePool, id: &str) -> Result<DeviceInfo> {
        pool.for_client(holder_id(id)?).await
    }
}

fn holder_id(id: &str) -> Result<&str> {
    if id.is_empty() {
        return Err(AppError::InvalidRequest("持有者 id 为空".to_string()));
    }
    Ok(id)
}

fn bad_body(rejection: JsonRejection) -> AppError {
    AppError::InvalidRequest(rejection.body_text())
}
