//! 客户端租约句柄
//!
//! 持有期间后台定时 ping 服务端；释放后保活任务退出，句柄不可再用。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::client::{ClientError, TouchOptions, Upstream};

/// 已获取的设备租约
pub struct LeaseHandle {
    id: String,
    serial: u32,
    upstream: Arc<Upstream>,
    cancel: Mutex<Option<oneshot::Sender<()>>>,
    keepalive: Mutex<Option<JoinHandle<()>>>,
    /// 保活已停止，句柄不再接受新操作
    closed: AtomicBool,
    /// 服务端已确认归还；同时串行化并发的 release
    released: Mutex<bool>,
}

impl std::fmt::Debug for LeaseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseHandle")
            .field("id", &self.id)
            .field("serial", &self.serial)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl LeaseHandle {
    /// 创建句柄并启动保活任务
    pub(crate) fn start(upstream: Arc<Upstream>, id: String, serial: u32, ping_interval: Duration) -> Self {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let task = tokio::spawn(keepalive_loop(
            Arc::clone(&upstream),
            id.clone(),
            serial,
            ping_interval,
            cancel_rx,
        ));

        Self {
            id,
            serial,
            upstream,
            cancel: Mutex::new(Some(cancel_tx)),
            keepalive: Mutex::new(Some(task)),
            closed: AtomicBool::new(false),
            released: Mutex::new(false),
        }
    }

    /// 服务端分配的持有者 id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 设备序列号
    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_active(&self) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        Ok(())
    }

    /// 触摸设备
    pub async fn touch(&self, options: TouchOptions) -> Result<(), ClientError> {
        self.ensure_active()?;
        self.upstream.touch(&self.id, options).await
    }

    /// 重启设备
    pub async fn reboot(&self) -> Result<(), ClientError> {
        self.ensure_active()?;
        self.upstream.reboot(&self.id).await
    }

    /// 手动续期
    pub async fn ping(&self) -> Result<(), ClientError> {
        self.ensure_active()?;
        self.upstream.ping(&self.id).await
    }

    /// 停止保活并归还设备
    ///
    /// 服务端确认后再次调用直接返回；归还失败时句柄仍处于关闭状态，
    /// 再次调用会重新发送归还请求。
    pub async fn release(&self) -> Result<(), ClientError> {
        let mut released = self.released.lock().await;
        if *released {
            debug!(session_id = %self.id, "租约已释放，忽略重复释放");
            return Ok(());
        }

        self.closed.store(true, Ordering::SeqCst);

        if let Some(cancel) = self.cancel.lock().await.take() {
            let _ = cancel.send(());
        }

        // 等保活任务退出，保证释放之后不会再有 ping
        if let Some(task) = self.keepalive.lock().await.take() {
            if let Err(e) = task.await {
                warn!(session_id = %self.id, "保活任务异常退出: {}", e);
            }
        }

        self.upstream.release(&self.id).await?;
        *released = true;
        info!(session_id = %self.id, serial = self.serial, "已归还设备");
        Ok(())
    }

    /// 等同于 [`LeaseHandle::release`]
    pub async fn close(self) -> Result<(), ClientError> {
        self.release().await
    }
}

impl Drop for LeaseHandle {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.get_mut().take() {
            warn!(
                session_id = %self.id,
                serial = self.serial,
                "租约未释放即被丢弃，停止保活，设备将在服务端过期后回收"
            );
            let _ = cancel.send(());
        } else if !*self.released.get_mut() {
            warn!(
                session_id = %self.id,
                serial = self.serial,
                "租约归还失败，设备将在服务端过期后回收"
            );
        }
    }
}

async fn keepalive_loop(
    upstream: Arc<Upstream>,
    id: String,
    serial: u32,
    period: Duration,
    mut cancel: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // 发送端被丢弃同样视为取消
            _ = &mut cancel => break,
            _ = ticker.tick() => {
                if let Err(e) = upstream.ping_once(&id).await {
                    error!(session_id = %id, serial, "保活 ping 失败: {}", e);
                }
            }
        }
    }

    debug!(session_id = %id, "保活任务已退出");
}

#[cfg(test)]
mod tests {
    use super::LeaseHandle;
    use crate::client::client::{ClientError, SvcClient, TouchOptions, Upstream};
    use crate::client::retry::RetryConfig;
    use crate::client::testing::{spawn_server, AcquireMode};
    use std::sync::Arc;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    const PING_INTERVAL: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn test_keepalive_pings_until_close() {
        let server = spawn_server(AcquireMode::Ok).await;
        let client = SvcClient::new(&server.url)
            .unwrap()
            .with_ping_interval(PING_INTERVAL);

        let lease = client.acquire().await.unwrap();
        assert_eq!(lease.id(), "lease-1");
        assert_eq!(lease.serial(), 111);

        tokio::time::sleep(PING_INTERVAL * 6).await;
        assert!(server.state.pings.load(Ordering::SeqCst) >= 2);

        lease.close().await.unwrap();
        let pings = server.state.pings.load(Ordering::SeqCst);

        tokio::time::sleep(PING_INTERVAL * 6).await;
        assert_eq!(server.state.pings.load(Ordering::SeqCst), pings);
        assert_eq!(server.state.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let server = spawn_server(AcquireMode::Ok).await;
        let client = SvcClient::new(&server.url).unwrap();
        let lease = client.acquire().await.unwrap();

        lease.release().await.unwrap();
        lease.release().await.unwrap();
        assert!(lease.is_closed());
        assert_eq!(server.state.releases.load(Ordering::SeqCst), 1);

        assert!(matches!(lease.ping().await, Err(ClientError::Closed)));
        assert!(matches!(lease.touch(TouchOptions::new()).await, Err(ClientError::Closed)));
        assert!(matches!(lease.reboot().await, Err(ClientError::Closed)));
    }

    #[tokio::test]
    async fn test_failed_release_is_resent() {
        let server = spawn_server(AcquireMode::Ok).await;
        server.state.failing_releases.store(1, Ordering::SeqCst);

        let client = SvcClient::new(&server.url)
            .unwrap()
            .with_retry(RetryConfig::none());
        let lease = client.acquire().await.unwrap();

        let err = lease.release().await.unwrap_err();
        assert!(matches!(err, ClientError::Service(_)));
        assert!(lease.is_closed());
        assert!(matches!(lease.ping().await, Err(ClientError::Closed)));
        assert_eq!(server.state.releases.load(Ordering::SeqCst), 1);

        // 上次归还失败，需要重新发送
        lease.release().await.unwrap();
        assert_eq!(server.state.releases.load(Ordering::SeqCst), 2);

        lease.release().await.unwrap();
        assert_eq!(server.state.releases.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_release_to_dead_upstream_keeps_failing() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let upstream = Arc::new(Upstream::new(
            reqwest::Client::new(),
            format!("http://{}", addr),
            RetryConfig::none(),
        ));
        let lease = LeaseHandle::start(upstream, "lease-1".to_string(), 111, PING_INTERVAL);

        for _ in 0..2 {
            let err = lease.release().await.unwrap_err();
            assert!(matches!(err, ClientError::Transport(_)));
        }
        assert!(lease.is_closed());
    }

    #[tokio::test]
    async fn test_debug_shows_identity() {
        let server = spawn_server(AcquireMode::Ok).await;
        let client = SvcClient::new(&server.url).unwrap();
        let lease = client.acquire().await.unwrap();

        let text = format!("{:?}", lease);
        assert!(text.contains("lease-1"));
        assert!(text.contains("111"));
        lease.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_ping_failures_keep_lease_active() {
        let server = spawn_server(AcquireMode::Ok).await;
        server.state.failing_pings.store(true, Ordering::SeqCst);

        let client = SvcClient::new(&server.url)
            .unwrap()
            .with_ping_interval(PING_INTERVAL);
        let lease = client.acquire().await.unwrap();

        tokio::time::sleep(PING_INTERVAL * 6).await;
        assert!(server.state.pings.load(Ordering::SeqCst) >= 2);
        assert!(!lease.is_closed());

        lease.close().await.unwrap();
        assert_eq!(server.state.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_stops_keepalive() {
        let server = spawn_server(AcquireMode::Ok).await;
        let client = SvcClient::new(&server.url)
            .unwrap()
            .with_ping_interval(PING_INTERVAL);

        let lease = client.acquire().await.unwrap();
        drop(lease);

        tokio::time::sleep(PING_INTERVAL * 4).await;
        assert_eq!(server.state.pings.load(Ordering::SeqCst), 0);
        assert_eq!(server.state.releases.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_touch_sends_nanoseconds() {
        let server = spawn_server(AcquireMode::Ok).await;
        let client = SvcClient::new(&server.url).unwrap();
        let lease = client.acquire().await.unwrap();

        lease
            .touch(
                TouchOptions::new()
                    .with_delay(Duration::from_secs(1))
                    .with_duration(Duration::from_millis(200)),
            )
            .await
            .unwrap();

        let touches = server.state.touches.lock().unwrap().clone();
        assert_eq!(
            touches,
            vec![serde_json::json!({"id": "lease-1", "delay": 1_000_000_000u64, "duration": 200_000_000u64})]
        );
        lease.close().await.unwrap();
    }
}
