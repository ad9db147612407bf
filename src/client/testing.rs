//! 客户端测试用的模拟服务端

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// `/v1/acquire` 的行为
#[derive(Clone, Copy)]
pub enum AcquireMode {
    Ok,
    Exhausted,
    EmptyId,
}

pub struct ServerState {
    pub mode: AcquireMode,
    pub acquires: AtomicUsize,
    pub pings: AtomicUsize,
    pub releases: AtomicUsize,
    pub reboots: AtomicUsize,
    /// 剩余需要以 500 失败的 reboot 次数
    pub failing_reboots: AtomicUsize,
    /// 剩余需要以 500 失败的 release 次数
    pub failing_releases: AtomicUsize,
    /// 为 true 时 ping 总是返回 500
    pub failing_pings: AtomicBool,
    pub touches: Mutex<Vec<Value>>,
}

pub struct TestServer {
    pub url: String,
    pub state: Arc<ServerState>,
}

fn internal_error() -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error_code": 1, "message": "internal"})),
    )
}

async fn acquire(State(state): State<Arc<ServerState>>) -> (StatusCode, Json<Value>) {
    state.acquires.fetch_add(1, Ordering::SeqCst);
    match state.mode {
        AcquireMode::Ok => (StatusCode::OK, Json(json!({"id": "lease-1", "serial": 111}))),
        AcquireMode::Exhausted => (
            StatusCode::GONE,
            Json(json!({"error_code": 2, "message": "no free device"})),
        ),
        AcquireMode::EmptyId => (StatusCode::OK, Json(json!({"id": "", "serial": 111}))),
    }
}

async fn ping(State(state): State<Arc<ServerState>>) -> Result<StatusCode, (StatusCode, Json<Value>)> {
    state.pings.fetch_add(1, Ordering::SeqCst);
    if state.failing_pings.load(Ordering::SeqCst) {
        return Err(internal_error());
    }
    Ok(StatusCode::OK)
}

async fn reboot(State(state): State<Arc<ServerState>>) -> Result<StatusCode, (StatusCode, Json<Value>)> {
    state.reboots.fetch_add(1, Ordering::SeqCst);
    let remaining = state.failing_reboots.load(Ordering::SeqCst);
    if remaining > 0 {
        state.failing_reboots.store(remaining - 1, Ordering::SeqCst);
        return Err(internal_error());
    }
    Ok(StatusCode::OK)
}

async fn touch(State(state): State<Arc<ServerState>>, Json(body): Json<Value>) -> StatusCode {
    state.touches.lock().unwrap().push(body);
    StatusCode::OK
}

async fn release(State(state): State<Arc<ServerState>>) -> Result<StatusCode, (StatusCode, Json<Value>)> {
    state.releases.fetch_add(1, Ordering::SeqCst);
    let remaining = state.failing_releases.load(Ordering::SeqCst);
    if remaining > 0 {
        state.failing_releases.store(remaining - 1, Ordering::SeqCst);
        return Err(internal_error());
    }
    Ok(StatusCode::OK)
}

/// 在随机端口上启动模拟服务端
pub async fn spawn_server(mode: AcquireMode) -> TestServer {
    let state = Arc::new(ServerState {
        mode,
        acquires: AtomicUsize::new(0),
        pings: AtomicUsize::new(0),
        releases: AtomicUsize::new(0),
        reboots: AtomicUsize::new(0),
        failing_reboots: AtomicUsize::new(0),
        failing_releases: AtomicUsize::new(0),
        failing_pings: AtomicBool::new(false),
        touches: Mutex::new(Vec::new()),
    });

    let app = Router::new()
        .route("/v1/acquire", post(acquire))
        .route("/v1/ping", post(ping))
        .route("/v1/reboot", post(reboot))
        .route("/v1/touch", post(touch))
        .route("/v1/release", post(release))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        url: format!("http://{}", addr),
        state,
    }
}
