use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use yubictl_rs::api::{ApiServer, SharedContext};
use yubictl_rs::config::AppConfig;
use yubictl_rs::context::Context;
use yubictl_rs::logger;

#[derive(Parser)]
#[command(name = "yubictld", version, about = "共享 YubiKey 设备池服务", long_about = None)]
struct Cli {
    /// 配置文件，可重复指定，后面的覆盖前面的
    #[arg(short, long, value_name = "FILE")]
    config: Vec<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 启动 HTTP 服务
    Serve {
        /// 覆盖配置中的监听地址
        #[arg(long, env = "YUBICTL_ADDR")]
        addr: Option<String>,
    },
    /// 列出当前连接的设备
    #[command(alias = "ls")]
    List,
    /// 重启所有设备
    Reboot,
    /// 在指定通道上触发一次触摸
    Touch {
        #[arg(long)]
        channel: u32,
        #[arg(long, default_value_t = 0)]
        delay_ms: u64,
        #[arg(long, default_value_t = 100)]
        duration_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::from_files_with_env(&cli.config).context("加载配置失败")?;
    let _guard = logger::init(&config.log)?;

    match cli.command {
        Commands::Serve { addr } => serve(config, addr).await,
        Commands::List => list(config).await,
        Commands::Reboot => reboot_all(config).await,
        Commands::Touch {
            channel,
            delay_ms,
            duration_ms,
        } => {
            let toucher = config.build_toucher()?;
            toucher
                .trigger(
                    channel,
                    Duration::from_millis(delay_ms),
                    Duration::from_millis(duration_ms),
                )
                .await
                .with_context(|| format!("通道 {} 触摸失败", channel))?;
            info!(channel, "触摸完成");
            Ok(())
        }
    }
}

async fn serve(config: AppConfig, addr: Option<String>) -> Result<()> {
    let addr = addr.unwrap_or_else(|| config.server.addr.clone());
    info!("启动 yubictl 服务...");

    let toucher = config.build_toucher()?;
    let pool = Arc::new(config.build_pool(&toucher));

    let count = pool.reload().await.context("枚举设备失败")?;
    info!(
        devices = count,
        discovery = %pool.resolver().kind(),
        lease_ttl = ?pool.lease_ttl(),
        "设备池已就绪"
    );
    if count == 0 {
        warn!("没有可用设备，等待重新加载");
    }

    let reload_task = config
        .pool
        .reload_interval()
        .map(|period| pool.spawn_reload_task(period));

    let ctx: SharedContext = Arc::new(Context::new(Arc::clone(&pool), toucher));
    let server = ApiServer::new(ctx);

    let result = server.run(&addr, shutdown_signal()).await;

    if let Some(task) = reload_task {
        task.abort();
    }

    result.with_context(|| format!("API 服务器运行失败: {}", addr))?;
    info!("服务已退出");
    Ok(())
}

async fn list(config: AppConfig) -> Result<()> {
    let toucher = config.build_toucher()?;
    let pool = config.build_pool(&toucher);
    pool.reload().await.context("枚举设备失败")?;

    for device in pool.list().await {
        println!(
            "{}\t#{}\tv{}\t{}\tchannel={}",
            device.path, device.serial, device.version, device.location, device.channel
        );
    }
    Ok(())
}

async fn reboot_all(config: AppConfig) -> Result<()> {
    let toucher = config.build_toucher()?;
    let pool = config.build_pool(&toucher);
    pool.reload().await.context("枚举设备失败")?;

    let mut failed = 0;
    for device in pool.list().await {
        match pool.reboot(device.serial).await {
            Ok(()) => info!(serial = device.serial, "重启完成"),
            Err(e) => {
                error!(serial = device.serial, "重启失败: {}", e);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} 个设备重启失败", failed);
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("监听 Ctrl+C 失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("监听 SIGTERM 失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("收到退出信号，正在关闭...");
}
