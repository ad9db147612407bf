//! 设备池实现
//!
//! 统一管理设备列表和租约。所有租约操作都在同一把锁内完成"查找 + 修改"，
//! 硬件 IO（重启、枚举）在锁外进行。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::device_entry::{DeviceEntry, Lease};
use super::types::{DeviceInfo, DevicePoolConfig};
use crate::device::DeviceProvider;
use crate::discovery::LocationResolver;
use crate::error::{AppError, Result};

/// 设备池
pub struct DevicePool {
    /// 设备表，顺序即枚举顺序
    devices: RwLock<Vec<DeviceEntry>>,

    /// 配置
    config: DevicePoolConfig,

    /// 设备提供者
    provider: Arc<dyn DeviceProvider>,

    /// 触摸通道解析器
    resolver: LocationResolver,
}

impl DevicePool {
    /// 创建新的设备池，设备表为空，需要调用 [`DevicePool::reload`]
    pub fn new(
        config: DevicePoolConfig,
        provider: Arc<dyn DeviceProvider>,
        resolver: LocationResolver,
    ) -> Self {
        Self {
            devices: RwLock::new(Vec::new()),
            config,
            provider,
            resolver,
        }
    }

    pub fn lease_ttl(&self) -> Duration {
        self.config.lease_ttl()
    }

    pub fn resolver(&self) -> &LocationResolver {
        &self.resolver
    }

    /// 重新枚举设备
    ///
    /// 新设备表在锁外构建，枚举成功后整体替换；仍然存在的设备保留原租约。
    /// 枚举失败时保持原设备表不变。
    pub async fn reload(&self) -> Result<usize> {
        let discovered = self.provider.enumerate().await?;

        let mut table = Vec::with_capacity(discovered.len());
        for device in discovered {
            let channel = self.resolver.resolve(device.serial, &device.location);
            if self.resolver.is_enabled() && channel == 0 {
                debug!(
                    serial = device.serial,
                    location = %device.location,
                    "无法解析触摸通道，跳过设备"
                );
                continue;
            }
            table.push(DeviceEntry::new(device, channel));
        }

        let mut devices = self.devices.write().await;
        let mut leases: HashMap<u32, Lease> = devices
            .iter_mut()
            .filter_map(|entry| entry.release().map(|lease| (entry.serial, lease)))
            .collect();

        for entry in table.iter_mut() {
            entry.lease = leases.remove(&entry.serial);
        }

        for (serial, lease) in leases {
            warn!(serial, holder = %lease.holder, "设备已移除，丢弃租约");
        }

        *devices = table;
        info!("设备已重新加载，共 {} 个设备", devices.len());
        Ok(devices.len())
    }

    /// 为持有者分配第一个空闲（或租约已过期）的设备
    pub async fn acquire(&self, holder: &str) -> Result<DeviceInfo> {
        if holder.is_empty() {
            return Err(AppError::InvalidRequest("持有者 id 为空".to_string()));
        }

        let ttl = self.lease_ttl();
        let mut devices = self.devices.write().await;
        let now = Instant::now();

        for entry in devices.iter_mut() {
            if !entry.is_free() {
                let idle = entry.idle(now).unwrap_or_default();
                if idle < ttl {
                    continue;
                }

                if let Some(stale) = entry.release() {
                    warn!(
                        serial = entry.serial,
                        holder = %stale.holder,
                        stale_time = ?idle,
                        "释放过期租约"
                    );
                }
            }

            entry.acquire(holder, now);
            info!(serial = entry.serial, holder, "设备已分配");
            return Ok(entry.to_info(now));
        }

        Err(AppError::NoFreeDevice)
    }

    /// 释放设备，设备空闲时什么也不做
    pub async fn release(&self, serial: u32) -> Result<()> {
        let mut devices = self.devices.write().await;
        let entry = find_serial(&mut devices, serial)?;

        if let Some(lease) = entry.release() {
            info!(serial, holder = %lease.holder, "设备已释放");
        }
        Ok(())
    }

    /// 释放持有者关联的设备
    pub async fn release_client(&self, holder: &str) -> Result<DeviceInfo> {
        let mut devices = self.devices.write().await;
        let now = Instant::now();
        let entry = find_holder(&mut devices, holder)?;

        entry.release();
        info!(serial = entry.serial, holder, "设备已释放");
        Ok(entry.to_info(now))
    }

    /// 查找持有者关联的设备
    pub async fn for_client(&self, holder: &str) -> Result<DeviceInfo> {
        let devices = self.devices.read().await;
        devices
            .iter()
            .find(|entry| entry.is_held_by(holder))
            .map(|entry| entry.to_info(Instant::now()))
            .ok_or_else(|| AppError::NotAssociated(holder.to_string()))
    }

    /// 刷新设备的最后访问时间
    pub async fn ping(&self, serial: u32) -> Result<()> {
        let mut devices = self.devices.write().await;
        find_serial(&mut devices, serial)?.touch(Instant::now());
        Ok(())
    }

    /// 刷新持有者关联设备的最后访问时间
    pub async fn ping_client(&self, holder: &str) -> Result<DeviceInfo> {
        let mut devices = self.devices.write().await;
        let now = Instant::now();
        let entry = find_holder(&mut devices, holder)?;

        entry.touch(now);
        debug!(serial = entry.serial, holder, "租约已续期");
        Ok(entry.to_info(now))
    }

    /// 硬件重启设备，成功后刷新最后访问时间
    pub async fn reboot(&self, serial: u32) -> Result<()> {
        let (handle, name) = {
            let devices = self.devices.read().await;
            devices
                .iter()
                .find(|entry| entry.serial == serial)
                .map(|entry| (Arc::clone(&entry.handle), entry.to_string()))
                .ok_or(AppError::DeviceNotFound(serial))?
        };

        // 重启期间不持有锁
        let result = match handle.reboot().await {
            Ok(()) => handle.probe().await,
            Err(e) => Err(e),
        };
        result.map_err(|e| match e {
            AppError::Hardware { message, .. } => AppError::hardware(name, message),
            other => other,
        })?;

        info!(serial, path = %handle.path(), "设备已重启");
        self.ping(serial).await
    }

    /// 获取所有设备的快照
    pub async fn list(&self) -> Vec<DeviceInfo> {
        let devices = self.devices.read().await;
        let now = Instant::now();
        devices.iter().map(|entry| entry.to_info(now)).collect()
    }

    /// 启动定时重新加载任务，失败时保留原设备表
    pub fn spawn_reload_task(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if let Err(e) = pool.reload().await {
                    warn!("定时重新加载设备失败: {}", e);
                }
            }
        })
    }
}

fn find_serial(devices: &mut [DeviceEntry], serial: u32) -> Result<&mut DeviceEntry> {
    devices
        .iter_mut()
        .find(|entry| entry.serial == serial)
        .ok_or(AppError::DeviceNotFound(serial))
}

fn find_holder<'a>(devices: &'a mut [DeviceEntry], holder: &str) -> Result<&'a mut DeviceEntry> {
    devices
        .iter_mut()
        .find(|entry| entry.is_held_by(holder))
        .ok_or_else(|| AppError::NotAssociated(holder.to_string()))
}
