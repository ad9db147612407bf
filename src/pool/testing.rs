//! 测试用的设备提供者和设备句柄

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::device::{DeviceHandle, DeviceProvider, DiscoveredDevice};
use crate::error::{AppError, Result};

/// 记录重启次数的设备句柄
pub struct FakeHandle {
    path: String,
    reboots: AtomicUsize,
    fail_reboot: AtomicBool,
}

impl FakeHandle {
    pub fn reboots(&self) -> usize {
        self.reboots.load(Ordering::SeqCst)
    }

    pub fn set_fail_reboot(&self, fail: bool) {
        self.fail_reboot.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DeviceHandle for FakeHandle {
    fn path(&self) -> String {
        self.path.clone()
    }

    async fn reboot(&self) -> Result<()> {
        if self.fail_reboot.load(Ordering::SeqCst) {
            return Err(AppError::hardware(self.path(), "usb reset failed"));
        }
        self.reboots.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn probe(&self) -> Result<()> {
        Ok(())
    }
}

/// 可随时替换设备列表的提供者
#[derive(Default)]
pub struct FakeProvider {
    devices: Mutex<Vec<(u32, String)>>,
    handles: Mutex<HashMap<u32, Arc<FakeHandle>>>,
    fail: AtomicBool,
}

impl FakeProvider {
    /// 以 (序列号, 总线位置) 列表创建
    pub fn new(devices: &[(u32, &str)]) -> Arc<Self> {
        let provider = Arc::new(Self::default());
        provider.set_devices(devices);
        provider
    }

    pub fn set_devices(&self, devices: &[(u32, &str)]) {
        let mut handles = self.handles.lock().unwrap();
        for (serial, location) in devices {
            handles.entry(*serial).or_insert_with(|| {
                Arc::new(FakeHandle {
                    path: format!("/dev/fake/{}", location),
                    reboots: AtomicUsize::new(0),
                    fail_reboot: AtomicBool::new(false),
                })
            });
        }

        *self.devices.lock().unwrap() = devices
            .iter()
            .map(|(serial, location)| (*serial, location.to_string()))
            .collect();
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn handle(&self, serial: u32) -> Arc<FakeHandle> {
        Arc::clone(&self.handles.lock().unwrap()[&serial])
    }
}

#[async_trait]
impl DeviceProvider for FakeProvider {
    async fn enumerate(&self) -> Result<Vec<DiscoveredDevice>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Enumeration("usb bus unavailable".to_string()));
        }

        let devices = self.devices.lock().unwrap().clone();
        Ok(devices
            .into_iter()
            .map(|(serial, location)| DiscoveredDevice {
                serial,
                version: "5.4.3".to_string(),
                location,
                handle: self.handle(serial),
            })
            .collect())
    }
}
