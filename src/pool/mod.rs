//! 设备池模块
//!
//! 提供设备租约的获取、续期、释放和回收

mod device_entry;
mod device_pool;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use device_entry::{DeviceEntry, Lease};
pub use device_pool::DevicePool;
pub use types::{DeviceInfo, DevicePoolConfig, DEFAULT_LEASE_TTL};
