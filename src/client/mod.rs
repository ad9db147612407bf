//! yubictl 客户端 SDK
//!
//! 获取设备租约、触摸/重启设备，并在后台自动续期

pub mod client;
pub mod lease;
pub mod retry;

#[cfg(test)]
mod testing;

pub use client::{ClientError, SvcClient, TouchOptions, DEFAULT_PING_INTERVAL, MIN_PING_INTERVAL};
pub use lease::LeaseHandle;
pub use retry::{RetryConfig, RetryStrategy};
