//! yubictl：共享 YubiKey 设备池服务及其客户端 SDK

pub mod api;
pub mod client;
pub mod config;
pub mod context;
pub mod device;
pub mod discovery;
pub mod error;
pub mod logger;
pub mod pool;
pub mod touch;

pub use error::{AppError, Result};
