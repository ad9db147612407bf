pub mod app_config;

pub use app_config::{
    AppConfig, ConfigError, DiscoveryConfig, LogConfig, ManualChannel, ProviderConfig,
    ServerConfig, TouchConfig,
};
