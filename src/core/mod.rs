//! 核心配置
//!
//! 注册表的配置结构与加载逻辑。

pub mod config;

pub use config::{LoadingConfig, LogConfig, RegistryConfig, RegistryConfigBuilder};
