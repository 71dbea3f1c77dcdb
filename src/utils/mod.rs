//! 工具模块
//!
//! 包含错误类型、版本号、ID 生成与日志系统等通用工具。

pub mod error;
pub mod id;
pub mod logger;
pub mod version;

// 重导出常用类型
pub use error::{error_code, ModuleError, Result};
pub use id::{generate_id, generate_uuid};
pub use logger::{fields, LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};
pub use version::Version;
