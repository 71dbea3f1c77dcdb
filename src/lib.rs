//! # Chips Modules - 薯片模块运行时
//!
//! 薯片模块运行时负责在宿主进程内组合独立构建的模块，提供以下核心功能：
//!
//! - **导出注册表**: 枚举静态声明与动态注册的模块描述符
//! - **加载集**: 以事务方式批量加载模块，失败时整体回滚
//! - **依赖图**: 带引用计数的静态/动态依赖边，环检测与拓扑排序
//! - **符号表**: 按命名空间隔离、带版本检查的符号发布与解析
//! - **模块参数**: 公开/依赖/私有三级访问控制
//! - **日志系统**: 结构化日志记录
//!
//! ## 快速开始
//!
//! ```rust
//! use std::sync::Arc;
//! use chips_modules::{
//!     ExportRegistry, LoadCallbacks, ModuleDescriptor, ModuleRegistry, SymbolExport, Version,
//! };
//!
//! # fn main() -> chips_modules::Result<()> {
//! let registry = ModuleRegistry::builder()
//!     .exports(Arc::new(ExportRegistry::new()))
//!     .build()?;
//!
//! let math = ModuleDescriptor::builder("math", Version::new(1, 2, 0))
//!     .export(SymbolExport::value("math", "answer", Version::new(1, 0, 0), 42u32))
//!     .build()?;
//!
//! let set = registry.set_new();
//! set.append_module(math, LoadCallbacks::new())?;
//! set.finish()?;
//!
//! let host = registry.pseudo_module_new()?;
//! registry.namespace_include(&host, "math")?;
//! let answer = host.load_symbol::<u32>("math", "answer", &Version::new(1, 0, 0))?;
//! assert_eq!(*answer, 42);
//! # Ok(())
//! # }
//! ```
//!
//! ## 模块结构
//!
//! - `module` - 描述符、注册表、加载集等运行时类型
//! - `utils` - 错误类型、版本号、ID 与日志
//! - `core` - 配置
//! - `api` - 上下文接口

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod api;
pub mod core;
pub mod module;
pub mod utils;

// 重导出常用类型，方便使用
pub use module::{
    seal_static_exports, DependencyKind, DependencyRequest, DependencySpec, ExportRegistry,
    FilterRequest, LoadCallbacks, LoadingSet, Module, ModuleDescriptor, ModuleDescriptorBuilder,
    ModuleHooks, ModuleInfo, ModuleManifest, ModuleRegistry, ModuleRegistryBuilder,
    NamespaceInclusion, ParameterAccess, ParameterDecl, ParameterInfo, ParameterType,
    ParameterValue, PseudoModule, RegistryGuard, SetState, Symbol, SymbolExport, SymbolImport,
    GLOBAL_NAMESPACE,
};

pub use api::ModuleContext;
pub use utils::{error_code, generate_id, generate_uuid, ModuleError, Result, Version};
pub use utils::logger::{fields, LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};

pub use core::config::{LoadingConfig, LogConfig, RegistryConfig, RegistryConfigBuilder};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
