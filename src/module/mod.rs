//! 模块运行时
//!
//! 包含模块运行时的核心组件：
//! - 模块描述符与导出注册表
//! - 符号表与依赖图
//! - 加载集与模块注册表
//! - 模块参数

pub mod dependency;
pub mod descriptor;
pub mod export;
pub mod info;
pub mod loading_set;
pub mod parameter;
pub mod registry;
pub mod symbol;

// 重导出常用类型
pub use dependency::{DependencyEdge, DependencyGraph, DependencyKind};
pub use descriptor::{
    DependencySpec, ExportConstructor, ExportSource, ModuleDescriptor, ModuleDescriptorBuilder,
    ModuleHooks, ModuleManifest, SymbolExport, SymbolImport, SymbolValue, GLOBAL_NAMESPACE,
};
pub use export::{seal_static_exports, ExportRegistry, StaticExport};
pub use info::{Module, ModuleInfo, ModuleKind, NamespaceInclusion, PseudoModule, Symbol};
pub use loading_set::{FilterRequest, LoadCallbacks, LoadingSet, SetState};
pub use parameter::{ParameterAccess, ParameterDecl, ParameterInfo, ParameterType, ParameterValue};
pub use registry::{DependencyRequest, ModuleRegistry, ModuleRegistryBuilder, RegistryGuard};
pub use symbol::{NamespaceState, SymbolEntry, SymbolKey, SymbolTable};
