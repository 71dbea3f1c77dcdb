//! 模块运行时错误类型定义
//!
//! 注册表、加载集、符号表与版本解析共用同一个错误枚举 [`ModuleError`]，
//! 每个变体都映射到一个稳定的错误码（见 [`error_code`]）。

use thiserror::Error;

/// 模块运行时错误类型
#[derive(Error, Debug)]
pub enum ModuleError {
    // ==================== 参数与句柄错误 ====================

    /// 参数或句柄无效
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 目标未找到（模块、符号或参数）
    #[error("未找到: {0}")]
    NotFound(String),

    // ==================== 加载集错误 ====================

    /// 模块名重复
    #[error("模块名重复: '{0}'")]
    DuplicateModule(String),

    /// 依赖无法解析
    #[error("无法解析依赖: 模块 '{module}' 需要 '{dependency}'")]
    UnresolvedDependency {
        module: String,
        dependency: String,
    },

    /// 版本不兼容
    #[error("版本不兼容: '{module}' 需要版本 {required}, 但找到版本 {found}")]
    VersionMismatch {
        module: String,
        required: String,
        found: String,
    },

    /// 循环依赖
    #[error("检测到循环依赖: {0}")]
    DependencyCycle(String),

    /// 符号冲突：同一命名空间下的同名符号已有导出者
    #[error("符号冲突: '{namespace}::{name}' 已由模块 '{owner}' 导出")]
    SymbolConflict {
        namespace: String,
        name: String,
        owner: String,
    },

    /// 模块构造失败
    #[error("模块构造失败: '{module}' - {source}")]
    ConstructorFailed {
        module: String,
        #[source]
        source: anyhow::Error,
    },

    /// 加载集状态不允许当前操作
    #[error("加载集 '{set_id}' 处于 {state} 状态，无法执行该操作")]
    InvalidSetState {
        set_id: String,
        state: String,
    },

    // ==================== 命名空间错误 ====================

    /// 命名空间未被包含
    #[error("模块 '{module}' 未包含命名空间 '{namespace}'")]
    NamespaceNotIncluded {
        module: String,
        namespace: String,
    },

    /// 命名空间不存在
    #[error("命名空间不存在: '{0}'")]
    NamespaceNotFound(String),

    /// 命名空间已被包含
    #[error("模块 '{module}' 已包含命名空间 '{namespace}'")]
    NamespaceAlreadyIncluded {
        module: String,
        namespace: String,
    },

    /// 静态命名空间不可排除
    #[error("命名空间 '{namespace}' 由模块 '{module}' 静态声明，无法排除")]
    StaticNamespace {
        module: String,
        namespace: String,
    },

    /// 仍有依赖边依赖该命名空间
    #[error("模块 '{module}' 仍有依赖边依赖命名空间 '{namespace}'")]
    NamespaceDependencyExists {
        module: String,
        namespace: String,
    },

    // ==================== 依赖边错误 ====================

    /// 模块仍被引用，无法卸载或销毁
    #[error("模块 '{module}' 仍被引用: {reason}")]
    StillReferenced {
        module: String,
        reason: String,
    },

    /// 依赖边不存在
    #[error("模块 '{module}' 不依赖 '{dependency}'")]
    NoSuchDependency {
        module: String,
        dependency: String,
    },

    /// 静态依赖边不可释放
    #[error("模块 '{module}' 对 '{dependency}' 的依赖是静态声明的，无法释放")]
    StaticDependency {
        module: String,
        dependency: String,
    },

    // ==================== 参数错误 ====================

    /// 访问被拒绝
    #[error("访问被拒绝: 参数 '{module}::{parameter}' 不允许 {operation}")]
    AccessDenied {
        module: String,
        parameter: String,
        operation: String,
    },

    /// 类型不匹配
    #[error("类型不匹配: 期望 {expected}, 实际 {found}")]
    TypeMismatch {
        expected: String,
        found: String,
    },

    // ==================== 版本错误 ====================

    /// 版本字符串格式无效
    #[error("无效的版本字符串: {0}")]
    InvalidVersion(String),

    /// 数值溢出
    #[error("数值溢出: {0}")]
    Overflow(String),

    // ==================== 配置错误 ====================

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    /// 配置值无效
    #[error("配置值无效: '{key}' - {reason}")]
    InvalidConfigValue {
        key: String,
        reason: String,
    },

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // ==================== 通用错误 ====================

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),

    /// 初始化失败
    #[error("初始化失败: {0}")]
    InitFailed(String),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// 模块运行时结果类型别名
pub type Result<T> = std::result::Result<T, ModuleError>;

/// 错误码常量
pub mod error_code {
    // 模块错误 (MODULE-xxx)
    pub const MODULE_NOT_FOUND: &str = "MODULE-001";
    pub const MODULE_DUPLICATE: &str = "MODULE-002";
    pub const MODULE_CONSTRUCT_FAILED: &str = "MODULE-003";
    pub const MODULE_STILL_REFERENCED: &str = "MODULE-004";
    pub const MODULE_INVALID_ARGUMENT: &str = "MODULE-005";
    pub const MODULE_SET_STATE: &str = "MODULE-006";
    pub const MODULE_SYMBOL_CONFLICT: &str = "MODULE-007";

    // 依赖错误 (DEP-xxx)
    pub const DEP_UNRESOLVED: &str = "DEP-001";
    pub const DEP_CYCLE: &str = "DEP-002";
    pub const DEP_NOT_FOUND: &str = "DEP-003";
    pub const DEP_STATIC: &str = "DEP-004";

    // 命名空间错误 (NS-xxx)
    pub const NS_NOT_INCLUDED: &str = "NS-001";
    pub const NS_NOT_FOUND: &str = "NS-002";
    pub const NS_ALREADY_INCLUDED: &str = "NS-003";
    pub const NS_STATIC: &str = "NS-004";
    pub const NS_IN_USE: &str = "NS-005";

    // 参数错误 (PARAM-xxx)
    pub const PARAM_ACCESS_DENIED: &str = "PARAM-001";
    pub const PARAM_TYPE_MISMATCH: &str = "PARAM-002";

    // 版本错误 (VER-xxx)
    pub const VER_MISMATCH: &str = "VER-001";
    pub const VER_INVALID: &str = "VER-002";
    pub const VER_OVERFLOW: &str = "VER-003";

    // 配置错误 (CONFIG-xxx)
    pub const CONFIG_LOAD_FAILED: &str = "CONFIG-001";
    pub const CONFIG_INVALID_VALUE: &str = "CONFIG-002";

    // 系统错误 (SYS-xxx)
    pub const SYS_INTERNAL: &str = "SYS-001";
    pub const SYS_INIT_FAILED: &str = "SYS-002";
}

impl ModuleError {
    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            ModuleError::InvalidArgument(_) => error_code::MODULE_INVALID_ARGUMENT,
            ModuleError::NotFound(_) => error_code::MODULE_NOT_FOUND,
            ModuleError::DuplicateModule(_) => error_code::MODULE_DUPLICATE,
            ModuleError::UnresolvedDependency { .. } => error_code::DEP_UNRESOLVED,
            ModuleError::VersionMismatch { .. } => error_code::VER_MISMATCH,
            ModuleError::DependencyCycle(_) => error_code::DEP_CYCLE,
            ModuleError::SymbolConflict { .. } => error_code::MODULE_SYMBOL_CONFLICT,
            ModuleError::ConstructorFailed { .. } => error_code::MODULE_CONSTRUCT_FAILED,
            ModuleError::InvalidSetState { .. } => error_code::MODULE_SET_STATE,
            ModuleError::NamespaceNotIncluded { .. } => error_code::NS_NOT_INCLUDED,
            ModuleError::NamespaceNotFound(_) => error_code::NS_NOT_FOUND,
            ModuleError::NamespaceAlreadyIncluded { .. } => error_code::NS_ALREADY_INCLUDED,
            ModuleError::StaticNamespace { .. } => error_code::NS_STATIC,
            ModuleError::NamespaceDependencyExists { .. } => error_code::NS_IN_USE,
            ModuleError::StillReferenced { .. } => error_code::MODULE_STILL_REFERENCED,
            ModuleError::NoSuchDependency { .. } => error_code::DEP_NOT_FOUND,
            ModuleError::StaticDependency { .. } => error_code::DEP_STATIC,
            ModuleError::AccessDenied { .. } => error_code::PARAM_ACCESS_DENIED,
            ModuleError::TypeMismatch { .. } => error_code::PARAM_TYPE_MISMATCH,
            ModuleError::InvalidVersion(_) => error_code::VER_INVALID,
            ModuleError::Overflow(_) => error_code::VER_OVERFLOW,
            ModuleError::ConfigLoadFailed(_)
            | ModuleError::Io(_)
            | ModuleError::Json(_)
            | ModuleError::Yaml(_) => error_code::CONFIG_LOAD_FAILED,
            ModuleError::InvalidConfigValue { .. } => error_code::CONFIG_INVALID_VALUE,
            ModuleError::InitFailed(_) => error_code::SYS_INIT_FAILED,
            ModuleError::Internal(_) | ModuleError::Other(_) => error_code::SYS_INTERNAL,
        }
    }

    /// 是否为未找到错误
    pub fn is_not_found(&self) -> bool {
        matches!(self, ModuleError::NotFound(_))
    }

    /// 是否为访问被拒绝错误
    pub fn is_access_denied(&self) -> bool {
        matches!(self, ModuleError::AccessDenied { .. })
    }

    /// 是否为仍被引用错误
    pub fn is_still_referenced(&self) -> bool {
        matches!(self, ModuleError::StillReferenced { .. })
    }
}
