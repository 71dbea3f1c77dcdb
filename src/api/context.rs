//! 运行时上下文接口
//!
//! [`ModuleContext`] 是注册表对宿主和模块代码暴露的对象安全接口，
//! `Arc<dyn ModuleContext>` 即上下文句柄。泛型的便捷方法放在
//! `impl dyn ModuleContext` 上，不影响对象安全。
//!
//! # 示例
//!
//! ```rust
//! use std::sync::Arc;
//! use chips_modules::api::ModuleContext;
//! use chips_modules::{ExportRegistry, ModuleRegistry};
//!
//! let registry = ModuleRegistry::builder()
//!     .exports(Arc::new(ExportRegistry::new()))
//!     .build()
//!     .unwrap();
//! let context: Arc<dyn ModuleContext> = Arc::new(registry);
//! assert!(context.namespace_exists(""));
//! ```

use std::any::Any;
use std::sync::Arc;

use crate::module::{
    DependencyKind, DependencyRequest, LoadingSet, Module, ModuleInfo, ModuleRegistry,
    NamespaceInclusion, ParameterInfo, ParameterValue, PseudoModule, RegistryGuard, Symbol,
    SymbolEntry,
};
use crate::utils::{Result, Version};

/// 模块运行时上下文
pub trait ModuleContext: Send + Sync {
    /// 创建新的加载集
    fn set_new(&self) -> LoadingSet;

    /// 按名称查找已加载模块
    fn find_by_name(&self, name: &str) -> Result<ModuleInfo>;

    /// 查找导出指定符号的模块
    fn find_by_symbol(&self, namespace: &str, name: &str, version: &Version) -> Result<ModuleInfo>;

    /// 命名空间是否存在
    fn namespace_exists(&self, namespace: &str) -> bool;

    /// 动态包含命名空间
    fn namespace_include(&self, module: &Module, namespace: &str) -> Result<()>;

    /// 排除动态包含的命名空间
    fn namespace_exclude(&self, module: &Module, namespace: &str) -> Result<()>;

    /// 模块对命名空间的包含方式
    fn namespace_included(&self, module: &Module, namespace: &str) -> Result<Option<NamespaceInclusion>>;

    /// 获取动态依赖
    fn acquire_dependency(
        &self,
        module: &Module,
        dependency: &ModuleInfo,
        request: &DependencyRequest,
    ) -> Result<()>;

    /// 释放一次动态依赖
    fn relinquish_dependency(
        &self,
        module: &Module,
        dependency: &ModuleInfo,
        request: &DependencyRequest,
    ) -> Result<()>;

    /// 依赖边类型
    fn has_dependency(&self, module: &Module, dependency: &ModuleInfo) -> Result<Option<DependencyKind>>;

    /// 加载未定型的符号
    fn load_symbol_raw(
        &self,
        module: &Module,
        namespace: &str,
        name: &str,
        version: &Version,
    ) -> Result<Arc<SymbolEntry>>;

    /// 卸载模块
    fn unload(&self, handle: &ModuleInfo) -> Result<()>;

    /// 查询参数
    fn param_query(&self, module: &str, parameter: &str) -> Result<ParameterInfo>;

    /// 以公开级别读取参数
    fn param_get_public(&self, module: &str, parameter: &str) -> Result<ParameterValue>;

    /// 以公开级别写入参数
    fn param_set_public(&self, module: &str, parameter: &str, value: ParameterValue) -> Result<()>;

    /// 以依赖级别读取参数
    fn param_get_dependency(&self, caller: &Module, module: &str, parameter: &str) -> Result<ParameterValue>;

    /// 以依赖级别写入参数
    fn param_set_dependency(
        &self,
        caller: &Module,
        module: &str,
        parameter: &str,
        value: ParameterValue,
    ) -> Result<()>;

    /// 读取调用方自己的参数
    fn param_get_private(&self, caller: &Module, parameter: &str) -> Result<ParameterValue>;

    /// 写入调用方自己的参数
    fn param_set_private(&self, caller: &Module, parameter: &str, value: ParameterValue) -> Result<()>;

    /// 获取注册表锁
    fn lock(&self) -> RegistryGuard<'_>;

    /// 创建伪模块
    fn pseudo_module_new(&self) -> Result<PseudoModule>;

    /// 销毁伪模块
    fn pseudo_module_destroy(&self, pseudo: &PseudoModule) -> Result<()>;
}

impl dyn ModuleContext {
    /// 加载带类型的符号
    pub fn load_symbol<T>(
        &self,
        module: &Module,
        namespace: &str,
        name: &str,
        version: &Version,
    ) -> Result<Symbol<T>>
    where
        T: Any + Send + Sync,
    {
        Symbol::downcast(self.load_symbol_raw(module, namespace, name, version)?)
    }
}

impl ModuleContext for ModuleRegistry {
    fn set_new(&self) -> LoadingSet {
        ModuleRegistry::set_new(self)
    }

    fn find_by_name(&self, name: &str) -> Result<ModuleInfo> {
        ModuleRegistry::find_by_name(self, name)
    }

    fn find_by_symbol(&self, namespace: &str, name: &str, version: &Version) -> Result<ModuleInfo> {
        ModuleRegistry::find_by_symbol(self, namespace, name, version)
    }

    fn namespace_exists(&self, namespace: &str) -> bool {
        ModuleRegistry::namespace_exists(self, namespace)
    }

    fn namespace_include(&self, module: &Module, namespace: &str) -> Result<()> {
        ModuleRegistry::namespace_include(self, module, namespace)
    }

    fn namespace_exclude(&self, module: &Module, namespace: &str) -> Result<()> {
        ModuleRegistry::namespace_exclude(self, module, namespace)
    }

    fn namespace_included(&self, module: &Module, namespace: &str) -> Result<Option<NamespaceInclusion>> {
        ModuleRegistry::namespace_included(self, module, namespace)
    }

    fn acquire_dependency(
        &self,
        module: &Module,
        dependency: &ModuleInfo,
        request: &DependencyRequest,
    ) -> Result<()> {
        ModuleRegistry::acquire_dependency(self, module, dependency, request)
    }

    fn relinquish_dependency(
        &self,
        module: &Module,
        dependency: &ModuleInfo,
        request: &DependencyRequest,
    ) -> Result<()> {
        ModuleRegistry::relinquish_dependency(self, module, dependency, request)
    }

    fn has_dependency(&self, module: &Module, dependency: &ModuleInfo) -> Result<Option<DependencyKind>> {
        ModuleRegistry::has_dependency(self, module, dependency)
    }

    fn load_symbol_raw(
        &self,
        module: &Module,
        namespace: &str,
        name: &str,
        version: &Version,
    ) -> Result<Arc<SymbolEntry>> {
        ModuleRegistry::load_symbol_raw(self, module, namespace, name, version)
    }

    fn unload(&self, handle: &ModuleInfo) -> Result<()> {
        ModuleRegistry::unload(self, handle)
    }

    fn param_query(&self, module: &str, parameter: &str) -> Result<ParameterInfo> {
        ModuleRegistry::param_query(self, module, parameter)
    }

    fn param_get_public(&self, module: &str, parameter: &str) -> Result<ParameterValue> {
        ModuleRegistry::param_get_public(self, module, parameter)
    }

    fn param_set_public(&self, module: &str, parameter: &str, value: ParameterValue) -> Result<()> {
        ModuleRegistry::param_set_public(self, module, parameter, value)
    }

    fn param_get_dependency(&self, caller: &Module, module: &str, parameter: &str) -> Result<ParameterValue> {
        ModuleRegistry::param_get_dependency(self, caller, module, parameter)
    }

    fn param_set_dependency(
        &self,
        caller: &Module,
        module: &str,
        parameter: &str,
        value: ParameterValue,
    ) -> Result<()> {
        ModuleRegistry::param_set_dependency(self, caller, module, parameter, value)
    }

    fn param_get_private(&self, caller: &Module, parameter: &str) -> Result<ParameterValue> {
        ModuleRegistry::param_get_private(self, caller, parameter)
    }

    fn param_set_private(&self, caller: &Module, parameter: &str, value: ParameterValue) -> Result<()> {
        ModuleRegistry::param_set_private(self, caller, parameter, value)
    }

    fn lock(&self) -> RegistryGuard<'_> {
        ModuleRegistry::lock(self)
    }

    fn pseudo_module_new(&self) -> Result<PseudoModule> {
        ModuleRegistry::pseudo_module_new(self)
    }

    fn pseudo_module_destroy(&self, pseudo: &PseudoModule) -> Result<()> {
        ModuleRegistry::pseudo_module_destroy(self, pseudo)
    }
}
