//! 运行中模块与外部句柄
//!
//! - [`ModuleInfo`]：对外的引用计数句柄，克隆加一、释放减一；计数仅作存活提示，
//!   使用原子操作维护，不需要注册表锁
//! - [`Module`]：模块自身的能力凭证，钩子与伪模块持有它；持有 `&Module`
//!   即可访问该模块的私有参数并以它的身份获取依赖
//! - [`PseudoModule`]：宿主侧的无代码模块
//! - [`Symbol`]：解析出的带类型符号

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{trace, warn};

use crate::module::descriptor::ModuleDescriptor;
use crate::module::parameter::{Parameter, ParameterAccess, ParameterOp, ParameterValue};
use crate::module::registry::{ModuleRegistry, RegistryInner};
use crate::module::symbol::SymbolEntry;
use crate::utils::{ModuleError, Result, Version};

/// 模块类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleKind {
    /// 由描述符实例化的普通模块
    Regular,
    /// 宿主侧伪模块
    Pseudo,
}

/// 命名空间的包含方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceInclusion {
    /// 描述符声明，不可排除
    Static,
    /// 运行时包含
    Dynamic,
}

// ============================================================================
// 共享状态
// ============================================================================

/// 模块的共享状态，由注册表、句柄和能力凭证共同持有
pub(crate) struct ModuleShared {
    pub(crate) name: String,
    pub(crate) version: Version,
    pub(crate) kind: ModuleKind,
    pub(crate) descriptor: Option<Arc<ModuleDescriptor>>,
    pub(crate) parameters: HashMap<String, Parameter>,
    /// 只在持有注册表锁时修改
    pub(crate) namespaces: RwLock<BTreeMap<String, NamespaceInclusion>>,
    pub(crate) loaded: AtomicBool,
    pub(crate) handles: AtomicUsize,
    pub(crate) loaded_at: DateTime<Utc>,
}

impl ModuleShared {
    pub(crate) fn regular(descriptor: &Arc<ModuleDescriptor>) -> Self {
        let parameters = descriptor
            .parameters()
            .iter()
            .map(|decl| (decl.name.clone(), Parameter::from_decl(decl)))
            .collect();
        let namespaces = descriptor
            .namespaces()
            .iter()
            .map(|ns| (ns.clone(), NamespaceInclusion::Static))
            .collect();

        Self {
            name: descriptor.name().to_string(),
            version: descriptor.version(),
            kind: ModuleKind::Regular,
            descriptor: Some(Arc::clone(descriptor)),
            parameters,
            namespaces: RwLock::new(namespaces),
            loaded: AtomicBool::new(true),
            handles: AtomicUsize::new(0),
            loaded_at: Utc::now(),
        }
    }

    pub(crate) fn pseudo(name: String) -> Self {
        Self {
            name,
            version: Version::default(),
            kind: ModuleKind::Pseudo,
            descriptor: None,
            parameters: HashMap::new(),
            namespaces: RwLock::new(BTreeMap::new()),
            loaded: AtomicBool::new(true),
            handles: AtomicUsize::new(0),
            loaded_at: Utc::now(),
        }
    }

    pub(crate) fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub(crate) fn handle_count(&self) -> usize {
        self.handles.load(Ordering::Acquire)
    }

    pub(crate) fn includes(&self, namespace: &str) -> Option<NamespaceInclusion> {
        self.namespaces.read().get(namespace).copied()
    }

    /// 按调用方级别读取参数
    pub(crate) fn param_get(&self, name: &str, level: ParameterAccess) -> Result<ParameterValue> {
        let param = self.parameter(name)?;
        param.check_access(&self.name, level, ParameterOp::Read)?;
        Ok(param.get())
    }

    /// 按调用方级别写入参数
    pub(crate) fn param_set(
        &self,
        name: &str,
        level: ParameterAccess,
        value: ParameterValue,
    ) -> Result<()> {
        let param = self.parameter(name)?;
        param.check_access(&self.name, level, ParameterOp::Write)?;
        param.set(value)?;
        trace!(module = %self.name, parameter = %name, value = %value, "参数已更新");
        Ok(())
    }

    pub(crate) fn parameter(&self, name: &str) -> Result<&Parameter> {
        self.parameters
            .get(name)
            .ok_or_else(|| ModuleError::NotFound(format!("参数 '{}::{}'", self.name, name)))
    }
}

// ============================================================================
// ModuleInfo
// ============================================================================

/// 模块的外部句柄
///
/// 持有句柄的期间模块不能被 [`ModuleRegistry::unload`] 卸载（调用方自己的那一个除外）。
pub struct ModuleInfo {
    shared: Arc<ModuleShared>,
}

impl ModuleInfo {
    pub(crate) fn new(shared: Arc<ModuleShared>) -> Self {
        shared.handles.fetch_add(1, Ordering::AcqRel);
        Self { shared }
    }

    pub(crate) fn shared(&self) -> &Arc<ModuleShared> {
        &self.shared
    }

    /// 模块名
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// 模块版本
    pub fn version(&self) -> Version {
        self.shared.version
    }

    /// 描述
    pub fn description(&self) -> &str {
        self.shared
            .descriptor
            .as_ref()
            .map(|d| d.description())
            .unwrap_or_default()
    }

    /// 作者
    pub fn author(&self) -> &str {
        self.shared
            .descriptor
            .as_ref()
            .map(|d| d.author())
            .unwrap_or_default()
    }

    /// 许可证
    pub fn license(&self) -> &str {
        self.shared
            .descriptor
            .as_ref()
            .map(|d| d.license())
            .unwrap_or_default()
    }

    /// 模块类型
    pub fn kind(&self) -> ModuleKind {
        self.shared.kind
    }

    /// 是否为伪模块
    pub fn is_pseudo(&self) -> bool {
        self.shared.kind == ModuleKind::Pseudo
    }

    /// 模块是否仍在注册表中
    pub fn is_loaded(&self) -> bool {
        self.shared.is_loaded()
    }

    /// 加载时间
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.shared.loaded_at
    }

    /// 当前外部句柄数，包括自身
    pub fn handle_count(&self) -> usize {
        self.shared.handle_count()
    }

    /// 两个句柄是否指向同一个模块实例
    pub fn ptr_eq(&self, other: &ModuleInfo) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Clone for ModuleInfo {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.shared))
    }
}

impl Drop for ModuleInfo {
    fn drop(&mut self) {
        let previous = self.shared.handles.fetch_sub(1, Ordering::AcqRel);
        if previous == 1 && self.shared.is_loaded() {
            trace!(module = %self.shared.name, "最后一个外部句柄已释放，模块可被卸载");
        }
    }
}

impl PartialEq for ModuleInfo {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ModuleInfo {}

impl fmt::Debug for ModuleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleInfo")
            .field("name", &self.shared.name)
            .field("version", &self.shared.version)
            .field("kind", &self.shared.kind)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}

// ============================================================================
// Module
// ============================================================================

/// 模块的能力凭证
pub struct Module {
    pub(crate) shared: Arc<ModuleShared>,
    registry: Weak<RegistryInner>,
}

impl Module {
    pub(crate) fn new(shared: Arc<ModuleShared>, registry: Weak<RegistryInner>) -> Self {
        Self { shared, registry }
    }

    pub(crate) fn belongs_to(&self, registry: &Arc<RegistryInner>) -> bool {
        std::ptr::eq(self.registry.as_ptr(), Arc::as_ptr(registry))
    }

    /// 获取外部句柄
    pub fn info(&self) -> ModuleInfo {
        ModuleInfo::new(Arc::clone(&self.shared))
    }

    /// 模块名
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// 模块版本
    pub fn version(&self) -> Version {
        self.shared.version
    }

    /// 描述符，伪模块没有描述符
    pub fn descriptor(&self) -> Option<&Arc<ModuleDescriptor>> {
        self.shared.descriptor.as_ref()
    }

    /// 模块是否仍在注册表中
    pub fn is_loaded(&self) -> bool {
        self.shared.is_loaded()
    }

    /// 所属注册表
    pub fn registry(&self) -> Result<ModuleRegistry> {
        self.registry
            .upgrade()
            .map(ModuleRegistry::from_inner)
            .ok_or_else(|| ModuleError::InvalidArgument("模块所属的注册表已释放".to_string()))
    }

    /// 以本模块身份加载符号
    pub fn load_symbol<T>(&self, namespace: &str, name: &str, version: &Version) -> Result<Symbol<T>>
    where
        T: Any + Send + Sync,
    {
        self.registry()?.load_symbol(self, namespace, name, version)
    }

    /// 读取本模块参数
    pub fn param_get(&self, name: &str) -> Result<ParameterValue> {
        self.shared.param_get(name, ParameterAccess::Private)
    }

    /// 写入本模块参数
    pub fn param_set(&self, name: &str, value: impl Into<ParameterValue>) -> Result<()> {
        self.shared
            .param_set(name, ParameterAccess::Private, value.into())
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.shared.name)
            .field("version", &self.shared.version)
            .field("kind", &self.shared.kind)
            .finish()
    }
}

// ============================================================================
// PseudoModule
// ============================================================================

/// 伪模块
///
/// 宿主代码用它持有依赖和命名空间。未显式销毁的伪模块在 drop 时自动销毁。
pub struct PseudoModule {
    module: Module,
}

impl PseudoModule {
    pub(crate) fn new(module: Module) -> Self {
        Self { module }
    }

    /// 能力凭证
    pub fn module(&self) -> &Module {
        &self.module
    }
}

impl Deref for PseudoModule {
    type Target = Module;

    fn deref(&self) -> &Module {
        &self.module
    }
}

impl Drop for PseudoModule {
    fn drop(&mut self) {
        if !self.module.is_loaded() {
            return;
        }
        if let Ok(registry) = self.module.registry() {
            if let Err(e) = registry.pseudo_module_destroy(self) {
                warn!(module = %self.module.name(), error = %e, "伪模块自动销毁失败");
            }
        }
    }
}

impl fmt::Debug for PseudoModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PseudoModule").field(&self.module.name()).finish()
    }
}

// ============================================================================
// Symbol
// ============================================================================

/// 带类型的符号
///
/// 仅持有符号值本身；如需保证提供者在使用期间不被卸载，应先获取依赖。
pub struct Symbol<T> {
    entry: Arc<SymbolEntry>,
    value: Arc<T>,
}

impl<T: Any + Send + Sync> Symbol<T> {
    pub(crate) fn downcast(entry: Arc<SymbolEntry>) -> Result<Self> {
        let value = Arc::clone(&entry.value).downcast::<T>().map_err(|_| {
            ModuleError::TypeMismatch {
                expected: std::any::type_name::<T>().to_string(),
                found: format!("符号 '{}' 的实际类型", entry.key),
            }
        })?;
        Ok(Self { entry, value })
    }

    /// 导出版本
    pub fn version(&self) -> Version {
        self.entry.version
    }

    /// 导出模块名
    pub fn owner(&self) -> &str {
        &self.entry.owner
    }

    /// 命名空间
    pub fn namespace(&self) -> &str {
        &self.entry.key.namespace
    }

    /// 符号名
    pub fn name(&self) -> &str {
        &self.entry.key.name
    }

    /// 共享的符号值
    pub fn value(&self) -> Arc<T> {
        Arc::clone(&self.value)
    }
}

impl<T> Deref for Symbol<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> Clone for Symbol<T> {
    fn clone(&self) -> Self {
        Self {
            entry: Arc::clone(&self.entry),
            value: Arc::clone(&self.value),
        }
    }
}

impl<T> fmt::Debug for Symbol<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Symbol")
            .field("key", &self.entry.key)
            .field("version", &self.entry.version)
            .field("owner", &self.entry.owner)
            .finish()
    }
}
