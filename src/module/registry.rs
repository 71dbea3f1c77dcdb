//! 模块注册表
//!
//! 注册表是运行时的中心：保存已加载模块、依赖图与符号表，并提供命名空间、
//! 依赖、参数、卸载和伪模块等操作。
//!
//! ## 并发模型
//!
//! 所有结构性修改都在一把可重入锁下进行，同一线程在钩子或回调里再次调用注册表
//! 不会死锁。锁内状态放在 `RefCell` 中，借用只在单个操作内部短暂持有，
//! 调用钩子与回调之前一定先释放借用。
//!
//! 符号查找、参数读写与句柄计数不需要这把锁。

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use tracing::{debug, info, instrument, trace, warn};

use crate::core::{LoadingConfig, RegistryConfig};
use crate::module::dependency::{DependencyGraph, DependencyKind};
use crate::module::descriptor::{ExportSource, ModuleDescriptor, GLOBAL_NAMESPACE};
use crate::module::export::ExportRegistry;
use crate::module::info::{
    Module, ModuleInfo, ModuleKind, ModuleShared, NamespaceInclusion, PseudoModule, Symbol,
};
use crate::module::loading_set::LoadingSet;
use crate::module::parameter::{ParameterAccess, ParameterInfo, ParameterValue};
use crate::module::symbol::{SymbolEntry, SymbolKey, SymbolTable};
use crate::utils::id::pseudo_module_name;
use crate::utils::{ModuleError, Result, Version};

// ============================================================================
// 内部状态
// ============================================================================

/// 锁内的结构性状态
#[derive(Default)]
pub(crate) struct RegistryState {
    pub(crate) modules: HashMap<String, Arc<Module>>,
    pub(crate) graph: DependencyGraph,
}

/// 注册表共享部分
pub(crate) struct RegistryInner {
    state: ReentrantMutex<RefCell<RegistryState>>,
    pub(crate) symbols: SymbolTable,
    pub(crate) exports: Arc<ExportRegistry>,
    pub(crate) config: LoadingConfig,
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().get_mut();
        let order = state
            .graph
            .unload_order()
            .unwrap_or_else(|_| state.graph.modules().iter().rev().cloned().collect());

        for name in order {
            if let Some(module) = state.modules.remove(&name) {
                if let Some(hooks) = module.descriptor().and_then(|d| d.hooks()) {
                    hooks.destroy(&module);
                }
                module.shared.loaded.store(false, Ordering::Release);
            }
        }
        debug!("模块注册表已释放");
    }
}

/// 持有注册表锁的守卫
///
/// 守卫存活期间其他线程的结构性操作会阻塞，本线程仍可正常调用注册表。
#[must_use = "守卫释放时即解锁"]
pub struct RegistryGuard<'a> {
    _guard: ReentrantMutexGuard<'a, RefCell<RegistryState>>,
}

/// 依赖获取请求
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyRequest {
    /// 经由的命名空间，空字符串表示全局命名空间
    pub namespace: String,
    /// 要求的最低兼容版本
    pub version: Option<Version>,
}

impl DependencyRequest {
    /// 经由全局命名空间、不限版本的请求
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置经由的命名空间
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// 设置版本要求
    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }
}

// ============================================================================
// ModuleRegistry
// ============================================================================

/// 模块注册表
///
/// 克隆得到的是同一个注册表的另一个引用。
#[derive(Clone)]
pub struct ModuleRegistry {
    inner: Arc<RegistryInner>,
}

impl ModuleRegistry {
    /// 使用进程级导出注册表和默认配置创建
    pub fn new() -> Self {
        Self::from_parts(ExportRegistry::global(), LoadingConfig::default())
    }

    /// 使用进程级导出注册表和给定配置创建
    ///
    /// # Errors
    ///
    /// 配置校验失败时返回 [`ModuleError::InvalidConfigValue`]
    pub fn with_config(config: RegistryConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    /// 创建构建器
    pub fn builder() -> ModuleRegistryBuilder {
        ModuleRegistryBuilder::default()
    }

    fn from_parts(exports: Arc<ExportRegistry>, config: LoadingConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                state: ReentrantMutex::new(RefCell::new(RegistryState::default())),
                symbols: SymbolTable::new(),
                exports,
                config,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<RegistryInner>) -> Self {
        Self { inner }
    }

    /// 在锁内借用状态执行 `f`，`f` 不得调用钩子或回调
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut RegistryState) -> R) -> R {
        let guard = self.inner.state.lock();
        let mut state = guard.borrow_mut();
        f(&mut state)
    }

    /// 导出注册表
    pub fn exports(&self) -> &Arc<ExportRegistry> {
        &self.inner.exports
    }

    /// 加载策略
    pub fn config(&self) -> &LoadingConfig {
        &self.inner.config
    }

    /// 符号表
    pub fn symbols(&self) -> &SymbolTable {
        &self.inner.symbols
    }

    /// 获取注册表锁
    ///
    /// 用于把多个操作组合成对其他线程不可分割的一步。
    pub fn lock(&self) -> RegistryGuard<'_> {
        RegistryGuard {
            _guard: self.inner.state.lock(),
        }
    }

    /// 创建新的加载集
    pub fn set_new(&self) -> LoadingSet {
        LoadingSet::new(self.clone())
    }

    // ==================== 查询 ====================

    /// 按名称查找已加载模块
    pub fn find_by_name(&self, name: &str) -> Result<ModuleInfo> {
        self.with_state(|state| {
            state
                .modules
                .get(name)
                .map(|m| ModuleInfo::new(Arc::clone(&m.shared)))
                .ok_or_else(|| ModuleError::NotFound(format!("模块 '{}'", name)))
        })
    }

    /// 查找导出指定符号的模块
    pub fn find_by_symbol(&self, namespace: &str, name: &str, version: &Version) -> Result<ModuleInfo> {
        let entry = self.inner.symbols.resolve(namespace, name, version)?;
        self.find_by_name(&entry.owner)
    }

    /// 模块是否已加载
    pub fn contains(&self, name: &str) -> bool {
        self.with_state(|state| state.modules.contains_key(name))
    }

    /// 按加载顺序列出所有模块（含伪模块）
    pub fn loaded_modules(&self) -> Vec<ModuleInfo> {
        self.with_state(|state| {
            state
                .graph
                .modules()
                .iter()
                .filter_map(|name| state.modules.get(name))
                .map(|m| ModuleInfo::new(Arc::clone(&m.shared)))
                .collect()
        })
    }

    /// 模块的直接依赖
    pub fn dependencies_of(&self, name: &str) -> Result<Vec<String>> {
        self.with_state(|state| {
            if !state.modules.contains_key(name) {
                return Err(ModuleError::NotFound(format!("模块 '{}'", name)));
            }
            Ok(state.graph.get_dependencies(name))
        })
    }

    /// 直接依赖该模块的模块
    pub fn dependents_of(&self, name: &str) -> Result<Vec<String>> {
        self.with_state(|state| {
            if !state.modules.contains_key(name) {
                return Err(ModuleError::NotFound(format!("模块 '{}'", name)));
            }
            Ok(state.graph.get_dependents(name))
        })
    }

    /// 已加载模块数
    pub fn len(&self) -> usize {
        self.with_state(|state| state.modules.len())
    }

    /// 是否没有已加载模块
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn loaded_module(&self, name: &str) -> Option<Arc<Module>> {
        self.with_state(|state| state.modules.get(name).cloned())
    }

    // ==================== 身份校验 ====================

    /// 调用方必须是本注册表中仍然存活的那个模块实例
    fn live_caller(&self, state: &RegistryState, module: &Module) -> Result<Arc<Module>> {
        if !module.belongs_to(&self.inner) {
            return Err(ModuleError::InvalidArgument(format!(
                "模块 '{}' 不属于此注册表",
                module.name()
            )));
        }
        match state.modules.get(module.name()) {
            Some(m) if Arc::ptr_eq(&m.shared, &module.shared) && m.shared.is_loaded() => {
                Ok(Arc::clone(m))
            }
            _ => Err(ModuleError::InvalidArgument(format!(
                "模块 '{}' 已卸载",
                module.name()
            ))),
        }
    }

    /// 句柄必须指向本注册表中的已加载模块
    fn live_target(&self, state: &RegistryState, handle: &ModuleInfo) -> Result<Arc<Module>> {
        if !handle.is_loaded() {
            return Err(ModuleError::InvalidArgument(format!(
                "模块 '{}' 已卸载",
                handle.name()
            )));
        }
        match state.modules.get(handle.name()) {
            Some(m) if Arc::ptr_eq(&m.shared, handle.shared()) => Ok(Arc::clone(m)),
            _ => Err(ModuleError::NotFound(format!("模块 '{}'", handle.name()))),
        }
    }

    // ==================== 实例化与拆除（加载集使用） ====================

    /// 实例化一个模块：登记、建立静态边、构造、发布导出
    ///
    /// 给出 `owner` 时新模块对所有者建立一条静态边。失败时该模块留下的所有痕迹
    /// 都已撤销。调用方须持有注册表锁。
    pub(crate) fn instantiate(
        &self,
        descriptor: &Arc<ModuleDescriptor>,
        owner: Option<&ModuleInfo>,
    ) -> Result<Arc<Module>> {
        let name = descriptor.name();
        let module = self.with_state(|state| self.attach(state, descriptor, owner))?;

        if let Some(hooks) = descriptor.hooks() {
            if let Err(source) = hooks.construct(&module) {
                self.detach(&module);
                return Err(ModuleError::ConstructorFailed {
                    module: name.to_string(),
                    source,
                });
            }
        }

        let mut exports = Vec::with_capacity(descriptor.exports().len());
        for export in descriptor.exports() {
            let value = match export.source {
                ExportSource::Static(ref value) => Arc::clone(value),
                ExportSource::Dynamic(ref constructor) => match constructor(&*module) {
                    Ok(value) => value,
                    Err(source) => {
                        self.run_destroy(&module);
                        self.detach(&module);
                        return Err(ModuleError::ConstructorFailed {
                            module: name.to_string(),
                            source: source.context(format!(
                                "导出 '{}::{}' 构造失败",
                                export.namespace, export.name
                            )),
                        });
                    }
                },
            };
            exports.push((
                SymbolKey::new(export.namespace.as_str(), export.name.as_str()),
                export.version,
                value,
            ));
        }

        if let Err(e) = self.inner.symbols.insert_exports(name, exports) {
            self.run_destroy(&module);
            self.detach(&module);
            return Err(e);
        }

        debug!(module = %name, version = %descriptor.version(), "模块已实例化");
        Ok(module)
    }

    /// 校验并登记模块，任一检查失败时不修改任何状态
    fn attach(
        &self,
        state: &mut RegistryState,
        descriptor: &Arc<ModuleDescriptor>,
        owner: Option<&ModuleInfo>,
    ) -> Result<Arc<Module>> {
        let name = descriptor.name();
        if state.modules.contains_key(name) {
            return Err(ModuleError::DuplicateModule(name.to_string()));
        }

        for ns in descriptor.namespaces() {
            if !self.inner.symbols.namespace_exists(ns) {
                return Err(ModuleError::NamespaceNotFound(ns.clone()));
            }
        }

        let mut links: Vec<(String, Option<String>)> = Vec::new();
        for dep in descriptor.dependencies() {
            let target = state
                .modules
                .get(&dep.name)
                .filter(|m| m.shared.kind == ModuleKind::Regular)
                .ok_or_else(|| ModuleError::UnresolvedDependency {
                    module: name.to_string(),
                    dependency: dep.name.clone(),
                })?;
            if !target.version().is_compatible_with(&dep.version) {
                return Err(ModuleError::VersionMismatch {
                    module: dep.name.clone(),
                    required: dep.version.to_string(),
                    found: target.version().to_string(),
                });
            }
            links.push((dep.name.clone(), None));
        }

        if let Some(owner) = owner {
            let owner = self.live_target(state, owner)?;
            links.push((owner.name().to_string(), None));
        }

        for import in descriptor.imports() {
            let entry = self
                .inner
                .symbols
                .resolve(&import.namespace, &import.name, &import.version)
                .map_err(|e| match e {
                    ModuleError::NotFound(_) => ModuleError::UnresolvedDependency {
                        module: name.to_string(),
                        dependency: format!("{}::{}", import.namespace, import.name),
                    },
                    other => other,
                })?;
            let namespace = Some(import.namespace.clone()).filter(|ns| ns != GLOBAL_NAMESPACE);
            links.push((entry.owner.clone(), namespace));
        }

        let mut acquired: Vec<&String> = Vec::new();
        for ns in descriptor.namespaces() {
            if let Err(e) = self.inner.symbols.acquire_namespace(ns) {
                for ns in acquired {
                    self.inner.symbols.release_namespace(ns);
                }
                return Err(e);
            }
            acquired.push(ns);
        }

        let shared = Arc::new(ModuleShared::regular(descriptor));
        let module = Arc::new(Module::new(shared, Arc::downgrade(&self.inner)));

        state.graph.add_module(name);
        for (dependency, namespace) in &links {
            state
                .graph
                .acquire_edge(name, dependency, DependencyKind::Static, namespace.as_deref());
        }
        state.modules.insert(name.to_string(), Arc::clone(&module));
        Ok(module)
    }

    /// 撤销导出、调用析构钩子并移除模块
    pub(crate) fn teardown(&self, module: &Arc<Module>, run_destructor: bool) {
        self.inner.symbols.remove_owner(module.name());
        if run_destructor {
            self.run_destroy(module);
        }
        self.detach(module);
    }

    fn run_destroy(&self, module: &Module) {
        if let Some(hooks) = module.descriptor().and_then(|d| d.hooks()) {
            hooks.destroy(module);
        }
    }

    /// 释放命名空间和出边，从注册表移除
    fn detach(&self, module: &Module) {
        self.with_state(|state| {
            let namespaces = std::mem::take(&mut *module.shared.namespaces.write());
            for ns in namespaces.keys() {
                self.inner.symbols.release_namespace(ns);
            }
            state.graph.remove_module(module.name());
            state.modules.remove(module.name());
        });
        module.shared.loaded.store(false, Ordering::Release);
        trace!(module = %module.name(), "模块已从注册表移除");
    }

    // ==================== 卸载 ====================

    /// 卸载模块
    ///
    /// 调用方自己的句柄不计入引用；仍有其他句柄或依赖者时返回
    /// [`ModuleError::StillReferenced`]。
    #[instrument(skip(self, handle), fields(module = %handle.name()))]
    pub fn unload(&self, handle: &ModuleInfo) -> Result<()> {
        let _guard = self.inner.state.lock();

        let module = self.with_state(|state| -> Result<Arc<Module>> {
            let module = self.live_target(state, handle)?;
            if module.shared.kind == ModuleKind::Pseudo {
                return Err(ModuleError::InvalidArgument(format!(
                    "'{}' 是伪模块，须通过 pseudo_module_destroy 销毁",
                    module.name()
                )));
            }

            let others = module.shared.handle_count().saturating_sub(1);
            if others > 0 {
                return Err(ModuleError::StillReferenced {
                    module: module.name().to_string(),
                    reason: format!("仍有 {} 个其他外部句柄", others),
                });
            }

            let dependents = state.graph.get_dependents(module.name());
            if !dependents.is_empty() {
                return Err(ModuleError::StillReferenced {
                    module: module.name().to_string(),
                    reason: format!("被以下模块依赖: {}", dependents.join(", ")),
                });
            }
            Ok(module)
        })?;

        self.teardown(&module, true);
        info!("模块已卸载");

        if self.inner.config.unload_unused_on_release {
            self.unload_unused();
        }
        Ok(())
    }

    /// 卸载所有无外部句柄且无依赖者的普通模块，返回被卸载的模块名
    ///
    /// 依赖者先于被依赖者卸载，一轮卸载后新变为无人引用的模块也会被卸载。
    pub fn unload_unused(&self) -> Vec<String> {
        let _guard = self.inner.state.lock();
        let mut unloaded = Vec::new();

        loop {
            let candidate = self.with_state(|state| {
                state.graph.modules().iter().rev().find_map(|name| {
                    let module = state.modules.get(name)?;
                    let unused = module.shared.kind == ModuleKind::Regular
                        && module.shared.handle_count() == 0
                        && !state.graph.has_dependents(name);
                    unused.then(|| Arc::clone(module))
                })
            });

            match candidate {
                Some(module) => {
                    self.teardown(&module, true);
                    unloaded.push(module.name().to_string());
                }
                None => break,
            }
        }

        if !unloaded.is_empty() {
            info!(count = unloaded.len(), modules = ?unloaded, "已卸载无人引用的模块");
        }
        unloaded
    }

    // ==================== 命名空间 ====================

    /// 命名空间是否存在
    pub fn namespace_exists(&self, namespace: &str) -> bool {
        self.inner.symbols.namespace_exists(namespace)
    }

    /// 动态包含命名空间
    pub fn namespace_include(&self, module: &Module, namespace: &str) -> Result<()> {
        self.with_state(|state| {
            self.live_caller(state, module)?;

            let already = namespace == GLOBAL_NAMESPACE || module.shared.includes(namespace).is_some();
            if already {
                return Err(ModuleError::NamespaceAlreadyIncluded {
                    module: module.name().to_string(),
                    namespace: namespace.to_string(),
                });
            }

            self.inner.symbols.acquire_namespace(namespace)?;
            module
                .shared
                .namespaces
                .write()
                .insert(namespace.to_string(), NamespaceInclusion::Dynamic);
            Ok(())
        })?;

        debug!(module = %module.name(), namespace = %namespace, "已包含命名空间");
        Ok(())
    }

    /// 排除动态包含的命名空间
    pub fn namespace_exclude(&self, module: &Module, namespace: &str) -> Result<()> {
        self.with_state(|state| {
            self.live_caller(state, module)?;

            let inclusion = if namespace == GLOBAL_NAMESPACE {
                Some(NamespaceInclusion::Static)
            } else {
                module.shared.includes(namespace)
            };
            match inclusion {
                None => {
                    return Err(ModuleError::NamespaceNotIncluded {
                        module: module.name().to_string(),
                        namespace: namespace.to_string(),
                    })
                }
                Some(NamespaceInclusion::Static) => {
                    return Err(ModuleError::StaticNamespace {
                        module: module.name().to_string(),
                        namespace: namespace.to_string(),
                    })
                }
                Some(NamespaceInclusion::Dynamic) => {}
            }

            if state.graph.namespace_in_use(module.name(), namespace) {
                return Err(ModuleError::NamespaceDependencyExists {
                    module: module.name().to_string(),
                    namespace: namespace.to_string(),
                });
            }

            module.shared.namespaces.write().remove(namespace);
            self.inner.symbols.release_namespace(namespace);
            Ok(())
        })?;

        debug!(module = %module.name(), namespace = %namespace, "已排除命名空间");
        Ok(())
    }

    /// 模块对命名空间的包含方式，未包含时为 `None`
    pub fn namespace_included(&self, module: &Module, namespace: &str) -> Result<Option<NamespaceInclusion>> {
        self.with_state(|state| self.live_caller(state, module))?;
        if namespace == GLOBAL_NAMESPACE {
            return Ok(Some(NamespaceInclusion::Static));
        }
        Ok(module.shared.includes(namespace))
    }

    // ==================== 依赖 ====================

    /// 获取一条动态依赖
    ///
    /// 同一对模块可多次获取，每次获取都需要一次对应的释放。
    #[instrument(skip_all, fields(module = %module.name(), dependency = %dependency.name()))]
    pub fn acquire_dependency(
        &self,
        module: &Module,
        dependency: &ModuleInfo,
        request: &DependencyRequest,
    ) -> Result<()> {
        self.with_state(|state| {
            self.live_caller(state, module)?;
            let target = self.live_target(state, dependency)?;

            if target.name() == module.name() {
                return Err(ModuleError::DependencyCycle(format!(
                    "{} -> {}",
                    module.name(),
                    module.name()
                )));
            }
            if target.shared.kind == ModuleKind::Pseudo {
                return Err(ModuleError::InvalidArgument(format!(
                    "不能依赖伪模块 '{}'",
                    target.name()
                )));
            }

            let namespace = request.namespace.as_str();
            if namespace != GLOBAL_NAMESPACE && module.shared.includes(namespace).is_none() {
                return Err(ModuleError::NamespaceNotIncluded {
                    module: module.name().to_string(),
                    namespace: namespace.to_string(),
                });
            }

            if let Some(ref required) = request.version {
                if !target.version().is_compatible_with(required) {
                    return Err(ModuleError::VersionMismatch {
                        module: target.name().to_string(),
                        required: required.to_string(),
                        found: target.version().to_string(),
                    });
                }
            }

            if state.graph.path_exists(target.name(), module.name()) {
                return Err(ModuleError::DependencyCycle(format!(
                    "{} -> {} -> ... -> {}",
                    module.name(),
                    target.name(),
                    module.name()
                )));
            }

            let namespace = Some(namespace).filter(|ns| *ns != GLOBAL_NAMESPACE);
            state
                .graph
                .acquire_edge(module.name(), target.name(), DependencyKind::Dynamic, namespace);
            Ok(())
        })?;

        debug!("已获取依赖");
        Ok(())
    }

    /// 释放一次动态依赖
    ///
    /// `request` 的命名空间须与获取时一致，版本要求不参与释放。
    #[instrument(skip_all, fields(module = %module.name(), dependency = %dependency.name()))]
    pub fn relinquish_dependency(
        &self,
        module: &Module,
        dependency: &ModuleInfo,
        request: &DependencyRequest,
    ) -> Result<()> {
        let removed = self.with_state(|state| {
            self.live_caller(state, module)?;
            let target = self.live_target(state, dependency)?;
            let namespace = Some(request.namespace.as_str()).filter(|ns| *ns != GLOBAL_NAMESPACE);
            state.graph.release_edge(module.name(), target.name(), namespace)
        })?;

        debug!(edge_removed = removed, "已释放依赖");
        Ok(())
    }

    /// 查询依赖边的类型，没有边时为 `None`
    pub fn has_dependency(&self, module: &Module, dependency: &ModuleInfo) -> Result<Option<DependencyKind>> {
        self.with_state(|state| {
            self.live_caller(state, module)?;
            let target = self.live_target(state, dependency)?;
            Ok(state
                .graph
                .edge(module.name(), target.name())
                .map(|edge| edge.kind()))
        })
    }

    // ==================== 符号 ====================

    /// 以模块身份加载带类型的符号
    ///
    /// 调用方须能看到符号所在的命名空间。类型与导出值不一致时返回
    /// [`ModuleError::TypeMismatch`]。
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

    /// 以模块身份加载未定型的符号
    pub fn load_symbol_raw(
        &self,
        module: &Module,
        namespace: &str,
        name: &str,
        version: &Version,
    ) -> Result<Arc<SymbolEntry>> {
        if !module.belongs_to(&self.inner) || !module.is_loaded() {
            return Err(ModuleError::InvalidArgument(format!(
                "模块 '{}' 不是此注册表中的已加载模块",
                module.name()
            )));
        }
        if namespace != GLOBAL_NAMESPACE && module.shared.includes(namespace).is_none() {
            return Err(ModuleError::NamespaceNotIncluded {
                module: module.name().to_string(),
                namespace: namespace.to_string(),
            });
        }
        self.inner.symbols.resolve(namespace, name, version)
    }

    // ==================== 参数 ====================

    fn owner_of_parameter(&self, module: &str) -> Result<Arc<Module>> {
        self.loaded_module(module)
            .ok_or_else(|| ModuleError::NotFound(format!("模块 '{}'", module)))
    }

    /// 查询参数的类型与访问级别
    pub fn param_query(&self, module: &str, parameter: &str) -> Result<ParameterInfo> {
        let owner = self.owner_of_parameter(module)?;
        let info = owner.shared.parameter(parameter)?.info();
        Ok(info)
    }

    /// 以公开级别读取参数
    pub fn param_get_public(&self, module: &str, parameter: &str) -> Result<ParameterValue> {
        self.owner_of_parameter(module)?
            .shared
            .param_get(parameter, ParameterAccess::Public)
    }

    /// 以公开级别写入参数
    pub fn param_set_public(
        &self,
        module: &str,
        parameter: &str,
        value: impl Into<ParameterValue>,
    ) -> Result<()> {
        self.owner_of_parameter(module)?
            .shared
            .param_set(parameter, ParameterAccess::Public, value.into())
    }

    /// 调用方必须持有指向参数所有者的依赖边
    fn dependency_owner(&self, caller: &Module, module: &str, parameter: &str) -> Result<Arc<Module>> {
        self.with_state(|state| {
            self.live_caller(state, caller)?;
            let owner = state
                .modules
                .get(module)
                .cloned()
                .ok_or_else(|| ModuleError::NotFound(format!("模块 '{}'", module)))?;
            if state.graph.edge(caller.name(), module).is_none() {
                return Err(ModuleError::AccessDenied {
                    module: module.to_string(),
                    parameter: parameter.to_string(),
                    operation: format!("模块 '{}' 没有指向该模块的依赖", caller.name()),
                });
            }
            Ok(owner)
        })
    }

    /// 以依赖级别读取参数
    pub fn param_get_dependency(
        &self,
        caller: &Module,
        module: &str,
        parameter: &str,
    ) -> Result<ParameterValue> {
        self.dependency_owner(caller, module, parameter)?
            .shared
            .param_get(parameter, ParameterAccess::Dependency)
    }

    /// 以依赖级别写入参数
    pub fn param_set_dependency(
        &self,
        caller: &Module,
        module: &str,
        parameter: &str,
        value: impl Into<ParameterValue>,
    ) -> Result<()> {
        self.dependency_owner(caller, module, parameter)?
            .shared
            .param_set(parameter, ParameterAccess::Dependency, value.into())
    }

    /// 读取调用方自己的参数
    pub fn param_get_private(&self, caller: &Module, parameter: &str) -> Result<ParameterValue> {
        self.check_live_module(caller)?;
        caller.param_get(parameter)
    }

    /// 写入调用方自己的参数
    pub fn param_set_private(
        &self,
        caller: &Module,
        parameter: &str,
        value: impl Into<ParameterValue>,
    ) -> Result<()> {
        self.check_live_module(caller)?;
        caller.param_set(parameter, value)
    }

    /// 模块须属于此注册表且仍已加载
    pub(crate) fn check_live_module(&self, caller: &Module) -> Result<()> {
        if caller.belongs_to(&self.inner) && caller.is_loaded() {
            Ok(())
        } else {
            Err(ModuleError::InvalidArgument(format!(
                "模块 '{}' 不是此注册表中的已加载模块",
                caller.name()
            )))
        }
    }

    // ==================== 伪模块 ====================

    /// 创建伪模块
    pub fn pseudo_module_new(&self) -> Result<PseudoModule> {
        let module = self.with_state(|state| {
            let mut name = pseudo_module_name();
            while state.modules.contains_key(&name) {
                name = pseudo_module_name();
            }

            let shared = Arc::new(ModuleShared::pseudo(name.clone()));
            let registry = Arc::downgrade(&self.inner);
            state.graph.add_module(&name);
            state.modules.insert(
                name,
                Arc::new(Module::new(Arc::clone(&shared), registry.clone())),
            );
            Module::new(shared, registry)
        });

        debug!(module = %module.name(), "伪模块已创建");
        Ok(PseudoModule::new(module))
    }

    /// 销毁伪模块，释放它持有的依赖和命名空间
    pub fn pseudo_module_destroy(&self, pseudo: &PseudoModule) -> Result<()> {
        let _guard = self.inner.state.lock();

        let module = self.with_state(|state| -> Result<Arc<Module>> {
            let module = self.live_caller(state, pseudo.module())?;
            if module.shared.kind != ModuleKind::Pseudo {
                return Err(ModuleError::InvalidArgument(format!(
                    "'{}' 不是伪模块",
                    module.name()
                )));
            }
            let dependents = state.graph.get_dependents(module.name());
            if !dependents.is_empty() {
                return Err(ModuleError::StillReferenced {
                    module: module.name().to_string(),
                    reason: format!("被以下模块依赖: {}", dependents.join(", ")),
                });
            }
            Ok(module)
        })?;

        self.teardown(&module, false);
        debug!(module = %module.name(), "伪模块已销毁");

        if self.inner.config.unload_unused_on_release {
            self.unload_unused();
        }
        Ok(())
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.len())
            .field("symbols", &self.inner.symbols.len())
            .field("exports", &self.inner.exports.len())
            .finish()
    }
}

// ============================================================================
// 构建器
// ============================================================================

/// 注册表构建器
#[derive(Debug, Default)]
pub struct ModuleRegistryBuilder {
    exports: Option<Arc<ExportRegistry>>,
    config: RegistryConfig,
}

impl ModuleRegistryBuilder {
    /// 使用指定的导出注册表，默认为进程级导出注册表
    pub fn exports(mut self, exports: Arc<ExportRegistry>) -> Self {
        self.exports = Some(exports);
        self
    }

    /// 使用指定配置
    pub fn config(mut self, config: RegistryConfig) -> Self {
        self.config = config;
        self
    }

    /// 校验配置并创建注册表
    pub fn build(self) -> Result<ModuleRegistry> {
        self.config.validate()?;
        let exports = self.exports.unwrap_or_else(ExportRegistry::global);
        if self.config.loading.unload_unused_on_release {
            warn!("已启用卸载后自动清理，无外部句柄的模块会被连带卸载");
        }
        Ok(ModuleRegistry::from_parts(exports, self.config.loading))
    }
}
