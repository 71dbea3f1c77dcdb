//! 加载集
//!
//! 加载集把一批模块描述符作为一个事务提交：要么全部加载，要么一个都不加载。
//!
//! ```text
//! Pending ──finish──> Resolving ──> Committed
//!    │                    │
//!    └──dismiss──┐        └──失败──┐
//!                ▼                 ▼
//!            Dismissed         Dismissed
//! ```
//!
//! 每个暂存的描述符都带有一组回调，且每个回调至多触发一次：
//! 成功加载触发 `on_success`，导致失败的那个模块触发 `on_error`，
//! 其余未能加载的模块触发 `on_cleanup`。暂存后还可以用
//! [`LoadingSet::append_callback`] 为同一模块追加回调。
//!
//! [`LoadingSet::append_owned`] 暂存的模块属于一个已加载的所有者：暂存期间所有者
//! 无法卸载，加载后新模块对所有者持有一条静态依赖。

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, info, instrument, trace, warn};

use crate::module::dependency::{DependencyGraph, DependencyKind};
use crate::module::descriptor::ModuleDescriptor;
use crate::module::info::{Module, ModuleInfo, ModuleKind};
use crate::module::registry::ModuleRegistry;
use crate::module::symbol::SymbolKey;
use crate::utils::{generate_uuid, ModuleError, Result, Version};

/// 加载集状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetState {
    /// 可继续追加
    Pending,
    /// 正在解析和实例化
    Resolving,
    /// 已全部加载
    Committed,
    /// 已放弃
    Dismissed,
}

impl fmt::Display for SetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SetState::Pending => "pending",
            SetState::Resolving => "resolving",
            SetState::Committed => "committed",
            SetState::Dismissed => "dismissed",
        };
        f.write_str(name)
    }
}

/// 过滤器的决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterRequest {
    /// 暂存该描述符
    Load,
    /// 跳过该描述符
    Skip,
}

type SuccessFn = Arc<dyn Fn(&ModuleInfo) + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&ModuleDescriptor, &ModuleError) + Send + Sync>;
type CleanupFn = Arc<dyn Fn(&ModuleDescriptor) + Send + Sync>;

/// 描述符的加载回调
#[derive(Clone, Default)]
pub struct LoadCallbacks {
    on_success: Option<SuccessFn>,
    on_error: Option<ErrorFn>,
    on_cleanup: Option<CleanupFn>,
}

impl LoadCallbacks {
    /// 不带任何回调
    pub fn new() -> Self {
        Self::default()
    }

    /// 模块加载成功
    pub fn on_success<F>(mut self, f: F) -> Self
    where
        F: Fn(&ModuleInfo) + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(f));
        self
    }

    /// 该模块导致加载集失败
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&ModuleDescriptor, &ModuleError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// 描述符被跳过、放弃或随加载集一起回滚
    pub fn on_cleanup<F>(mut self, f: F) -> Self
    where
        F: Fn(&ModuleDescriptor) + Send + Sync + 'static,
    {
        self.on_cleanup = Some(Arc::new(f));
        self
    }

    fn success(&self, info: &ModuleInfo) {
        if let Some(ref f) = self.on_success {
            f(info);
        }
    }

    fn error(&self, descriptor: &ModuleDescriptor, error: &ModuleError) {
        if let Some(ref f) = self.on_error {
            f(descriptor, error);
        }
    }

    fn cleanup(&self, descriptor: &ModuleDescriptor) {
        if let Some(ref f) = self.on_cleanup {
            f(descriptor);
        }
    }
}

impl fmt::Debug for LoadCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadCallbacks")
            .field("on_success", &self.on_success.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_cleanup", &self.on_cleanup.is_some())
            .finish()
    }
}

struct Staged {
    descriptor: Arc<ModuleDescriptor>,
    callbacks: Vec<Arc<LoadCallbacks>>,
    owner: Option<ModuleInfo>,
}

impl Staged {
    fn success(&self, info: &ModuleInfo) {
        for callbacks in &self.callbacks {
            callbacks.success(info);
        }
    }

    fn error(&self, error: &ModuleError) {
        for callbacks in &self.callbacks {
            callbacks.error(&self.descriptor, error);
        }
    }

    fn cleanup(&self) {
        for callbacks in &self.callbacks {
            callbacks.cleanup(&self.descriptor);
        }
    }
}

struct SetInner {
    state: SetState,
    staged: Vec<Staged>,
}

/// 解析失败：出错的暂存下标与错误
struct ResolveFailure {
    culprit: usize,
    error: ModuleError,
}

// ============================================================================
// LoadingSet
// ============================================================================

/// 加载集
pub struct LoadingSet {
    id: String,
    registry: ModuleRegistry,
    inner: Mutex<SetInner>,
}

impl LoadingSet {
    pub(crate) fn new(registry: ModuleRegistry) -> Self {
        let id = generate_uuid();
        trace!(set_id = %id, "创建加载集");
        Self {
            id,
            registry,
            inner: Mutex::new(SetInner {
                state: SetState::Pending,
                staged: Vec::new(),
            }),
        }
    }

    /// 加载集 ID
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 当前状态
    pub fn state(&self) -> SetState {
        self.inner.lock().state
    }

    /// 已暂存的模块名，按暂存顺序
    pub fn staged_names(&self) -> Vec<String> {
        self.inner
            .lock()
            .staged
            .iter()
            .map(|s| s.descriptor.name().to_string())
            .collect()
    }

    /// 已暂存的描述符数
    pub fn len(&self) -> usize {
        self.inner.lock().staged.len()
    }

    /// 是否没有暂存任何描述符
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 是否已暂存同名模块
    pub fn has_module(&self, name: &str) -> bool {
        self.inner
            .lock()
            .staged
            .iter()
            .any(|s| s.descriptor.name() == name)
    }

    /// 暂存的模块中是否有兼容的导出
    pub fn has_symbol(&self, namespace: &str, name: &str, version: &Version) -> bool {
        self.inner.lock().staged.iter().any(|s| {
            s.descriptor
                .exports_symbol(namespace, name)
                .is_some_and(|e| e.version.is_compatible_with(version))
        })
    }

    // ==================== 追加 ====================

    /// 暂存一个描述符
    pub fn append_module(&self, descriptor: Arc<ModuleDescriptor>, callbacks: LoadCallbacks) -> Result<()> {
        self.append_descriptors(std::iter::once(descriptor), |_| FilterRequest::Load, callbacks)
            .map(|_| ())
    }

    /// 遍历导出注册表，暂存过滤器接受的描述符
    pub fn append_exports<F>(&self, filter: F, callbacks: LoadCallbacks) -> Result<usize>
    where
        F: FnMut(&ModuleDescriptor) -> FilterRequest,
    {
        let descriptors = self.registry.exports().snapshot();
        self.append_descriptors(descriptors, filter, callbacks)
    }

    /// 按加载配置中的 `auto_load` / `skip` 暂存导出注册表中的描述符
    pub fn append_configured_exports(&self, callbacks: LoadCallbacks) -> Result<usize> {
        let config = self.registry.config().clone();
        self.append_exports(
            |d| {
                if config.accepts(d.name()) {
                    FilterRequest::Load
                } else {
                    FilterRequest::Skip
                }
            },
            callbacks,
        )
    }

    /// 暂存一批描述符，返回实际暂存的数量
    ///
    /// 整批要么全部暂存，要么全部不暂存：任一描述符与已暂存或已加载的模块重名时
    /// 返回 [`ModuleError::DuplicateModule`]，且每个候选都会触发 `on_cleanup`。
    pub fn append_descriptors<I, F>(
        &self,
        descriptors: I,
        mut filter: F,
        callbacks: LoadCallbacks,
    ) -> Result<usize>
    where
        I: IntoIterator<Item = Arc<ModuleDescriptor>>,
        F: FnMut(&ModuleDescriptor) -> FilterRequest,
    {
        let callbacks = Arc::new(callbacks);
        let mut accepted = Vec::new();
        let mut skipped = Vec::new();
        for descriptor in descriptors {
            match filter(&descriptor) {
                FilterRequest::Load => accepted.push(descriptor),
                FilterRequest::Skip => skipped.push(descriptor),
            }
        }

        let result = self.stage(&accepted, &callbacks, None);

        for descriptor in &skipped {
            trace!(set_id = %self.id, module = %descriptor.name(), "过滤器跳过模块");
            callbacks.cleanup(descriptor);
        }

        match result {
            Ok(()) => {
                debug!(set_id = %self.id, staged = accepted.len(), skipped = skipped.len(), "已追加描述符");
                Ok(accepted.len())
            }
            Err(e) => {
                for descriptor in &accepted {
                    callbacks.cleanup(descriptor);
                }
                Err(e)
            }
        }
    }

    /// 为子模块暂存一个描述符
    ///
    /// `owner` 必须是此注册表中已加载的模块。暂存期间加载集持有所有者的句柄，
    /// 提交后子模块对所有者建立一条静态依赖，所以子模块卸载之前所有者都无法卸载。
    pub fn append_owned(
        &self,
        owner: &Module,
        descriptor: Arc<ModuleDescriptor>,
        callbacks: LoadCallbacks,
    ) -> Result<()> {
        let callbacks = Arc::new(callbacks);
        let owner_info = owner.info();
        let result = self
            .registry
            .check_live_module(owner)
            .and_then(|()| self.stage(std::slice::from_ref(&descriptor), &callbacks, Some(&owner_info)));

        match result {
            Ok(()) => {
                debug!(set_id = %self.id, module = %descriptor.name(), owner = %owner.name(), "已追加子模块");
                Ok(())
            }
            Err(e) => {
                callbacks.cleanup(&descriptor);
                Err(e)
            }
        }
    }

    /// 为已暂存的模块追加一组回调
    ///
    /// 模块未暂存时返回 [`ModuleError::NotFound`]。
    pub fn append_callback(&self, name: &str, callbacks: LoadCallbacks) -> Result<()> {
        let mut inner = self.inner.lock();
        self.ensure_pending(&inner)?;
        let staged = inner
            .staged
            .iter_mut()
            .find(|s| s.descriptor.name() == name)
            .ok_or_else(|| ModuleError::NotFound(format!("暂存模块 '{}'", name)))?;
        staged.callbacks.push(Arc::new(callbacks));
        trace!(set_id = %self.id, module = %name, count = staged.callbacks.len(), "已追加回调");
        Ok(())
    }

    fn stage(
        &self,
        accepted: &[Arc<ModuleDescriptor>],
        callbacks: &Arc<LoadCallbacks>,
        owner: Option<&ModuleInfo>,
    ) -> Result<()> {
        self.ensure_pending(&self.inner.lock())?;

        // 查询注册表时不持有加载集的锁
        if let Some(d) = accepted.iter().find(|d| self.registry.contains(d.name())) {
            return Err(ModuleError::DuplicateModule(d.name().to_string()));
        }

        let mut inner = self.inner.lock();
        self.ensure_pending(&inner)?;

        let mut names: HashSet<&str> = inner.staged.iter().map(|s| s.descriptor.name()).collect();
        for descriptor in accepted {
            if !names.insert(descriptor.name()) {
                return Err(ModuleError::DuplicateModule(descriptor.name().to_string()));
            }
        }

        inner.staged.extend(accepted.iter().map(|d| Staged {
            descriptor: Arc::clone(d),
            callbacks: vec![Arc::clone(callbacks)],
            owner: owner.cloned(),
        }));
        Ok(())
    }

    fn ensure_pending(&self, inner: &SetInner) -> Result<()> {
        if inner.state == SetState::Pending {
            Ok(())
        } else {
            Err(ModuleError::InvalidSetState {
                set_id: self.id.clone(),
                state: inner.state.to_string(),
            })
        }
    }

    /// 取出全部暂存项并切换状态
    fn take_staged(&self, next: SetState) -> Result<Vec<Staged>> {
        let mut inner = self.inner.lock();
        self.ensure_pending(&inner)?;
        inner.state = next;
        Ok(std::mem::take(&mut inner.staged))
    }

    fn set_state(&self, state: SetState) {
        self.inner.lock().state = state;
    }

    // ==================== 结束 ====================

    /// 放弃加载集，所有暂存项触发 `on_cleanup`
    pub fn dismiss(&self) -> Result<()> {
        let staged = self.take_staged(SetState::Dismissed)?;
        info!(set_id = %self.id, count = staged.len(), "加载集已放弃");
        for s in &staged {
            s.cleanup();
        }
        Ok(())
    }

    /// 提交加载集
    ///
    /// 整个过程持有注册表锁。解析或任一模块构造失败时，已实例化的模块按相反顺序
    /// 析构，注册表恢复到提交前的状态。
    #[instrument(skip(self), fields(set_id = %self.id))]
    pub fn finish(&self) -> Result<()> {
        let staged = self.take_staged(SetState::Resolving)?;
        let start = Instant::now();
        let _guard = self.registry.lock();

        let order = match resolve(&self.registry, &staged) {
            Ok(order) => order,
            Err(failure) => {
                warn!(
                    module = %staged[failure.culprit].descriptor.name(),
                    error_code = failure.error.error_code(),
                    error = %failure.error,
                    "加载集解析失败"
                );
                self.abort(&staged, failure.culprit, &failure.error);
                return Err(failure.error);
            }
        };

        let mut instantiated: Vec<(usize, Arc<Module>)> = Vec::with_capacity(order.len());
        for index in order {
            let s = &staged[index];
            match self.registry.instantiate(&s.descriptor, s.owner.as_ref()) {
                Ok(module) => instantiated.push((index, module)),
                Err(error) => {
                    for (_, module) in instantiated.iter().rev() {
                        self.registry.teardown(module, true);
                    }
                    warn!(
                        module = %staged[index].descriptor.name(),
                        rolled_back = instantiated.len(),
                        error_code = error.error_code(),
                        error = %error,
                        "模块实例化失败，加载集已回滚"
                    );
                    self.abort(&staged, index, &error);
                    return Err(error);
                }
            }
        }

        self.set_state(SetState::Committed);
        info!(
            count = instantiated.len(),
            duration_us = start.elapsed().as_micros() as u64,
            "加载集已提交"
        );

        for (index, module) in &instantiated {
            staged[*index].success(&module.info());
        }
        Ok(())
    }

    fn abort(&self, staged: &[Staged], culprit: usize, error: &ModuleError) {
        self.set_state(SetState::Dismissed);
        for (index, s) in staged.iter().enumerate() {
            if index == culprit {
                s.error(error);
            } else {
                s.cleanup();
            }
        }
    }
}

impl Drop for LoadingSet {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.state != SetState::Pending {
            return;
        }
        inner.state = SetState::Dismissed;
        let staged = std::mem::take(&mut inner.staged);
        if !staged.is_empty() {
            debug!(set_id = %self.id, count = staged.len(), "未提交的加载集被释放");
        }
        for s in &staged {
            s.cleanup();
        }
    }
}

impl fmt::Debug for LoadingSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("LoadingSet")
            .field("id", &self.id)
            .field("state", &inner.state)
            .field("staged", &inner.staged.len())
            .finish()
    }
}

// ============================================================================
// 解析
// ============================================================================

/// 检查暂存项能否整体加载，返回实例化顺序（暂存下标）
///
/// 需要的命名空间若只由同批模块提供，则在解析图中加一条仅用于排序的边。
fn resolve(registry: &ModuleRegistry, staged: &[Staged]) -> std::result::Result<Vec<usize>, ResolveFailure> {
    let fail = |culprit: usize, error: ModuleError| ResolveFailure { culprit, error };
    let index: HashMap<&str, usize> = staged
        .iter()
        .enumerate()
        .map(|(i, s)| (s.descriptor.name(), i))
        .collect();
    let symbols = registry.symbols();

    let mut graph = DependencyGraph::new();
    for s in staged {
        graph.add_module(s.descriptor.name());
    }
    let mut claimed: HashMap<SymbolKey, usize> = HashMap::new();

    for (i, s) in staged.iter().enumerate() {
        let descriptor = &s.descriptor;
        let name = descriptor.name();

        if registry.contains(name) {
            return Err(fail(i, ModuleError::DuplicateModule(name.to_string())));
        }

        // 0. 所有者
        if let Some(ref owner) = s.owner {
            let live = registry
                .loaded_module(owner.name())
                .is_some_and(|m| owner.is_loaded() && Arc::ptr_eq(&m.shared, owner.shared()));
            if !live {
                return Err(fail(
                    i,
                    ModuleError::InvalidArgument(format!("所有者模块 '{}' 已卸载", owner.name())),
                ));
            }
        }

        // 1. 模块依赖
        for dep in descriptor.dependencies() {
            let found = match index.get(dep.name.as_str()) {
                Some(&j) => {
                    graph.acquire_edge(name, &dep.name, DependencyKind::Static, None);
                    staged[j].descriptor.version()
                }
                None => match registry.loaded_module(&dep.name) {
                    Some(m) if m.shared.kind == ModuleKind::Regular => m.version(),
                    _ => {
                        return Err(fail(
                            i,
                            ModuleError::UnresolvedDependency {
                                module: name.to_string(),
                                dependency: dep.name.clone(),
                            },
                        ))
                    }
                },
            };
            if !found.is_compatible_with(&dep.version) {
                return Err(fail(
                    i,
                    ModuleError::VersionMismatch {
                        module: dep.name.clone(),
                        required: dep.version.to_string(),
                        found: found.to_string(),
                    },
                ));
            }
        }

        // 2. 符号导入
        for import in descriptor.imports() {
            let provider = staged.iter().enumerate().find_map(|(j, p)| {
                if j == i {
                    return None;
                }
                p.descriptor
                    .exports_symbol(&import.namespace, &import.name)
                    .map(|e| (j, e.version))
            });
            let found = match provider {
                Some((j, version)) => {
                    graph.acquire_edge(name, staged[j].descriptor.name(), DependencyKind::Static, None);
                    version
                }
                None => match symbols.get(&import.namespace, &import.name) {
                    Some(entry) => entry.version,
                    None => {
                        return Err(fail(
                            i,
                            ModuleError::UnresolvedDependency {
                                module: name.to_string(),
                                dependency: format!("{}::{}", import.namespace, import.name),
                            },
                        ))
                    }
                },
            };
            if !found.is_compatible_with(&import.version) {
                return Err(fail(
                    i,
                    ModuleError::VersionMismatch {
                        module: format!("{}::{}", import.namespace, import.name),
                        required: import.version.to_string(),
                        found: found.to_string(),
                    },
                ));
            }
        }

        // 3. 命名空间
        for ns in descriptor.namespaces() {
            if symbols.namespace_exists(ns) {
                continue;
            }
            let provider = staged
                .iter()
                .enumerate()
                .find(|(j, p)| *j != i && p.descriptor.exports().iter().any(|e| &e.namespace == ns));
            match provider {
                Some((_, p)) => {
                    graph.acquire_edge(name, p.descriptor.name(), DependencyKind::Static, None);
                }
                None => return Err(fail(i, ModuleError::NamespaceNotFound(ns.clone()))),
            }
        }

        // 4. 导出冲突
        for export in descriptor.exports() {
            if let Some(entry) = symbols.get(&export.namespace, &export.name) {
                return Err(fail(
                    i,
                    ModuleError::SymbolConflict {
                        namespace: export.namespace.clone(),
                        name: export.name.clone(),
                        owner: entry.owner.clone(),
                    },
                ));
            }
            let key = SymbolKey::new(export.namespace.as_str(), export.name.as_str());
            if let Some(&j) = claimed.get(&key) {
                return Err(fail(
                    i,
                    ModuleError::SymbolConflict {
                        namespace: export.namespace.clone(),
                        name: export.name.clone(),
                        owner: staged[j].descriptor.name().to_string(),
                    },
                ));
            }
            claimed.insert(key, i);
        }
    }

    if let Some(cycle) = graph.find_cycle() {
        let culprit = cycle
            .first()
            .and_then(|n| index.get(n.as_str()).copied())
            .unwrap_or(0);
        return Err(fail(culprit, ModuleError::DependencyCycle(cycle.join(" -> "))));
    }

    let order = graph.topological_sort().map_err(|e| fail(0, e))?;
    Ok(order
        .iter()
        .filter_map(|n| index.get(n.as_str()).copied())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::export::ExportRegistry;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry() -> ModuleRegistry {
        ModuleRegistry::builder()
            .exports(Arc::new(ExportRegistry::new()))
            .build()
            .unwrap()
    }

    fn descriptor(name: &str) -> Arc<ModuleDescriptor> {
        ModuleDescriptor::builder(name, Version::new(1, 0, 0))
            .build()
            .unwrap()
    }

    #[test]
    fn test_state_transitions() {
        let registry = registry();
        let set = registry.set_new();
        assert_eq!(set.state(), SetState::Pending);

        set.append_module(descriptor("a"), LoadCallbacks::new()).unwrap();
        set.finish().unwrap();
        assert_eq!(set.state(), SetState::Committed);

        let err = set.finish().unwrap_err();
        assert!(matches!(err, ModuleError::InvalidSetState { .. }));
        assert!(set.dismiss().is_err());
    }

    #[test]
    fn test_duplicate_append_keeps_nothing() {
        let registry = registry();
        let cleaned = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&cleaned);
        let callbacks = LoadCallbacks::new().on_cleanup(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let set = registry.set_new();
        set.append_module(descriptor("a"), LoadCallbacks::new()).unwrap();
        let err = set
            .append_descriptors(
                vec![descriptor("b"), descriptor("a")],
                |_| FilterRequest::Load,
                callbacks,
            )
            .unwrap_err();

        assert!(matches!(err, ModuleError::DuplicateModule(ref n) if n == "a"));
        assert_eq!(cleaned.load(Ordering::SeqCst), 2);
        assert_eq!(set.staged_names(), vec!["a".to_string()]);
    }

    #[test]
    fn test_filter_skip_runs_cleanup() {
        let registry = registry();
        let skipped = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&skipped);

        let set = registry.set_new();
        let staged = set
            .append_descriptors(
                vec![descriptor("keep"), descriptor("drop")],
                |d| {
                    if d.name() == "drop" {
                        FilterRequest::Skip
                    } else {
                        FilterRequest::Load
                    }
                },
                LoadCallbacks::new().on_cleanup(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        assert_eq!(staged, 1);
        assert_eq!(skipped.load(Ordering::SeqCst), 1);
        assert!(set.has_module("keep"));
        assert!(!set.has_module("drop"));
    }

    #[test]
    fn test_drop_pending_set_cleans_up() {
        let registry = registry();
        let cleaned = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&cleaned);
        {
            let set = registry.set_new();
            set.append_module(
                descriptor("a"),
                LoadCallbacks::new().on_cleanup(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        }
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty());
    }
}
