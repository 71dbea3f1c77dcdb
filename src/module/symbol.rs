//! 符号表
//!
//! 以 (命名空间, 符号名) 为键，每个键最多只有一个导出模块。
//!
//! 符号表采用写时复制：读者克隆当前快照的 `Arc` 后无锁查找，写者（只在持有
//! 注册表锁时调用）复制快照、修改后整体替换，读者永远不会看到中间状态。
//!
//! 命名空间与符号一起记录：命名空间在仍有符号或仍被模块包含时存在，
//! 全局命名空间 `""` 始终存在。

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::module::descriptor::{SymbolValue, GLOBAL_NAMESPACE};
use crate::utils::{ModuleError, Result, Version};

/// 符号键
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolKey {
    /// 命名空间
    pub namespace: String,
    /// 符号名
    pub name: String,
}

impl SymbolKey {
    /// 创建符号键
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for SymbolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}::{}", self.namespace, self.name)
    }
}

/// 已发布的符号
#[derive(Debug)]
pub struct SymbolEntry {
    /// 符号键
    pub key: SymbolKey,
    /// 导出版本
    pub version: Version,
    /// 导出模块名
    pub owner: String,
    /// 符号值
    pub value: SymbolValue,
}

/// 命名空间状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NamespaceState {
    /// 该命名空间下的符号数
    pub symbol_count: usize,
    /// 包含该命名空间的模块数
    pub reference_count: usize,
}

/// 符号表快照
#[derive(Debug, Clone, Default)]
struct SymbolSnapshot {
    symbols: HashMap<SymbolKey, Arc<SymbolEntry>>,
    namespaces: HashMap<String, NamespaceState>,
}

/// 符号表
#[derive(Debug, Default)]
pub struct SymbolTable {
    current: RwLock<Arc<SymbolSnapshot>>,
}

impl SymbolTable {
    /// 创建空符号表
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Arc<SymbolSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// 复制当前快照，修改成功后再替换
    fn update<R>(&self, f: impl FnOnce(&mut SymbolSnapshot) -> Result<R>) -> Result<R> {
        let mut current = self.current.write();
        let mut next = SymbolSnapshot::clone(&current);
        let result = f(&mut next)?;
        *current = Arc::new(next);
        Ok(result)
    }

    /// 不会失败的修改
    fn modify<R>(&self, f: impl FnOnce(&mut SymbolSnapshot) -> R) -> R {
        let mut current = self.current.write();
        let mut next = SymbolSnapshot::clone(&current);
        let result = f(&mut next);
        *current = Arc::new(next);
        result
    }

    // ==================== 查询 ====================

    /// 按键查找符号，不检查版本
    pub fn get(&self, namespace: &str, name: &str) -> Option<Arc<SymbolEntry>> {
        self.snapshot()
            .symbols
            .get(&SymbolKey::new(namespace, name))
            .cloned()
    }

    /// 解析符号并检查版本兼容性
    pub fn resolve(&self, namespace: &str, name: &str, version: &Version) -> Result<Arc<SymbolEntry>> {
        let entry = self.get(namespace, name).ok_or_else(|| {
            ModuleError::NotFound(format!("符号 '{}::{}'", namespace, name))
        })?;

        if !entry.version.is_compatible_with(version) {
            return Err(ModuleError::VersionMismatch {
                module: format!("{}::{}", namespace, name),
                required: version.to_string(),
                found: entry.version.to_string(),
            });
        }

        trace!(namespace = %namespace, symbol = %name, owner = %entry.owner, "解析符号");
        Ok(entry)
    }

    /// 符号的导出模块
    pub fn owner_of(&self, namespace: &str, name: &str) -> Option<String> {
        self.get(namespace, name).map(|e| e.owner.clone())
    }

    /// 命名空间是否存在
    pub fn namespace_exists(&self, namespace: &str) -> bool {
        namespace == GLOBAL_NAMESPACE || self.snapshot().namespaces.contains_key(namespace)
    }

    /// 命名空间状态
    pub fn namespace_state(&self, namespace: &str) -> Option<NamespaceState> {
        self.snapshot().namespaces.get(namespace).copied()
    }

    /// 模块导出的全部符号
    pub fn symbols_of(&self, owner: &str) -> Vec<Arc<SymbolEntry>> {
        let mut symbols: Vec<_> = self
            .snapshot()
            .symbols
            .values()
            .filter(|e| e.owner == owner)
            .cloned()
            .collect();
        symbols.sort_by(|a, b| a.key.cmp(&b.key));
        symbols
    }

    /// 符号总数
    pub fn len(&self) -> usize {
        self.snapshot().symbols.len()
    }

    /// 是否没有符号
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ==================== 修改（调用方须持有注册表锁） ====================

    /// 发布一个模块的全部导出，任一冲突时整体不生效
    pub(crate) fn insert_exports(
        &self,
        owner: &str,
        exports: Vec<(SymbolKey, Version, SymbolValue)>,
    ) -> Result<()> {
        if exports.is_empty() {
            return Ok(());
        }

        self.update(|snapshot| {
            for (key, _, _) in &exports {
                if let Some(existing) = snapshot.symbols.get(key) {
                    return Err(ModuleError::SymbolConflict {
                        namespace: key.namespace.clone(),
                        name: key.name.clone(),
                        owner: existing.owner.clone(),
                    });
                }
            }

            for (key, version, value) in exports {
                if key.namespace != GLOBAL_NAMESPACE {
                    snapshot
                        .namespaces
                        .entry(key.namespace.clone())
                        .or_default()
                        .symbol_count += 1;
                }
                let entry = Arc::new(SymbolEntry {
                    key: key.clone(),
                    version,
                    owner: owner.to_string(),
                    value,
                });
                snapshot.symbols.insert(key, entry);
            }
            Ok(())
        })?;

        debug!(module = %owner, "已发布模块导出");
        Ok(())
    }

    /// 移除一个模块的全部导出
    pub(crate) fn remove_owner(&self, owner: &str) {
        let count = self.modify(|snapshot| {
            let keys: Vec<SymbolKey> = snapshot
                .symbols
                .values()
                .filter(|e| e.owner == owner)
                .map(|e| e.key.clone())
                .collect();

            for key in &keys {
                snapshot.symbols.remove(key);
                if key.namespace != GLOBAL_NAMESPACE {
                    release_namespace_slot(snapshot, &key.namespace, |s| {
                        s.symbol_count = s.symbol_count.saturating_sub(1)
                    });
                }
            }
            keys.len()
        });

        if count > 0 {
            debug!(module = %owner, count = count, "已移除模块导出");
        }
    }

    /// 增加命名空间引用，命名空间必须已存在
    pub(crate) fn acquire_namespace(&self, namespace: &str) -> Result<()> {
        if namespace == GLOBAL_NAMESPACE {
            return Ok(());
        }
        self.update(|snapshot| {
            let state = snapshot
                .namespaces
                .get_mut(namespace)
                .ok_or_else(|| ModuleError::NamespaceNotFound(namespace.to_string()))?;
            state.reference_count += 1;
            Ok(())
        })
    }

    /// 释放命名空间引用
    pub(crate) fn release_namespace(&self, namespace: &str) {
        if namespace == GLOBAL_NAMESPACE {
            return;
        }
        self.modify(|snapshot| {
            release_namespace_slot(snapshot, namespace, |s| {
                s.reference_count = s.reference_count.saturating_sub(1)
            });
        });
    }
}

/// 修改命名空间计数，计数归零时移除命名空间
fn release_namespace_slot(
    snapshot: &mut SymbolSnapshot,
    namespace: &str,
    f: impl FnOnce(&mut NamespaceState),
) {
    if let Some(state) = snapshot.namespaces.get_mut(namespace) {
        f(state);
        if state.symbol_count == 0 && state.reference_count == 0 {
            snapshot.namespaces.remove(namespace);
            trace!(namespace = %namespace, "命名空间已移除");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn export(ns: &str, name: &str, version: Version) -> (SymbolKey, Version, SymbolValue) {
        (SymbolKey::new(ns, name), version, Arc::new(name.to_string()))
    }

    #[test]
    fn test_insert_and_resolve() {
        let table = SymbolTable::new();
        table
            .insert_exports("io", vec![export("io", "read", Version::new(1, 4, 0))])
            .unwrap();

        let entry = table.resolve("io", "read", &Version::new(1, 2, 0)).unwrap();
        assert_eq!(entry.owner, "io");
        assert_eq!(
            entry.value.downcast_ref::<String>().map(String::as_str),
            Some("read")
        );

        assert!(matches!(
            table.resolve("io", "read", &Version::new(1, 5, 0)),
            Err(ModuleError::VersionMismatch { .. })
        ));
        assert!(table
            .resolve("io", "write", &Version::new(1, 0, 0))
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_conflicting_insert_has_no_effect() {
        let table = SymbolTable::new();
        table
            .insert_exports("a", vec![export("", "shared", Version::new(1, 0, 0))])
            .unwrap();

        let err = table
            .insert_exports(
                "b",
                vec![
                    export("net", "connect", Version::new(1, 0, 0)),
                    export("", "shared", Version::new(1, 0, 0)),
                ],
            )
            .unwrap_err();

        assert!(matches!(err, ModuleError::SymbolConflict { ref owner, .. } if owner == "a"));
        assert!(table.get("net", "connect").is_none());
        assert!(!table.namespace_exists("net"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_namespace_lifetime() {
        let table = SymbolTable::new();
        assert!(table.namespace_exists(""));
        assert!(!table.namespace_exists("net"));
        assert!(table.acquire_namespace("net").is_err());

        table
            .insert_exports("net", vec![export("net", "connect", Version::new(1, 0, 0))])
            .unwrap();
        table.acquire_namespace("net").unwrap();
        assert_eq!(
            table.namespace_state("net"),
            Some(NamespaceState {
                symbol_count: 1,
                reference_count: 1
            })
        );

        // 符号移除后仍有引用，命名空间保留
        table.remove_owner("net");
        assert!(table.namespace_exists("net"));

        table.release_namespace("net");
        assert!(!table.namespace_exists("net"));
    }

    #[test]
    fn test_release_unknown_namespace_is_noop() {
        let table = SymbolTable::new();
        table
            .insert_exports("io", vec![export("io", "read", Version::new(1, 0, 0))])
            .unwrap();

        table.release_namespace("gpu");
        table.release_namespace("");
        table.remove_owner("nobody");

        assert_eq!(
            table.namespace_state("io"),
            Some(NamespaceState {
                symbol_count: 1,
                reference_count: 0
            })
        );
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_readers_keep_old_snapshot() {
        let table = SymbolTable::new();
        table
            .insert_exports("m", vec![export("", "value", Version::new(1, 0, 0))])
            .unwrap();

        let held = table.get("", "value").unwrap();
        table.remove_owner("m");

        assert!(table.get("", "value").is_none());
        assert_eq!(held.owner, "m");
        assert_eq!(table.symbols_of("m").len(), 0);
    }
}
