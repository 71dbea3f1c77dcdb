//! 模块依赖图
//!
//! 有向边 "A 依赖 B" 带有引用计数：
//!
//! - 静态边来自描述符中的依赖声明与符号导入，在模块生命周期内不可释放；
//! - 动态边由 `acquire_dependency` 建立，每次获取计数加一，释放到零时移除。
//!
//! 每条边还记录它所依赖的命名空间，命名空间在仍被边依赖时不可排除。
//! 动态引用按获取时的命名空间分别计数，释放时须指明同一命名空间。
//!
//! # 示例
//!
//! ```rust
//! use chips_modules::module::dependency::{DependencyGraph, DependencyKind};
//!
//! let mut graph = DependencyGraph::new();
//! graph.add_module("app");
//! graph.add_module("logger");
//! graph.acquire_edge("app", "logger", DependencyKind::Static, None);
//!
//! assert_eq!(graph.get_dependencies("app"), vec!["logger".to_string()]);
//! assert_eq!(graph.topological_sort().unwrap(), vec!["logger", "app"]);
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::module::descriptor::GLOBAL_NAMESPACE;
use crate::utils::{ModuleError, Result};

/// 依赖边类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DependencyKind {
    /// 描述符声明的依赖，不可释放
    Static,
    /// 运行时获取的依赖
    Dynamic,
}

/// 依赖边
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyEdge {
    /// 被依赖的模块
    pub dependency: String,
    /// 是否包含静态引用
    pub is_static: bool,
    /// 静态引用依赖的命名空间
    static_namespaces: BTreeSet<String>,
    /// 动态引用计数，按获取时的命名空间分组，全局命名空间记为 `""`
    dynamic: BTreeMap<String, usize>,
}

impl DependencyEdge {
    /// 边的类型，只要含有静态引用即视为静态
    pub fn kind(&self) -> DependencyKind {
        if self.is_static {
            DependencyKind::Static
        } else {
            DependencyKind::Dynamic
        }
    }

    /// 动态引用数
    pub fn dynamic_count(&self) -> usize {
        self.dynamic.values().sum()
    }

    /// 总引用数
    pub fn reference_count(&self) -> usize {
        usize::from(self.is_static) + self.dynamic_count()
    }

    /// 是否仍有引用依赖该命名空间
    pub fn relies_on(&self, namespace: &str) -> bool {
        namespace != GLOBAL_NAMESPACE
            && (self.static_namespaces.contains(namespace) || self.dynamic.contains_key(namespace))
    }

    /// 边依赖的所有命名空间
    pub fn namespaces(&self) -> BTreeSet<&str> {
        self.static_namespaces
            .iter()
            .chain(self.dynamic.keys())
            .map(String::as_str)
            .filter(|ns| *ns != GLOBAL_NAMESPACE)
            .collect()
    }

    fn add_reference(&mut self, kind: DependencyKind, namespace: Option<&str>) {
        match kind {
            DependencyKind::Static => {
                self.is_static = true;
                if let Some(ns) = namespace.filter(|ns| *ns != GLOBAL_NAMESPACE) {
                    self.static_namespaces.insert(ns.to_string());
                }
            }
            DependencyKind::Dynamic => {
                let key = namespace.unwrap_or(GLOBAL_NAMESPACE);
                *self.dynamic.entry(key.to_string()).or_insert(0) += 1;
            }
        }
    }
}

/// 模块依赖关系图
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// 节点插入顺序，用于确定性的遍历与排序
    order: Vec<String>,
    /// 正向边：模块 -> 该模块的依赖边
    edges: HashMap<String, Vec<DependencyEdge>>,
    /// 反向边：模块 -> 依赖该模块的模块
    reverse_edges: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// 创建空的依赖图
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加模块节点，已存在时忽略
    pub fn add_module(&mut self, module: &str) {
        if self.edges.contains_key(module) {
            return;
        }
        self.order.push(module.to_string());
        self.edges.insert(module.to_string(), Vec::new());
        self.reverse_edges.insert(module.to_string(), Vec::new());
    }

    /// 移除模块及其所有出边和入边
    pub fn remove_module(&mut self, module: &str) {
        if let Some(deps) = self.edges.remove(module) {
            for dep in deps {
                if let Some(rev) = self.reverse_edges.get_mut(&dep.dependency) {
                    rev.retain(|d| d != module);
                }
            }
        }
        if let Some(dependents) = self.reverse_edges.remove(module) {
            for dependent in dependents {
                if let Some(deps) = self.edges.get_mut(&dependent) {
                    deps.retain(|d| d.dependency != module);
                }
            }
        }
        self.order.retain(|m| m != module);
    }

    /// 获取一条依赖引用
    ///
    /// 返回 `true` 表示新建了边。调用方负责在此之前完成环检测。
    pub fn acquire_edge(
        &mut self,
        module: &str,
        dependency: &str,
        kind: DependencyKind,
        namespace: Option<&str>,
    ) -> bool {
        self.add_module(module);
        self.add_module(dependency);

        let deps = self.edges.entry(module.to_string()).or_default();
        let created = match deps.iter_mut().find(|e| e.dependency == dependency) {
            Some(edge) => {
                edge.add_reference(kind, namespace);
                false
            }
            None => {
                let mut edge = DependencyEdge {
                    dependency: dependency.to_string(),
                    is_static: false,
                    static_namespaces: BTreeSet::new(),
                    dynamic: BTreeMap::new(),
                };
                edge.add_reference(kind, namespace);
                deps.push(edge);
                true
            }
        };

        if created {
            self.reverse_edges
                .entry(dependency.to_string())
                .or_default()
                .push(module.to_string());
        }
        created
    }

    /// 释放一次经由 `namespace` 获取的动态引用
    ///
    /// 返回 `true` 表示边已被移除。静态边只剩静态引用时返回
    /// [`ModuleError::StaticDependency`]；该命名空间下没有动态引用时返回
    /// [`ModuleError::NoSuchDependency`]。
    pub fn release_edge(
        &mut self,
        module: &str,
        dependency: &str,
        namespace: Option<&str>,
    ) -> Result<bool> {
        let no_such = || ModuleError::NoSuchDependency {
            module: module.to_string(),
            dependency: dependency.to_string(),
        };

        let deps = self.edges.get_mut(module).ok_or_else(no_such)?;
        let index = deps
            .iter()
            .position(|e| e.dependency == dependency)
            .ok_or_else(no_such)?;

        let edge = &mut deps[index];
        if edge.dynamic.is_empty() {
            return Err(ModuleError::StaticDependency {
                module: module.to_string(),
                dependency: dependency.to_string(),
            });
        }

        let key = namespace.unwrap_or(GLOBAL_NAMESPACE);
        let count = edge.dynamic.get_mut(key).ok_or_else(no_such)?;
        *count -= 1;
        if *count == 0 {
            edge.dynamic.remove(key);
        }
        if edge.reference_count() > 0 {
            return Ok(false);
        }

        deps.remove(index);
        if let Some(rev) = self.reverse_edges.get_mut(dependency) {
            rev.retain(|d| d != module);
        }
        Ok(true)
    }

    /// 查询依赖边
    pub fn edge(&self, module: &str, dependency: &str) -> Option<&DependencyEdge> {
        self.edges
            .get(module)?
            .iter()
            .find(|e| e.dependency == dependency)
    }

    /// 模块的直接依赖
    pub fn get_dependencies(&self, module: &str) -> Vec<String> {
        self.edges
            .get(module)
            .map(|deps| deps.iter().map(|e| e.dependency.clone()).collect())
            .unwrap_or_default()
    }

    /// 直接依赖该模块的模块
    pub fn get_dependents(&self, module: &str) -> Vec<String> {
        self.reverse_edges.get(module).cloned().unwrap_or_default()
    }

    /// 是否有模块依赖它
    pub fn has_dependents(&self, module: &str) -> bool {
        self.reverse_edges
            .get(module)
            .map(|d| !d.is_empty())
            .unwrap_or(false)
    }

    /// 模块的出边是否仍依赖该命名空间
    pub fn namespace_in_use(&self, module: &str, namespace: &str) -> bool {
        self.edges
            .get(module)
            .map(|deps| deps.iter().any(|e| e.relies_on(namespace)))
            .unwrap_or(false)
    }

    /// 是否存在从 `from` 到 `to` 的依赖路径
    pub fn path_exists(&self, from: &str, to: &str) -> bool {
        let mut stack = vec![from];
        let mut visited = HashSet::new();
        while let Some(node) = stack.pop() {
            if node == to {
                return true;
            }
            if !visited.insert(node) {
                continue;
            }
            if let Some(deps) = self.edges.get(node) {
                stack.extend(deps.iter().map(|e| e.dependency.as_str()));
            }
        }
        false
    }

    /// 检测是否存在循环依赖
    pub fn has_cycle(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// 查找一个循环，返回闭合路径，例如 `["a", "b", "a"]`
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut on_stack = HashSet::new();
        let mut path = Vec::new();

        for node in &self.order {
            if let Some(cycle) = self.find_cycle_from(node, &mut visited, &mut on_stack, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn find_cycle_from<'a>(
        &'a self,
        node: &'a str,
        visited: &mut HashSet<&'a str>,
        on_stack: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        if on_stack.contains(node) {
            let start = path.iter().position(|n| *n == node).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].iter().map(|n| n.to_string()).collect();
            cycle.push(node.to_string());
            return Some(cycle);
        }
        if !visited.insert(node) {
            return None;
        }

        on_stack.insert(node);
        path.push(node);

        if let Some(deps) = self.edges.get(node) {
            for dep in deps {
                if let Some(cycle) = self.find_cycle_from(&dep.dependency, visited, on_stack, path) {
                    return Some(cycle);
                }
            }
        }

        path.pop();
        on_stack.remove(node);
        None
    }

    /// 拓扑排序：依赖在前，无先后约束的模块按插入顺序排列
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        if let Some(cycle) = self.find_cycle() {
            return Err(ModuleError::DependencyCycle(cycle.join(" -> ")));
        }

        let index: HashMap<&str, usize> = self
            .order
            .iter()
            .enumerate()
            .map(|(i, m)| (m.as_str(), i))
            .collect();

        // 入度：模块尚未输出的依赖数
        let mut remaining: Vec<usize> = self
            .order
            .iter()
            .map(|m| self.edges.get(m).map(Vec::len).unwrap_or(0))
            .collect();

        let mut ready: BTreeSet<usize> = remaining
            .iter()
            .enumerate()
            .filter(|(_, n)| **n == 0)
            .map(|(i, _)| i)
            .collect();

        let mut result = Vec::with_capacity(self.order.len());
        while let Some(i) = ready.pop_first() {
            let node = &self.order[i];
            result.push(node.clone());

            for dependent in self.get_dependents(node) {
                if let Some(&j) = index.get(dependent.as_str()) {
                    remaining[j] -= 1;
                    if remaining[j] == 0 {
                        ready.insert(j);
                    }
                }
            }
        }

        if result.len() != self.order.len() {
            return Err(ModuleError::DependencyCycle("无法完成拓扑排序".to_string()));
        }
        Ok(result)
    }

    /// 卸载顺序：依赖者在前
    pub fn unload_order(&self) -> Result<Vec<String>> {
        let mut order = self.topological_sort()?;
        order.reverse();
        Ok(order)
    }

    /// 是否包含模块
    pub fn contains_module(&self, module: &str) -> bool {
        self.edges.contains_key(module)
    }

    /// 模块数量
    pub fn module_count(&self) -> usize {
        self.order.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// 按插入顺序列出所有模块
    pub fn modules(&self) -> &[String] {
        &self.order
    }
}
