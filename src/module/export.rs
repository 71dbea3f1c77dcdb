//! 导出注册表
//!
//! 枚举所有可加载的模块描述符：先遍历静态导出区，再遍历动态注册的描述符。
//!
//! 静态导出区在进程启动时通过 [`seal_static_exports`] 一次性声明，之后只读；
//! 其中的 `None` 条目是占位，遍历时跳过但不会终止遍历。

use std::ops::ControlFlow;
use std::sync::Arc;

use once_cell::sync::{Lazy, OnceCell};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::module::descriptor::ModuleDescriptor;
use crate::utils::{ModuleError, Result};

/// 静态导出区条目，`None` 为占位
pub type StaticExport = Option<Arc<ModuleDescriptor>>;

static STATIC_REGION: OnceCell<Vec<StaticExport>> = OnceCell::new();

static GLOBAL_EXPORTS: Lazy<Arc<ExportRegistry>> = Lazy::new(|| {
    let region = STATIC_REGION.get_or_init(Vec::new).clone();
    Arc::new(ExportRegistry::with_static_region(region))
});

/// 声明进程级静态导出区
///
/// 只能调用一次，且必须早于第一次访问 [`ExportRegistry::global`]。
pub fn seal_static_exports<I>(region: I) -> Result<()>
where
    I: IntoIterator<Item = StaticExport>,
{
    let region: Vec<StaticExport> = region.into_iter().collect();
    let count = region.iter().filter(|e| e.is_some()).count();
    STATIC_REGION
        .set(region)
        .map_err(|_| ModuleError::InvalidArgument("静态导出区已封存，不能重复声明".to_string()))?;
    info!(count = count, "静态导出区已封存");
    Ok(())
}

/// 导出注册表
#[derive(Debug, Default)]
pub struct ExportRegistry {
    static_exports: Vec<StaticExport>,
    dynamic_exports: RwLock<Vec<Arc<ModuleDescriptor>>>,
}

impl ExportRegistry {
    /// 创建空的导出注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 以给定的静态导出区创建
    pub fn with_static_region<I>(region: I) -> Self
    where
        I: IntoIterator<Item = StaticExport>,
    {
        Self {
            static_exports: region.into_iter().collect(),
            dynamic_exports: RwLock::new(Vec::new()),
        }
    }

    /// 进程级导出注册表
    pub fn global() -> Arc<ExportRegistry> {
        Arc::clone(&GLOBAL_EXPORTS)
    }

    /// 动态注册描述符
    pub fn register(&self, descriptor: Arc<ModuleDescriptor>) {
        debug!(module = %descriptor.name(), "动态注册模块导出");
        self.dynamic_exports.write().push(descriptor);
    }

    /// 按注册顺序遍历描述符，访问者返回 `ControlFlow::Break` 时提前结束
    ///
    /// 遍历期间持有动态列表的读锁，访问者不应再调用 [`ExportRegistry::register`]。
    pub fn iterate<F>(&self, mut visitor: F)
    where
        F: FnMut(&Arc<ModuleDescriptor>) -> ControlFlow<()>,
    {
        for descriptor in self.static_exports.iter().flatten() {
            if visitor(descriptor).is_break() {
                return;
            }
        }
        for descriptor in self.dynamic_exports.read().iter() {
            if visitor(descriptor).is_break() {
                return;
            }
        }
    }

    /// 所有描述符的快照
    pub fn snapshot(&self) -> Vec<Arc<ModuleDescriptor>> {
        let mut all = Vec::with_capacity(self.len());
        self.iterate(|d| {
            all.push(Arc::clone(d));
            ControlFlow::Continue(())
        });
        all
    }

    /// 按名称查找第一个匹配的描述符
    pub fn find(&self, name: &str) -> Option<Arc<ModuleDescriptor>> {
        let mut found = None;
        self.iterate(|d| {
            if d.name() == name {
                found = Some(Arc::clone(d));
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        found
    }

    /// 描述符数量（不含占位）
    pub fn len(&self) -> usize {
        self.static_exports.iter().flatten().count() + self.dynamic_exports.read().len()
    }

    /// 是否没有任何描述符
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::Version;

    fn descriptor(name: &str) -> Arc<ModuleDescriptor> {
        ModuleDescriptor::builder(name, Version::new(1, 0, 0))
            .build()
            .unwrap()
    }

    #[test]
    fn test_iterate_skips_padding() {
        let registry = ExportRegistry::with_static_region(vec![
            None,
            Some(descriptor("a")),
            None,
            None,
            Some(descriptor("b")),
            None,
        ]);
        registry.register(descriptor("c"));

        let mut names = Vec::new();
        registry.iterate(|d| {
            names.push(d.name().to_string());
            ControlFlow::Continue(())
        });

        assert_eq!(names, vec!["a", "b", "c"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_iterate_early_stop() {
        let registry = ExportRegistry::with_static_region(vec![
            Some(descriptor("a")),
            None,
            Some(descriptor("b")),
        ]);
        registry.register(descriptor("c"));

        let mut visited = 0;
        registry.iterate(|d| {
            visited += 1;
            if d.name() == "b" {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });
        assert_eq!(visited, 2);
    }

    #[test]
    fn test_empty_region() {
        let registry = ExportRegistry::with_static_region(vec![None, None]);
        let mut visited = 0;
        registry.iterate(|_| {
            visited += 1;
            ControlFlow::Continue(())
        });
        assert_eq!(visited, 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_find_and_snapshot() {
        let registry = ExportRegistry::new();
        registry.register(descriptor("x"));
        registry.register(descriptor("y"));

        assert_eq!(registry.find("y").unwrap().name(), "y");
        assert!(registry.find("z").is_none());
        assert_eq!(registry.snapshot().len(), 2);
    }
}
