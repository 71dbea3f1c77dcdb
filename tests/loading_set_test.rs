//! 加载集集成测试
//!
//! 测试依赖解析、批量提交与失败回滚的完整流程

use std::sync::Arc;

use chips_modules::{
    ExportRegistry, FilterRequest, LoadCallbacks, ModuleDescriptor, ModuleError,
    ModuleRegistry, ParameterDecl, RegistryConfig, SetState, SymbolExport, SymbolImport, Version,
};
use parking_lot::Mutex;

type EventLog = Arc<Mutex<Vec<String>>>;

fn registry() -> ModuleRegistry {
    ModuleRegistry::builder()
        .exports(Arc::new(ExportRegistry::new()))
        .build()
        .unwrap()
}

fn v(major: u32, minor: u32, patch: u32) -> Version {
    Version::new(major, minor, patch)
}

/// 记录三种回调的触发顺序
fn tracked(log: &EventLog) -> LoadCallbacks {
    let (success, error, cleanup) = (log.clone(), log.clone(), log.clone());
    LoadCallbacks::new()
        .on_success(move |info| success.lock().push(format!("success:{}", info.name())))
        .on_error(move |d, _| error.lock().push(format!("error:{}", d.name())))
        .on_cleanup(move |d| cleanup.lock().push(format!("cleanup:{}", d.name())))
}

/// 带构造/析构记录的描述符构建器
fn hooked(name: &str, log: &EventLog) -> chips_modules::ModuleDescriptorBuilder {
    let (construct, destroy) = (log.clone(), log.clone());
    ModuleDescriptor::builder(name, v(1, 0, 0))
        .on_construct(move |m| {
            construct.lock().push(format!("construct:{}", m.name()));
            Ok(())
        })
        .on_destroy(move |m| destroy.lock().push(format!("destroy:{}", m.name())))
}

// ============================================================================
// 提交
// ============================================================================

/// 依赖先于依赖者实例化，on_success 在整体提交后按实例化顺序触发
#[test]
fn test_finish_orders_by_dependency() {
    let registry = registry();
    let log: EventLog = Arc::default();

    let set = registry.set_new();
    set.append_module(
        hooked("app", &log).dependency("storage", v(1, 0, 0)).build().unwrap(),
        tracked(&log),
    )
    .unwrap();
    set.append_module(
        hooked("storage", &log).dependency("logger", v(1, 0, 0)).build().unwrap(),
        tracked(&log),
    )
    .unwrap();
    set.append_module(hooked("logger", &log).build().unwrap(), tracked(&log))
        .unwrap();

    set.finish().unwrap();
    assert_eq!(set.state(), SetState::Committed);

    assert_eq!(
        *log.lock(),
        vec![
            "construct:logger",
            "construct:storage",
            "construct:app",
            "success:logger",
            "success:storage",
            "success:app",
        ]
    );
    assert_eq!(registry.dependencies_of("app").unwrap(), vec!["storage"]);
    assert_eq!(registry.dependents_of("logger").unwrap(), vec!["storage"]);
}

/// 依赖已加载模块时在新的加载集中解析
#[test]
fn test_finish_against_loaded_modules() {
    let registry = registry();

    let first = registry.set_new();
    first
        .append_module(
            ModuleDescriptor::builder("base", v(1, 4, 0)).build().unwrap(),
            LoadCallbacks::new(),
        )
        .unwrap();
    first.finish().unwrap();

    let second = registry.set_new();
    second
        .append_module(
            ModuleDescriptor::builder("plugin", v(0, 1, 0))
                .dependency("base", v(1, 2, 0))
                .build()
                .unwrap(),
            LoadCallbacks::new(),
        )
        .unwrap();
    second.finish().unwrap();

    let base = registry.find_by_name("base").unwrap();
    let err = registry.unload(&base).unwrap_err();
    assert!(err.is_still_referenced());
}

/// 导入同批模块的符号时，提供者成为隐式静态依赖
#[test]
fn test_import_from_staged_provider() {
    let registry = registry();
    let set = registry.set_new();

    set.append_module(
        ModuleDescriptor::builder("consumer", v(1, 0, 0))
            .namespace("codec")
            .import(SymbolImport::new("codec", "encode", v(2, 0, 0)))
            .build()
            .unwrap(),
        LoadCallbacks::new(),
    )
    .unwrap();
    set.append_module(
        ModuleDescriptor::builder("provider", v(1, 0, 0))
            .export(SymbolExport::value("codec", "encode", v(2, 3, 0), "base64".to_string()))
            .build()
            .unwrap(),
        LoadCallbacks::new(),
    )
    .unwrap();

    assert!(set.has_symbol("codec", "encode", &v(2, 1, 0)));
    assert!(!set.has_symbol("codec", "encode", &v(3, 0, 0)));

    set.finish().unwrap();
    assert_eq!(registry.dependencies_of("consumer").unwrap(), vec!["provider"]);
    assert_eq!(
        registry
            .find_by_symbol("codec", "encode", &v(2, 0, 0))
            .unwrap()
            .name(),
        "provider"
    );
}

/// 动态导出在构造钩子之后生成，可以读取模块自身参数
#[test]
fn test_dynamic_export_sees_constructed_module() {
    let registry = registry();
    let set = registry.set_new();

    set.append_module(
        ModuleDescriptor::builder("pool", v(1, 0, 0))
            .parameter(ParameterDecl::new("size", 4u32))
            .on_construct(|m| {
                m.param_set("size", 16u32)?;
                Ok(())
            })
            .export(SymbolExport::dynamic("", "pool_size", v(1, 0, 0), |m| {
                let size = u32::try_from(m.param_get("size")?)?;
                Ok(size)
            }))
            .build()
            .unwrap(),
        LoadCallbacks::new(),
    )
    .unwrap();
    set.finish().unwrap();

    let host = registry.pseudo_module_new().unwrap();
    let size = host
        .load_symbol::<u32>("", "pool_size", &v(1, 0, 0))
        .unwrap();
    assert_eq!(*size, 16);
}

// ============================================================================
// 失败与回滚
// ============================================================================

/// 依赖环导致整批失败，注册表不变
#[test]
fn test_cycle_rejects_whole_batch() {
    let registry = registry();
    let log: EventLog = Arc::default();

    let set = registry.set_new();
    set.append_module(
        hooked("alpha", &log).dependency("beta", v(1, 0, 0)).build().unwrap(),
        tracked(&log),
    )
    .unwrap();
    set.append_module(
        hooked("beta", &log).dependency("alpha", v(1, 0, 0)).build().unwrap(),
        tracked(&log),
    )
    .unwrap();

    let err = set.finish().unwrap_err();
    assert!(matches!(err, ModuleError::DependencyCycle(ref path) if path == "alpha -> beta -> alpha"));
    assert_eq!(set.state(), SetState::Dismissed);
    assert!(registry.is_empty());
    assert_eq!(*log.lock(), vec!["error:alpha", "cleanup:beta"]);
}

/// 后一个模块构造失败时，已实例化的模块按相反顺序析构
#[test]
fn test_constructor_failure_rolls_back() {
    let registry = registry();
    let log: EventLog = Arc::default();

    let set = registry.set_new();
    set.append_module(
        hooked("first", &log)
            .export(SymbolExport::value("", "token", v(1, 0, 0), 1u64))
            .build()
            .unwrap(),
        tracked(&log),
    )
    .unwrap();

    let failing = log.clone();
    set.append_module(
        ModuleDescriptor::builder("second", v(1, 0, 0))
            .dependency("first", v(1, 0, 0))
            .on_construct(move |m| {
                failing.lock().push(format!("construct:{}", m.name()));
                anyhow::bail!("资源不可用")
            })
            .build()
            .unwrap(),
        tracked(&log),
    )
    .unwrap();

    let err = set.finish().unwrap_err();
    assert!(matches!(err, ModuleError::ConstructorFailed { ref module, .. } if module == "second"));

    assert_eq!(
        *log.lock(),
        vec![
            "construct:first",
            "construct:second",
            "destroy:first",
            "error:second",
            "cleanup:first",
        ]
    );
    assert!(registry.is_empty());
    assert!(registry.symbols().is_empty());
}

/// 版本不兼容的已加载依赖
#[test]
fn test_version_mismatch_with_loaded_module() {
    let registry = registry();
    let set = registry.set_new();
    set.append_module(
        ModuleDescriptor::builder("engine", v(0, 3, 0)).build().unwrap(),
        LoadCallbacks::new(),
    )
    .unwrap();
    set.finish().unwrap();

    let set = registry.set_new();
    set.append_module(
        ModuleDescriptor::builder("game", v(1, 0, 0))
            .dependency("engine", v(0, 2, 0))
            .build()
            .unwrap(),
        LoadCallbacks::new(),
    )
    .unwrap();

    let err = set.finish().unwrap_err();
    assert!(matches!(err, ModuleError::VersionMismatch { .. }));
    assert!(!registry.contains("game"));
}

/// 缺失依赖与缺失命名空间
#[test]
fn test_unresolved_requirements() {
    let registry = registry();

    let set = registry.set_new();
    set.append_module(
        ModuleDescriptor::builder("orphan", v(1, 0, 0))
            .dependency("ghost", v(1, 0, 0))
            .build()
            .unwrap(),
        LoadCallbacks::new(),
    )
    .unwrap();
    assert!(matches!(
        set.finish().unwrap_err(),
        ModuleError::UnresolvedDependency { ref dependency, .. } if dependency == "ghost"
    ));

    let set = registry.set_new();
    set.append_module(
        ModuleDescriptor::builder("reader", v(1, 0, 0))
            .namespace("fs")
            .build()
            .unwrap(),
        LoadCallbacks::new(),
    )
    .unwrap();
    assert!(matches!(
        set.finish().unwrap_err(),
        ModuleError::NamespaceNotFound(ref ns) if ns == "fs"
    ));
}

/// 导出与已加载模块冲突
#[test]
fn test_symbol_conflict() {
    let registry = registry();
    let export = || SymbolExport::value("net", "connect", v(1, 0, 0), 0u8);

    let set = registry.set_new();
    set.append_module(
        ModuleDescriptor::builder("tcp", v(1, 0, 0)).export(export()).build().unwrap(),
        LoadCallbacks::new(),
    )
    .unwrap();
    set.finish().unwrap();

    let set = registry.set_new();
    set.append_module(
        ModuleDescriptor::builder("udp", v(1, 0, 0)).export(export()).build().unwrap(),
        LoadCallbacks::new(),
    )
    .unwrap();
    let err = set.finish().unwrap_err();
    assert!(matches!(err, ModuleError::SymbolConflict { ref owner, .. } if owner == "tcp"));
}

/// 已加载的模块不能再次暂存
#[test]
fn test_append_rejects_loaded_name() {
    let registry = registry();
    let set = registry.set_new();
    set.append_module(
        ModuleDescriptor::builder("once", v(1, 0, 0)).build().unwrap(),
        LoadCallbacks::new(),
    )
    .unwrap();
    set.finish().unwrap();

    let log: EventLog = Arc::default();
    let again = registry.set_new();
    let err = again
        .append_module(
            ModuleDescriptor::builder("once", v(1, 0, 0)).build().unwrap(),
            tracked(&log),
        )
        .unwrap_err();
    assert!(matches!(err, ModuleError::DuplicateModule(_)));
    assert_eq!(*log.lock(), vec!["cleanup:once"]);
    assert!(again.is_empty());
}

/// 放弃加载集
#[test]
fn test_dismiss() {
    let registry = registry();
    let log: EventLog = Arc::default();

    let set = registry.set_new();
    set.append_module(
        ModuleDescriptor::builder("unused", v(1, 0, 0)).build().unwrap(),
        tracked(&log),
    )
    .unwrap();
    set.dismiss().unwrap();

    assert_eq!(set.state(), SetState::Dismissed);
    assert_eq!(*log.lock(), vec!["cleanup:unused"]);
    assert!(matches!(
        set.append_module(
            ModuleDescriptor::builder("late", v(1, 0, 0)).build().unwrap(),
            LoadCallbacks::new(),
        ),
        Err(ModuleError::InvalidSetState { .. })
    ));
}

// ============================================================================
// 导出注册表
// ============================================================================

/// 从导出注册表暂存，并按过滤器跳过
#[test]
fn test_append_exports_with_filter() {
    let exports = Arc::new(ExportRegistry::with_static_region(vec![
        Some(ModuleDescriptor::builder("core", v(1, 0, 0)).build().unwrap()),
        None,
        Some(ModuleDescriptor::builder("debug", v(1, 0, 0)).build().unwrap()),
    ]));
    exports.register(ModuleDescriptor::builder("extra", v(1, 0, 0)).build().unwrap());

    let registry = ModuleRegistry::builder().exports(exports).build().unwrap();
    let set = registry.set_new();
    let staged = set
        .append_exports(
            |d| {
                if d.name() == "debug" {
                    FilterRequest::Skip
                } else {
                    FilterRequest::Load
                }
            },
            LoadCallbacks::new(),
        )
        .unwrap();

    assert_eq!(staged, 2);
    assert_eq!(set.staged_names(), vec!["core", "extra"]);
    set.finish().unwrap();
    assert_eq!(registry.len(), 2);
}

/// 默认过滤器遵循加载配置
#[test]
fn test_append_configured_exports() {
    let exports = Arc::new(ExportRegistry::new());
    for name in ["audio", "video", "telemetry"] {
        exports.register(ModuleDescriptor::builder(name, v(1, 0, 0)).build().unwrap());
    }

    let config = RegistryConfig::builder().skip("telemetry").build();
    let registry = ModuleRegistry::builder()
        .exports(exports)
        .config(config)
        .build()
        .unwrap();

    let set = registry.set_new();
    assert_eq!(set.append_configured_exports(LoadCallbacks::new()).unwrap(), 2);
    assert!(set.has_module("audio"));
    assert!(!set.has_module("telemetry"));
}

// ============================================================================
// 追加回调与子模块
// ============================================================================

/// 追加的回调与暂存时的回调按顺序一起触发
#[test]
fn test_append_callback_runs_alongside_original() {
    let registry = registry();
    let log: EventLog = Arc::default();
    let extra: EventLog = Arc::default();

    let set = registry.set_new();
    set.append_module(hooked("storage", &log).build().unwrap(), tracked(&log))
        .unwrap();
    set.append_callback("storage", tracked(&extra)).unwrap();

    assert!(set
        .append_callback("missing", LoadCallbacks::new())
        .unwrap_err()
        .is_not_found());

    set.finish().unwrap();
    assert_eq!(*log.lock(), vec!["construct:storage", "success:storage"]);
    assert_eq!(*extra.lock(), vec!["success:storage"]);

    // 提交后不能再追加
    assert!(matches!(
        set.append_callback("storage", LoadCallbacks::new()),
        Err(ModuleError::InvalidSetState { .. })
    ));
}

/// 失败或放弃时追加的回调同样收到 on_error / on_cleanup
#[test]
fn test_append_callback_on_failure() {
    let registry = registry();
    let extra: EventLog = Arc::default();

    let set = registry.set_new();
    set.append_module(
        ModuleDescriptor::builder("app", v(1, 0, 0))
            .dependency("absent", v(1, 0, 0))
            .build()
            .unwrap(),
        LoadCallbacks::new(),
    )
    .unwrap();
    set.append_module(ModuleDescriptor::builder("tool", v(1, 0, 0)).build().unwrap(), LoadCallbacks::new())
        .unwrap();
    set.append_callback("app", tracked(&extra)).unwrap();
    set.append_callback("tool", tracked(&extra)).unwrap();

    assert!(matches!(
        set.finish(),
        Err(ModuleError::UnresolvedDependency { .. })
    ));
    assert_eq!(*extra.lock(), vec!["error:app", "cleanup:tool"]);

    let dismissed: EventLog = Arc::default();
    let set = registry.set_new();
    set.append_module(ModuleDescriptor::builder("tool", v(1, 0, 0)).build().unwrap(), LoadCallbacks::new())
        .unwrap();
    set.append_callback("tool", tracked(&dismissed)).unwrap();
    drop(set);
    assert_eq!(*dismissed.lock(), vec!["cleanup:tool"]);
}

/// 子模块对所有者建立静态依赖，所有者在子模块卸载前无法销毁
#[test]
fn test_append_owned_links_child_to_owner() {
    let registry = registry();
    let log: EventLog = Arc::default();
    let owner = registry.pseudo_module_new().unwrap();

    let set = registry.set_new();
    set.append_owned(&owner, hooked("plugin", &log).build().unwrap(), tracked(&log))
        .unwrap();
    set.finish().unwrap();

    assert_eq!(*log.lock(), vec!["construct:plugin", "success:plugin"]);
    assert_eq!(
        registry.dependencies_of("plugin").unwrap(),
        vec![owner.name().to_string()]
    );
    assert!(registry.pseudo_module_destroy(&owner).unwrap_err().is_still_referenced());

    let plugin = registry.find_by_name("plugin").unwrap();
    registry.unload(&plugin).unwrap();
    drop(plugin);
    registry.pseudo_module_destroy(&owner).unwrap();
}

/// 暂存期间加载集持有所有者的句柄，所有者无法卸载
#[test]
fn test_owner_pinned_while_child_staged() {
    let registry = registry();
    let pending = Arc::new(registry.set_new());
    let stager = Arc::clone(&pending);

    let set = registry.set_new();
    set.append_module(
        ModuleDescriptor::builder("host", v(1, 0, 0))
            .on_construct(move |m| {
                stager.append_owned(
                    m,
                    ModuleDescriptor::builder("guest", v(1, 0, 0)).build()?,
                    LoadCallbacks::new(),
                )?;
                Ok(())
            })
            .build()
            .unwrap(),
        LoadCallbacks::new(),
    )
    .unwrap();
    set.finish().unwrap();
    assert!(pending.has_module("guest"));

    let host = registry.find_by_name("host").unwrap();
    assert!(registry.unload(&host).unwrap_err().is_still_referenced());

    pending.finish().unwrap();
    assert_eq!(registry.dependencies_of("guest").unwrap(), vec!["host"]);
    assert_eq!(registry.dependents_of("host").unwrap(), vec!["guest"]);

    // 提交后由静态依赖阻止卸载
    assert!(registry.unload(&host).unwrap_err().is_still_referenced());
    let guest = registry.find_by_name("guest").unwrap();
    registry.unload(&guest).unwrap();
    registry.unload(&host).unwrap();
}

/// 外部注册表的模块或已销毁的模块不能作为所有者
#[test]
fn test_append_owned_rejects_dead_owner() {
    let other = registry();
    let registry = registry();
    let log: EventLog = Arc::default();

    let stranger = other.pseudo_module_new().unwrap();
    let set = registry.set_new();
    assert!(matches!(
        set.append_owned(&stranger, ModuleDescriptor::builder("a", v(1, 0, 0)).build().unwrap(), tracked(&log)),
        Err(ModuleError::InvalidArgument(_))
    ));
    assert_eq!(*log.lock(), vec!["cleanup:a"]);
    assert!(set.is_empty());

    // 暂存后所有者被销毁，提交时报告所有者失效
    log.lock().clear();
    let owner = registry.pseudo_module_new().unwrap();
    set.append_owned(&owner, ModuleDescriptor::builder("b", v(1, 0, 0)).build().unwrap(), tracked(&log))
        .unwrap();
    registry.pseudo_module_destroy(&owner).unwrap();

    assert!(matches!(set.finish(), Err(ModuleError::InvalidArgument(_))));
    assert_eq!(*log.lock(), vec!["error:b"]);
    assert!(registry.is_empty());
}
