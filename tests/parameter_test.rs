//! 模块参数集成测试
//!
//! 覆盖三级访问控制、类型检查与参数查询

use std::sync::Arc;

use chips_modules::{
    DependencyRequest, ExportRegistry, LoadCallbacks, ModuleDescriptor, ModuleError,
    ModuleRegistry, ParameterAccess, ParameterDecl, ParameterInfo, ParameterType, ParameterValue,
    Version,
};

fn registry() -> ModuleRegistry {
    ModuleRegistry::builder()
        .exports(Arc::new(ExportRegistry::new()))
        .build()
        .unwrap()
}

fn load(registry: &ModuleRegistry, descriptor: Arc<ModuleDescriptor>) {
    let set = registry.set_new();
    set.append_module(descriptor, LoadCallbacks::new()).unwrap();
    set.finish().unwrap();
}

/// 缓存模块：容量公开，淘汰阈值只对依赖方开放，密钥私有
fn cache() -> Arc<ModuleDescriptor> {
    ModuleDescriptor::builder("cache", Version::new(2, 1, 0))
        .parameter(
            ParameterDecl::new("capacity", 1024u32)
                .read(ParameterAccess::Public)
                .write(ParameterAccess::Public),
        )
        .parameter(
            ParameterDecl::new("threshold", -5i16)
                .read(ParameterAccess::Dependency)
                .write(ParameterAccess::Dependency),
        )
        .parameter(
            ParameterDecl::new("seed", 7u64)
                .read(ParameterAccess::Dependency)
                .write(ParameterAccess::Private),
        )
        .build()
        .unwrap()
}

#[test]
fn test_param_query() {
    let registry = registry();
    load(&registry, cache());

    assert_eq!(
        registry.param_query("cache", "threshold").unwrap(),
        ParameterInfo {
            ty: ParameterType::I16,
            read: ParameterAccess::Dependency,
            write: ParameterAccess::Dependency,
        }
    );
    assert!(registry.param_query("cache", "missing").unwrap_err().is_not_found());
    assert!(registry.param_query("missing", "capacity").unwrap_err().is_not_found());
}

#[test]
fn test_public_access() {
    let registry = registry();
    load(&registry, cache());

    assert_eq!(
        registry.param_get_public("cache", "capacity").unwrap(),
        ParameterValue::U32(1024)
    );
    registry.param_set_public("cache", "capacity", 4096u32).unwrap();
    assert_eq!(
        u32::try_from(registry.param_get_public("cache", "capacity").unwrap()).unwrap(),
        4096
    );

    // 依赖级别的参数对公开调用方不可见
    assert!(registry
        .param_get_public("cache", "threshold")
        .unwrap_err()
        .is_access_denied());
    assert!(registry
        .param_set_public("cache", "threshold", 3i16)
        .unwrap_err()
        .is_access_denied());
}

#[test]
fn test_dependency_access_requires_edge() {
    let registry = registry();
    load(&registry, cache());
    let host = registry.pseudo_module_new().unwrap();
    let cache = registry.find_by_name("cache").unwrap();

    assert!(registry
        .param_get_dependency(&host, "cache", "threshold")
        .unwrap_err()
        .is_access_denied());

    registry
        .acquire_dependency(&host, &cache, &DependencyRequest::new())
        .unwrap();

    assert_eq!(
        registry.param_get_dependency(&host, "cache", "threshold").unwrap(),
        ParameterValue::I16(-5)
    );
    registry
        .param_set_dependency(&host, "cache", "threshold", -9i16)
        .unwrap();
    assert_eq!(
        registry.param_get_dependency(&host, "cache", "threshold").unwrap(),
        ParameterValue::I16(-9)
    );

    // 依赖级别可以读 seed 但不能写
    assert_eq!(
        registry.param_get_dependency(&host, "cache", "seed").unwrap(),
        ParameterValue::U64(7)
    );
    assert!(registry
        .param_set_dependency(&host, "cache", "seed", 8u64)
        .unwrap_err()
        .is_access_denied());

    // 公开级别的参数同样可以通过依赖接口访问
    assert!(registry.param_get_dependency(&host, "cache", "capacity").is_ok());

    registry
        .relinquish_dependency(&host, &cache, &DependencyRequest::new())
        .unwrap();
    assert!(registry
        .param_get_dependency(&host, "cache", "threshold")
        .unwrap_err()
        .is_access_denied());
}

#[test]
fn test_private_access_from_owner() {
    let registry = registry();
    let observed: Arc<parking_lot::Mutex<Option<ParameterValue>>> = Arc::default();
    let slot = Arc::clone(&observed);

    load(
        &registry,
        ModuleDescriptor::builder("counter", Version::new(1, 0, 0))
            .parameter(ParameterDecl::new("ticks", 0u8))
            .on_construct(move |m| {
                m.param_set("ticks", 3u8)?;
                let registry = m.registry()?;
                registry.param_set_private(m, "ticks", 4u8)?;
                *slot.lock() = Some(registry.param_get_private(m, "ticks")?);
                Ok(())
            })
            .build()
            .unwrap(),
    );

    assert_eq!(*observed.lock(), Some(ParameterValue::U8(4)));

    // 私有参数对外完全不可见
    assert!(registry
        .param_get_public("counter", "ticks")
        .unwrap_err()
        .is_access_denied());
}

#[test]
fn test_private_access_rejects_foreign_caller() {
    let registry = registry();
    let other = ModuleRegistry::builder()
        .exports(Arc::new(ExportRegistry::new()))
        .build()
        .unwrap();
    let stranger = other.pseudo_module_new().unwrap();

    assert!(matches!(
        registry.param_get_private(&stranger, "ticks"),
        Err(ModuleError::InvalidArgument(_))
    ));
}

#[test]
fn test_type_mismatch_keeps_value() {
    let registry = registry();
    load(&registry, cache());

    assert!(matches!(
        registry.param_set_public("cache", "capacity", 12i64),
        Err(ModuleError::TypeMismatch { .. })
    ));
    assert_eq!(
        registry.param_get_public("cache", "capacity").unwrap(),
        ParameterValue::U32(1024)
    );
}

#[test]
fn test_parameters_vanish_with_module() {
    let registry = registry();
    load(&registry, cache());

    let info = registry.find_by_name("cache").unwrap();
    registry.unload(&info).unwrap();
    assert!(registry
        .param_get_public("cache", "capacity")
        .unwrap_err()
        .is_not_found());
}
