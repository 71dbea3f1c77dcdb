//! 模块注册表性能基准测试
//!
//! 使用 Criterion 框架进行性能测试，包括：
//! - 符号解析基准
//! - 加载集批量提交基准
//! - 版本解析基准

use std::sync::Arc;

use chips_modules::{
    ExportRegistry, LoadCallbacks, ModuleDescriptor, ModuleRegistry, SymbolExport, Version,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

// ============================================================================
// 辅助函数
// ============================================================================

fn registry() -> ModuleRegistry {
    ModuleRegistry::builder()
        .exports(Arc::new(ExportRegistry::new()))
        .build()
        .unwrap()
}

/// 生成一条长度为 `count` 的依赖链，每个模块导出一个符号
fn chain(count: usize) -> Vec<Arc<ModuleDescriptor>> {
    (0..count)
        .map(|i| {
            let mut builder = ModuleDescriptor::builder(format!("m{}", i), Version::new(1, 0, 0))
                .export(SymbolExport::value("bench", format!("s{}", i), Version::new(1, 0, 0), i as u64));
            if i > 0 {
                builder = builder.dependency(format!("m{}", i - 1), Version::new(1, 0, 0));
            }
            builder.build().unwrap()
        })
        .collect()
}

fn load_all(registry: &ModuleRegistry, descriptors: &[Arc<ModuleDescriptor>]) {
    let set = registry.set_new();
    // 倒序暂存，让拓扑排序真正起作用
    for descriptor in descriptors.iter().rev() {
        set.append_module(Arc::clone(descriptor), LoadCallbacks::new()).unwrap();
    }
    set.finish().unwrap();
}

// ============================================================================
// 符号解析基准测试
// ============================================================================

fn symbol_resolve_benchmark(c: &mut Criterion) {
    let registry = registry();
    load_all(&registry, &chain(64));
    let host = registry.pseudo_module_new().unwrap();
    registry.namespace_include(&host, "bench").unwrap();
    let required = Version::new(1, 0, 0);

    c.bench_function("symbol_resolve", |b| {
        b.iter(|| {
            let symbol = registry
                .load_symbol::<u64>(&host, "bench", black_box("s42"), &required)
                .unwrap();
            black_box(*symbol)
        })
    });

    c.bench_function("find_by_symbol", |b| {
        b.iter(|| black_box(registry.find_by_symbol("bench", black_box("s7"), &required).unwrap()))
    });
}

// ============================================================================
// 加载集基准测试
// ============================================================================

fn loading_set_finish_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("loading_set_finish");

    for size in [8usize, 64, 256] {
        let descriptors = chain(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &descriptors, |b, descriptors| {
            b.iter(|| {
                let registry = registry();
                load_all(&registry, descriptors);
                black_box(registry.len())
            })
        });
    }

    group.finish();
}

// ============================================================================
// 版本解析基准测试
// ============================================================================

fn version_parse_benchmark(c: &mut Criterion) {
    c.bench_function("version_parse", |b| {
        b.iter(|| black_box(Version::parse(black_box("12.345.6789+42")).unwrap()))
    });
}

criterion_group!(
    name = registry_benches;
    config = Criterion::default().sample_size(100);
    targets = symbol_resolve_benchmark, version_parse_benchmark
);

criterion_group!(
    name = loading_benches;
    config = Criterion::default().sample_size(30);
    targets = loading_set_finish_benchmark
);

criterion_main!(registry_benches, loading_benches);
