//! Benchmark for qualified-name parsing and bundle resolution.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use ns_modules::modules::{ModuleSpec, ResourceKind, VersionToken};
use ns_modules::{HeadDocument, LoaderConfig, ModuleLoader};

const NAMES: &[&str] = &[
    "mathUtils",
    "pluginA:mathUtils@1.2.3",
    "core-assets/a:@orgx/b@1.1.1",
    "jquery@any|1.2.x|2.1.4",
];

fn benchmark_version_parse(c: &mut Criterion) {
    c.bench_function("VersionToken parse", |b| {
        b.iter(|| black_box(VersionToken::parse(black_box("1.2.3-beta.1"))));
    });
}

fn benchmark_spec_parse(c: &mut Criterion) {
    c.bench_function("ModuleSpec parse", |b| {
        b.iter(|| {
            for name in NAMES {
                black_box(ModuleSpec::parse(black_box(name)));
            }
        });
    });
}

fn benchmark_bundle_resolution(c: &mut Criterion) {
    let specs: Vec<ModuleSpec> = NAMES.iter().map(|name| ModuleSpec::parse(name)).collect();

    c.bench_function("Bundle file name prefix", |b| {
        b.iter(|| {
            for spec in &specs {
                black_box(spec.load_bundle_file_name_prefix());
            }
        });
    });
}

fn benchmark_module_source(c: &mut Criterion) {
    let page = HeadDocument::new()
        .with_attribute("data-rooturl", "/jenkins")
        .with_attribute("data-adjuncturl", "/jenkins/adjuncts/xxx");
    let loader = ModuleLoader::new(LoaderConfig::default(), Arc::new(page));

    c.bench_function("Module source URL", |b| {
        b.iter(|| {
            let mut spec = ModuleSpec::parse("plugin/pluginA:mathUtils@1.2.3");
            black_box(loader.module_source(&mut spec, ResourceKind::Js).unwrap())
        });
    });
}

criterion_group!(
    benches,
    benchmark_version_parse,
    benchmark_spec_parse,
    benchmark_bundle_resolution,
    benchmark_module_source
);
criterion_main!(benches);
