//! Segment runtime benchmarks.
//!
//! Run with: cargo bench --bench segment_bench

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use cpseg_runtime::constant::{ConstantEntryRef, ConstantPoolSkeleton, ConstantTag, CpIndex, ParameterKind};
use cpseg_runtime::layout::LayoutPlan;
use cpseg_runtime::{ClassMetadata, ManagedHeap, SegmentConfig, SegmentHandle, SegmentNumber, SegmentResolver};

/// A pool with `params` class parameters, each with `derived` call sites
/// chained two deep, interleaved with plain constants.
fn wide_pool(params: usize, derived: usize) -> ConstantPoolSkeleton {
    let mut pool = ConstantPoolSkeleton::new();
    for _ in 0..params {
        pool.push_plain(ConstantTag::Utf8);
        let p = pool.push_parameter(ParameterKind::ClassOnly, None);
        for _ in 0..derived {
            let site = pool.push_derived(ConstantTag::Linkage, p);
            pool.push_derived(ConstantTag::InvokeDynamic, site);
        }
    }
    pool
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("resolve");

    for params in [1, 8, 64] {
        let pool = wide_pool(params, 16);
        group.throughput(Throughput::Elements(pool.len() as u64));
        group.bench_with_input(BenchmarkId::new("pool", params), &pool, |b, pool| {
            b.iter(|| black_box(SegmentResolver::resolve(pool).unwrap()))
        });
    }

    group.finish();
}

fn bench_layout(c: &mut Criterion) {
    let mut group = c.benchmark_group("layout");

    for members in [4usize, 32, 256] {
        let mut refs = vec![ConstantEntryRef::new(1, ConstantTag::Parameter)];
        refs.extend((0..members).map(|i| ConstantEntryRef::new((members - i + 1) as CpIndex, ConstantTag::Linkage)));
        group.bench_with_input(BenchmarkId::new("compute", members), &refs, |b, refs| {
            b.iter(|| black_box(LayoutPlan::compute(refs, ParameterKind::ClassOnly).unwrap()))
        });
    }

    group.finish();
}

fn bench_instances(c: &mut Criterion) {
    let mut group = c.benchmark_group("instances");
    let pool = wide_pool(1, 8);
    let config = SegmentConfig::default();

    group.bench_function("new_class_segment", |b| {
        let heap = Arc::new(ManagedHeap::new(0));
        let class = ClassMetadata::define("Bench", &pool, Arc::clone(&heap), &config).unwrap();
        let shape = class.shape(SegmentNumber::FIRST).unwrap();
        let binding = heap.allocate_value("T").unwrap();
        b.iter(|| black_box(shape.new_class_segment(binding).unwrap()))
    });

    group.bench_function("unspecialized_handle", |b| {
        let heap = Arc::new(ManagedHeap::new(0));
        let class = ClassMetadata::define("Bench", &pool, Arc::clone(&heap), &config).unwrap();
        let proto = SegmentHandle::initial_prototype(&class, SegmentNumber::FIRST, None).unwrap();
        let binding = heap.allocate_value("T").unwrap();
        b.iter(|| black_box(SegmentHandle::make_segment(&proto, false, binding, None).unwrap()))
    });

    group.bench_function("resolve_slot", |b| {
        let heap = Arc::new(ManagedHeap::new(0));
        let class = ClassMetadata::define("Bench", &pool, Arc::clone(&heap), &config).unwrap();
        let shape = class.shape(SegmentNumber::FIRST).unwrap();
        let seg = shape.new_class_segment(heap.allocate_value("T").unwrap()).unwrap();
        let array = heap.ref_array(seg.refs().unwrap().array).unwrap();
        let target = heap.allocate_value("site").unwrap();
        b.iter(|| black_box(array.resolve(3, target).unwrap()))
    });

    group.finish();
}

criterion_group!(benches, bench_resolve, bench_layout, bench_instances);
criterion_main!(benches);
