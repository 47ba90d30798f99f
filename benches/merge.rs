#![allow(unused)]
extern crate abcmerge;

use abcmerge::{abc::opcodes::*, prelude::*};
use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::hint::black_box;

/// Builds a module with `classes` public classes, each with a few fields and a constructor
/// that exercises the common peephole rules.
fn build_module(prefix: &str, classes: usize) -> Vec<u8> {
    let mut builder = AbcBuilder::new();
    let public = builder.namespace(ConstantKind::PackageNamespace, "");
    let count = builder.qname(public, "count");
    let label = builder.qname(public, "label");
    let text = builder.string("shared text");

    let mut inits = Vec::new();
    for index in 0..classes {
        let name = builder.qname(public, &format!("{prefix}{index}"));
        let iinit = builder.method(MethodInfo::default());
        let cinit = builder.method(MethodInfo::default());

        let mut instance = InstanceInfo::new(name, 0, iinit);
        instance.traits = vec![Trait::slot(count, 0), Trait::slot(label, 0)];
        let class = builder.class(
            instance,
            ClassInfo {
                cinit,
                traits: Vec::new(),
            },
        );
        inits.push(Trait::class(name, index as u32 + 1, class));

        builder.body(
            iinit,
            &[
                GETLOCAL0,
                PUSHSCOPE,
                GETLOCAL0,
                CONSTRUCTSUPER,
                0,
                GETLOCAL1,
                INCREMENT_I,
                SETLOCAL1,
                GETLOCAL0,
                PUSHSTRING,
                text as u8,
                CONVERT_S,
                SETPROPERTY,
                label as u8,
                FINDPROPSTRICT,
                count as u8,
                GETPROPERTY,
                count as u8,
                PUSHBYTE,
                1,
                SUBTRACT,
                POP,
                RETURNVOID,
            ],
        );
        builder.body(cinit, &[GETLOCAL0, PUSHSCOPE, RETURNVOID]);
    }

    let init = builder.method(MethodInfo::default());
    builder.script(init, inits);
    builder.body(init, &[GETLOCAL0, PUSHSCOPE, RETURNVOID]);
    builder.build()
}

/// Benchmark merging eight modules of 64 classes each
///
/// The modules share most of their constants, so this measures translation and
/// deduplication as much as instruction rewriting.
fn bench_merge(c: &mut Criterion) {
    let modules: Vec<Vec<u8>> = (0..8).map(|index| build_module(&format!("M{index}C"), 64)).collect();
    let total: usize = modules.iter().map(Vec::len).sum();

    let mut group = c.benchmark_group("merge");
    group.throughput(Throughput::Bytes(total as u64));
    for peephole in [false, true] {
        let merger = AbcMerger::new(MergeConfig::new().peephole(peephole));
        let name = if peephole { "peephole" } else { "plain" };
        group.bench_function(name, |b| {
            b.iter(|| {
                let inputs: Vec<ModuleInput> = modules
                    .iter()
                    .map(|module| ModuleInput::new(module.clone()).unwrap())
                    .collect();
                black_box(merger.merge(black_box(&inputs)).unwrap())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_merge);
criterion_main!(benches);
