//! Benchmarks for the hot paths of the engine: n-gram generation, the
//! run codec, and the sorted-run sweeps.
//!
//! Run with: `cargo bench`
//! View reports: `open target/criterion/report/index.html`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use ursadb::ngram::generate;
use ursadb::run::{compress_run, read_compressed_run, SortedRun};
use ursadb::types::{FileId, IndexType};

/// Pseudo-random but deterministic sample data.
fn sample_data(len: usize) -> Vec<u8> {
    let mut state: u32 = 0x1234_5678;
    (0..len)
        .map(|_| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            (state >> 24) as u8
        })
        .collect()
}

fn ascending(count: usize, step: u32) -> Vec<FileId> {
    (0..count as u32).map(|i| FileId::new(i * step)).collect()
}

fn bench_ngram_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("ngram_generation");
    let data = sample_data(1024 * 1024);
    group.throughput(Throughput::Bytes(data.len() as u64));

    for ntype in IndexType::ALL {
        group.bench_with_input(BenchmarkId::from_parameter(ntype), &data, |b, data| {
            b.iter(|| {
                let mut count: u64 = 0;
                generate(ntype, black_box(data), &mut |_| count += 1);
                count
            });
        });
    }
    group.finish();
}

fn bench_run_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("run_codec");

    for size in [1_000, 100_000] {
        let ids = ascending(size, 3);
        let compressed = compress_run(&ids);

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("compress", size), &ids, |b, ids| {
            b.iter(|| compress_run(black_box(ids)));
        });
        group.bench_with_input(
            BenchmarkId::new("decompress", size),
            &compressed,
            |b, compressed| {
                b.iter(|| read_compressed_run(black_box(compressed)));
            },
        );
    }
    group.finish();
}

fn bench_sorted_run_ops(c: &mut Criterion) {
    let mut group = c.benchmark_group("sorted_run");

    for size in [1_000, 100_000] {
        let a = ascending(size, 2);
        let b_ids = ascending(size, 3);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("and", size), &size, |bench, _| {
            bench.iter(|| {
                let mut left = SortedRun::from_sorted(a.clone());
                let mut right = SortedRun::from_sorted(b_ids.clone());
                left.do_and(&mut right);
                left
            });
        });

        group.bench_with_input(BenchmarkId::new("or", size), &size, |bench, _| {
            bench.iter(|| {
                let mut left = SortedRun::from_sorted(a.clone());
                let mut right = SortedRun::from_sorted(b_ids.clone());
                left.do_or(&mut right);
                left
            });
        });

        group.bench_with_input(BenchmarkId::new("pick_common", size), &size, |bench, _| {
            bench.iter(|| {
                let mut sources = vec![
                    SortedRun::from_sorted(a.clone()),
                    SortedRun::from_sorted(b_ids.clone()),
                    SortedRun::from_sorted(ascending(size, 5)),
                ];
                SortedRun::pick_common(2, &mut sources)
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_ngram_generation,
    bench_run_codec,
    bench_sorted_run_ops
);
criterion_main!(benches);
