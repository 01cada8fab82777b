//! Sequence Engine Benchmarks
//!
//! Benchmarks for the edit and read paths: append throughput, random
//! access via the interpolation search, and display summarization.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use wv_core::{f32_to_samples, SampleCount, SampleFormat};
use wv_engine::Sequence;
use wv_file::{DirManager, DiskDirManager};

const APPEND_SIZES: &[usize] = &[4096, 65536];

fn f32_bytes(samples: &[f32]) -> Vec<u8> {
    let mut data = vec![0u8; samples.len() * 4];
    f32_to_samples(samples, SampleFormat::Float, &mut data);
    data
}

fn test_sequence(total: usize) -> (tempfile::TempDir, Sequence) {
    let dir = tempfile::tempdir().unwrap();
    let mgr = DiskDirManager::new(dir.path().join("project")).unwrap();
    let mut seq = Sequence::with_disk_block_size(
        mgr as Arc<dyn DirManager>,
        SampleFormat::Float,
        64 * 1024,
    );
    let chunk: Vec<f32> = (0..4096).map(|i| (i as f32).sin()).collect();
    let bytes = f32_bytes(&chunk);
    let mut written = 0;
    while written < total {
        let n = chunk.len().min(total - written);
        seq.append(&bytes[..n * 4], SampleFormat::Float, n).unwrap();
        written += n;
    }
    (dir, seq)
}

/// Benchmark appending into a fresh sequence
fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequence_append");

    for &size in APPEND_SIZES {
        group.throughput(Throughput::Bytes((size * 4) as u64));

        let samples: Vec<f32> = (0..size).map(|i| (i as f32).sin()).collect();
        let bytes = f32_bytes(&samples);

        group.bench_with_input(BenchmarkId::new("append", size), &size, |b, _| {
            b.iter_with_setup(
                || {
                    let dir = tempfile::tempdir().unwrap();
                    let mgr = DiskDirManager::new(dir.path().join("project")).unwrap();
                    let seq = Sequence::with_disk_block_size(
                        mgr as Arc<dyn DirManager>,
                        SampleFormat::Float,
                        64 * 1024,
                    );
                    (dir, seq)
                },
                |(dir, mut seq)| {
                    seq.append(&bytes, SampleFormat::Float, size).unwrap();
                    black_box(seq.num_samples());
                    drop(dir);
                },
            )
        });
    }

    group.finish();
}

/// Benchmark random access reads
fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("sequence_get");

    let total = 1 << 20;
    let (_dir, seq) = test_sequence(total);
    let mut out = vec![0u8; 4096 * 4];

    group.throughput(Throughput::Bytes((4096 * 4) as u64));
    group.bench_function("get_4096", |b| {
        let mut pos = 0usize;
        b.iter(|| {
            seq.get(
                &mut out,
                SampleFormat::Float,
                (pos % (total - 4096)) as SampleCount,
                4096,
                true,
            )
            .unwrap();
            pos = pos.wrapping_add(37_117);
            black_box(&out);
        })
    });

    group.finish();
}

/// Benchmark the interpolation search
fn bench_find_block(c: &mut Criterion) {
    let total = 1 << 20;
    let (_dir, seq) = test_sequence(total);

    c.bench_function("find_block", |b| {
        let mut pos: SampleCount = 1;
        b.iter(|| {
            let idx = seq.find_block(pos % seq.num_samples());
            pos = pos.wrapping_mul(48271) % seq.num_samples().max(1);
            if pos <= 0 {
                pos = 1;
            }
            black_box(idx);
        })
    });
}

/// Benchmark a zoomed-out display query over the whole sequence
fn bench_wave_display(c: &mut Criterion) {
    let total = 1 << 20;
    let (_dir, seq) = test_sequence(total);

    let columns = 1000usize;
    let where_: Vec<SampleCount> = (0..=columns)
        .map(|i| (i * total / columns) as SampleCount)
        .collect();
    let mut min = vec![0f32; columns];
    let mut max = vec![0f32; columns];
    let mut rms = vec![0f32; columns];
    let mut bl = vec![0i64; columns];

    c.bench_function("wave_display_1000_columns", |b| {
        b.iter(|| {
            let ok = seq.get_wave_display(&mut min, &mut max, &mut rms, &mut bl, &where_);
            black_box(ok);
        })
    });
}

criterion_group!(
    benches,
    bench_append,
    bench_get,
    bench_find_block,
    bench_wave_display
);
criterion_main!(benches);
