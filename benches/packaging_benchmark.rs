//! Benchmarks for the delta codec and the deterministic zip writer.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::{rngs::StdRng, RngCore, SeedableRng};
use recovery_pack::archive::{Compression, DeterministicZip, EntryOptions};
use recovery_pack::delta;
use std::hint::black_box;
use std::io::Cursor;

/// A boot-like source and a recovery-like target sharing most of their bytes.
fn image_pair(len: usize) -> (Vec<u8>, Vec<u8>) {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut source = vec![0u8; len];
    rng.fill_bytes(&mut source);

    let mut target = source.clone();
    for chunk in target.chunks_mut(64 * 1024) {
        let n = chunk.len().min(512);
        rng.fill_bytes(&mut chunk[..n]);
    }
    target.extend_from_slice(&source[..len / 8]);
    (source, target)
}

fn bench_delta(c: &mut Criterion) {
    let mut group = c.benchmark_group("delta");
    for len in [256 * 1024, 4 * 1024 * 1024] {
        let (source, target) = image_pair(len);
        let patch = delta::diff(&source, None, &target).expect("diff");
        group.throughput(Throughput::Bytes(target.len() as u64));

        group.bench_with_input(BenchmarkId::new("diff", len), &len, |b, _| {
            b.iter(|| black_box(delta::diff(black_box(&source), None, black_box(&target)).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("apply", len), &len, |b, _| {
            b.iter(|| black_box(delta::apply(black_box(&source), None, black_box(&patch)).unwrap()));
        });
    }
    group.finish();
}

fn bench_zip_write(c: &mut Criterion) {
    let (payload, _) = image_pair(1024 * 1024);
    let mut group = c.benchmark_group("zip_write");
    group.throughput(Throughput::Bytes(payload.len() as u64 * 8));

    for (label, compression) in [("stored", Compression::Stored), ("deflated", Compression::Deflated)] {
        group.bench_function(label, |b| {
            b.iter(|| {
                let mut zip = DeterministicZip::new(Cursor::new(Vec::with_capacity(payload.len() * 8)));
                let options = EntryOptions::default().compression(compression);
                for i in 0..8 {
                    zip.write_bytes(format!("IMAGES/part{i}.img"), &payload, &options).unwrap();
                }
                black_box(zip.close().unwrap().into_inner().len())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_delta, bench_zip_write);
criterion_main!(benches);
