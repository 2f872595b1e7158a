use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fixdedup::prelude::*;
use std::fs;
use tempfile::tempdir;

fn sample(len: usize) -> Vec<u8> {
    // Repetitive enough that roughly half the segments deduplicate
    (0..len).map(|i| ((i / 64) % 97) as u8 ^ (i % 7) as u8).collect()
}

fn bench_digest(c: &mut Criterion) {
    let segment = vec![0x5au8; 64];
    let mut group = c.benchmark_group("digest");
    for algo in HashAlgorithm::ALL {
        group.bench_with_input(BenchmarkId::from_parameter(algo), &segment, |b, seg| {
            b.iter(|| algo.digest(seg))
        });
    }
    group.finish();
}

fn bench_encode(c: &mut Criterion) {
    let data = sample(256 * 1024);
    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(data.len() as u64));

    for segment_size in [64usize, 512] {
        group.bench_with_input(
            BenchmarkId::from_parameter(segment_size),
            &segment_size,
            |b, &segment_size| {
                b.iter(|| {
                    let dir = tempdir().unwrap();
                    let source = dir.path().join("input");
                    fs::write(&source, &data).unwrap();

                    let config = DedupConfig {
                        segment_size,
                        container_capacity: 1000,
                        id_width: 4,
                        hash: HashAlgorithm::Blake3,
                    };
                    let store =
                        SegmentStore::open(dir.path().join("segments"), segment_size, 1000)
                            .unwrap();
                    let index = MemoryIndex::new();
                    Deduplicator::new(config, &store, &index)
                        .unwrap()
                        .encode(&source, &dir.path().join("input.bin"))
                        .unwrap()
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_digest, bench_encode);
criterion_main!(benches);
