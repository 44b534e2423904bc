//! Append throughput across the three durability modes.
//!
//! Run with: cargo bench --package rill-storage

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rand::RngCore;
use rill_storage::{Durability, Segment};

const PAYLOAD_SIZE: usize = 100;

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("segment_append");
    group.throughput(Throughput::Bytes(PAYLOAD_SIZE as u64));

    for (name, durability) in [
        ("async", Durability::Async),
        ("medium_durable", Durability::Medium),
        ("full_durable", Durability::Full),
    ] {
        group.bench_function(name, |b| {
            let dir = tempfile::tempdir().unwrap();
            let segment = Segment::open(dir.path().join("bench.log"), 0, durability).unwrap();

            let mut payload = vec![0u8; PAYLOAD_SIZE];
            rand::thread_rng().fill_bytes(&mut payload);

            b.iter(|| segment.append(black_box(&payload)).unwrap());

            segment.close().unwrap();
        });
    }

    group.finish();
}

criterion_group!(benches, bench_append);
criterion_main!(benches);
